// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

fn main() {
    enable_ansi_support::enable_ansi_support().ok(); // best-effort; no-op on non-Windows
    std::process::exit(senv::main_impl());
}
