// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `senv` invocations.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum SenvExitCode {}

impl SenvExitCode {
    /// Every selected session succeeded (or was skipped under a non-strict
    /// missing-interpreter policy).
    pub const OK: i32 = 0;

    /// One or more sessions failed or were aborted, or the selection matched
    /// nothing while an explicit selection was requested.
    pub const RUN_FAILED: i32 = 1;

    /// Command-line arguments failed to parse.
    pub const ARGUMENT_ERROR: i32 = 2;

    /// The configuration file could not be located, read, or evaluated.
    pub const CONFIG_LOAD_FAILED: i32 = 3;
}
