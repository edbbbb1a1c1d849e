// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The senv CLI.
//!
//! This crate is a thin front-end over `senv-runner`: argument parsing,
//! output/color setup, and the mapping from library errors onto documented
//! exit codes.

mod dispatch;
mod errors;
mod output;

pub use dispatch::CliOpts;
pub use errors::ExpectedError;

use clap::Parser;

/// Parses arguments and runs the invocation, returning the process exit
/// code.
pub fn main_impl() -> i32 {
    // Argument errors exit 2 via clap's own error path.
    let opts = CliOpts::parse();
    match dispatch::run(opts) {
        Ok(code) => code,
        Err(err) => {
            err.display_to_stderr();
            err.process_exit_code()
        }
    }
}
