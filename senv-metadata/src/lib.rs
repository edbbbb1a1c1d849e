// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Documented formats for senv's machine-readable output.
//!
//! This crate carries the serializable types produced by `senv --report` and
//! `senv --list --json`, along with the exit codes the driver is documented to
//! return. Tools building on top of senv can depend on this crate without
//! pulling in the engine.

mod exit_codes;
mod report;

pub use exit_codes::*;
pub use report::*;
