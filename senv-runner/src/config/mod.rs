// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loading: locating `senv.toml`, deserializing and validating
//! session declarations, and the `needs-version` assertion.

mod decl;
mod discovery;
mod imp;
mod version;

pub use decl::{
    LogLevel, ParamBundle, ParamSet, PythonAxis, RunDetails, SessionDecl, Step,
};
pub use discovery::{CONFIG_FILE_NAME, discover_config_file};
pub use imp::SenvConfig;
pub use version::{CheckError, check_needs_version, current_version};
