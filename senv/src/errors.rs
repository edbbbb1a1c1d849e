// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI-level error mapping.
//!
//! Library errors are mapped onto [`ExpectedError`], which knows the exit
//! code each failure class is documented to produce: configuration loading
//! problems exit 3, everything else that stops a run exits 1. (Argument
//! parse errors exit 2, straight from clap.)

use owo_colors::OwoColorize;
use senv_metadata::SenvExitCode;
use senv_runner::errors::{
    ConfigLoadError, InvalidOptionError, InvalidSessionError, ReportWriteError, ScheduleError,
    VersionMismatchError,
};
use thiserror::Error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// A failure with a documented exit code.
#[derive(Debug, Error)]
pub enum ExpectedError {
    #[error(transparent)]
    ConfigLoad(#[from] ConfigLoadError),

    #[error(transparent)]
    VersionMismatch(#[from] VersionMismatchError),

    #[error(transparent)]
    InvalidOption(#[from] InvalidOptionError),

    #[error(transparent)]
    InvalidSession(#[from] InvalidSessionError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    ReportWrite(#[from] ReportWriteError),

    #[error("failed to set up the command executor")]
    ExecutorSetup(#[source] std::io::Error),

    #[error("failed to write output")]
    WriteOutput(#[source] std::io::Error),
}

impl ExpectedError {
    /// The process exit code for this error.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::ConfigLoad(_) | Self::VersionMismatch(_) => SenvExitCode::CONFIG_LOAD_FAILED,
            Self::InvalidOption(_)
            | Self::InvalidSession(_)
            | Self::Schedule(_)
            | Self::ReportWrite(_)
            | Self::ExecutorSetup(_)
            | Self::WriteOutput(_) => SenvExitCode::RUN_FAILED,
        }
    }

    /// Displays this error to stderr, including its source chain.
    pub fn display_to_stderr(&self) {
        let mut current: Option<&dyn std::error::Error> = Some(self);
        let mut first = true;
        while let Some(err) = current {
            if first {
                eprintln!("{}: {err}", "error".red().bold());
                first = false;
            } else {
                eprintln!("  {} {err}", "caused by:".dimmed());
            }
            current = err.source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use senv_runner::errors::ConfigLoadErrorKind;

    #[test]
    fn exit_codes_match_the_contract() {
        let config = ExpectedError::ConfigLoad(ConfigLoadError::new(
            Utf8PathBuf::from("senv.toml"),
            ConfigLoadErrorKind::NotFound,
        ));
        assert_eq!(config.process_exit_code(), 3);

        let selection = ExpectedError::InvalidSession(InvalidSessionError::NoMatch);
        assert_eq!(selection.process_exit_code(), 1);
    }
}
