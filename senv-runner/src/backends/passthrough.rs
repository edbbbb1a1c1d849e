// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The passthrough backend: no environment at all.
//!
//! Sessions declared with `python = false` (or `"none"`) run against the
//! host. Installing packages here would mutate the host interpreter, so the
//! install primitive is refused; the session handle offers the explicit
//! `external = true` escape hatch and warns when it is used.

use super::{BackendKind, CreateContext, Environment, VenvBackend};
use crate::errors::{EnvCreateError, UnsupportedOperationError};
use camino::{Utf8Path, Utf8PathBuf};

/// See the module docs.
#[derive(Debug)]
pub struct PassthroughBackend;

impl VenvBackend for PassthroughBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::None
    }

    fn is_available(&self) -> bool {
        true
    }

    fn create(&self, cx: &CreateContext<'_>) -> Result<(), EnvCreateError> {
        // Nothing to build; provisioning creates the bare directory.
        let _ = cx;
        Ok(())
    }

    fn bin_dir(&self, _location: &Utf8Path) -> Option<Utf8PathBuf> {
        None
    }

    fn interpreter_path(&self, _location: &Utf8Path) -> Option<Utf8PathBuf> {
        None
    }

    fn env_overlay(&self, _env: &Environment) -> Vec<(String, String)> {
        Vec::new()
    }

    fn install_argv(
        &self,
        _env: &Environment,
        _args: &[String],
    ) -> Result<Vec<String>, UnsupportedOperationError> {
        Err(UnsupportedOperationError {
            backend: BackendKind::None,
            operation: "install",
        })
    }
}
