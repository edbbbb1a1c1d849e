// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `virtualenv` backend: environments created by the external
//! `virtualenv` tool. This is the default backend.

use super::{
    BackendKind, CreateContext, Environment, VenvBackend, pip_install_argv, venv_bin_dir,
    venv_overlay, venv_python,
};
use crate::errors::{EnvCreateError, EnvCreateErrorKind, UnsupportedOperationError};
use camino::{Utf8Path, Utf8PathBuf};

/// See the module docs.
#[derive(Debug)]
pub struct VirtualenvBackend;

impl VirtualenvBackend {
    /// The tool entry point: the `virtualenv` script if it is on PATH,
    /// otherwise `python3 -m virtualenv` through the outer interpreter.
    fn tool_argv(&self, cx: &CreateContext<'_>) -> Result<Vec<String>, EnvCreateError> {
        if which::which("virtualenv").is_ok() {
            return Ok(vec!["virtualenv".to_owned()]);
        }
        for outer in ["python3", "python"] {
            if which::which(outer).is_ok() {
                return Ok(vec![
                    outer.to_owned(),
                    "-m".to_owned(),
                    "virtualenv".to_owned(),
                ]);
            }
        }
        Err(EnvCreateError {
            backend: self.kind(),
            location: cx.location.to_owned(),
            kind: EnvCreateErrorKind::Unsupported(
                "neither `virtualenv` nor an outer python interpreter was found".to_owned(),
            ),
        })
    }
}

impl VenvBackend for VirtualenvBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Virtualenv
    }

    fn is_available(&self) -> bool {
        // Declared always-available; a missing tool surfaces at creation
        // time instead of silently falling through the chain.
        true
    }

    fn create(&self, cx: &CreateContext<'_>) -> Result<(), EnvCreateError> {
        let mut argv = self.tool_argv(cx)?;
        if let Some(interpreter) = cx.interpreter {
            argv.push("-p".to_owned());
            argv.push(interpreter.to_string());
        }
        argv.extend(cx.params.iter().cloned());
        argv.push(cx.location.to_string());
        cx.run_tool(argv, cx.location, self.kind())
    }

    fn bin_dir(&self, location: &Utf8Path) -> Option<Utf8PathBuf> {
        Some(venv_bin_dir(location))
    }

    fn interpreter_path(&self, location: &Utf8Path) -> Option<Utf8PathBuf> {
        Some(venv_python(location))
    }

    fn env_overlay(&self, env: &Environment) -> Vec<(String, String)> {
        venv_overlay(env)
    }

    fn install_argv(
        &self,
        env: &Environment,
        args: &[String],
    ) -> Result<Vec<String>, UnsupportedOperationError> {
        pip_install_argv(env, args)
    }
}
