// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `venv` backend: environments created with the interpreter's own
//! `venv` module. Requires a concrete Python 3 interpreter.

use super::{
    BackendKind, CreateContext, Environment, VenvBackend, pip_install_argv, venv_bin_dir,
    venv_overlay, venv_python,
};
use crate::{
    errors::{EnvCreateError, EnvCreateErrorKind, UnsupportedOperationError},
    interpreter::InterpreterSpec,
};
use camino::{Utf8Path, Utf8PathBuf};

/// See the module docs.
#[derive(Debug)]
pub struct VenvModuleBackend;

impl VenvBackend for VenvModuleBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Venv
    }

    fn is_available(&self) -> bool {
        true
    }

    fn create(&self, cx: &CreateContext<'_>) -> Result<(), EnvCreateError> {
        if let Some(spec) = cx.interpreter_spec
            && InterpreterSpec::new(spec).is_python2()
        {
            return Err(EnvCreateError {
                backend: self.kind(),
                location: cx.location.to_owned(),
                kind: EnvCreateErrorKind::Unsupported(format!(
                    "the venv module needs Python 3, got `{spec}`"
                )),
            });
        }

        let python = match cx.interpreter {
            Some(interpreter) => interpreter.to_string(),
            // With no interpreter declared, the environment is built on the
            // default host python.
            None => "python3".to_owned(),
        };
        let mut argv = vec![python, "-m".to_owned(), "venv".to_owned()];
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
