// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `uv` backend: environments created and populated by the uv resolver.
//!
//! uv can download the requested interpreter itself; the `download-python`
//! invocation option maps onto its managed-python flags. uv venvs ship
//! without pip, so installs go through `uv pip install` against the
//! environment's interpreter, and a user who asks for `pip` itself simply
//! gets it installed like any other package.

use super::{
    BackendKind, CreateContext, Environment, VenvBackend, venv_bin_dir, venv_overlay, venv_python,
};
use crate::{
    errors::{EnvCreateError, UnsupportedOperationError},
    options::DownloadPython,
};
use camino::{Utf8Path, Utf8PathBuf};

/// See the module docs.
#[derive(Debug)]
pub struct UvBackend;

impl VenvBackend for UvBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Uv
    }

    fn is_available(&self) -> bool {
        which::which("uv").is_ok()
    }

    fn create(&self, cx: &CreateContext<'_>) -> Result<(), EnvCreateError> {
        let mut argv = vec!["uv".to_owned(), "venv".to_owned()];
        match cx.download {
            DownloadPython::Auto => {}
            DownloadPython::Always => argv.push("--managed-python".to_owned()),
            DownloadPython::Never => argv.push("--no-managed-python".to_owned()),
        }
        if let Some(spec) = cx.interpreter_spec {
            argv.push("--python".to_owned());
            // Pass the resolved host interpreter when there is one; the bare
            // spec otherwise, so uv may download it under its own policy.
            match cx.interpreter {
                Some(interpreter) => argv.push(interpreter.to_string()),
                None => argv.push(spec.to_owned()),
            }
        }
        // Managed interpreters and wheels land in the env root's shared
        // cache, so sibling sessions reuse the downloads.
        if let Some(envroot) = cx.location.parent() {
            argv.push("--cache-dir".to_owned());
            argv.push(super::shared_cache_dir(envroot).join("uv").to_string());
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
        let Some(python) = &env.interpreter else {
            return Err(UnsupportedOperationError {
                backend: env.kind,
                operation: "install",
            });
        };
        let mut argv = vec![
            "uv".to_owned(),
            "pip".to_owned(),
            "install".to_owned(),
            "--python".to_owned(),
            python.to_string(),
        ];
        argv.extend(args.iter().cloned());
        Ok(argv)
    }
}
