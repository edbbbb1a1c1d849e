// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The conda-family backends: `conda`, `mamba`, and `micromamba`.
//!
//! All three share the same CLI surface for the subset senv drives:
//! `create -p <prefix> python=<version>`, `remove -p <prefix>`, and
//! `install -p <prefix>`. Packages installed through the session handle's
//! plain `install` go through pip inside the prefix; `conda-install` steps
//! go through the tool itself with channel flags.

use super::{BackendKind, CreateContext, Environment, VenvBackend, pip_install_argv};
use crate::errors::{EnvCreateError, EnvCreateErrorKind, UnsupportedOperationError};
use camino::{Utf8Path, Utf8PathBuf};

/// One of the conda-family backends; the kind picks the tool.
#[derive(Debug)]
pub struct CondaBackend {
    kind: BackendKind,
}

impl CondaBackend {
    pub(crate) const fn new(kind: BackendKind) -> Self {
        Self { kind }
    }

    fn tool(&self) -> &'static str {
        self.kind.as_str()
    }
}

impl VenvBackend for CondaBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        which::which(self.tool()).is_ok()
    }

    fn create(&self, cx: &CreateContext<'_>) -> Result<(), EnvCreateError> {
        let mut argv = vec![
            self.tool().to_owned(),
            "create".to_owned(),
            "--yes".to_owned(),
            "--prefix".to_owned(),
            cx.location.to_string(),
        ];
        match cx.interpreter_spec {
            Some(spec) => argv.push(format!("python={spec}")),
            None => argv.push("python".to_owned()),
        }
        argv.extend(cx.params.iter().cloned());
        cx.run_tool(argv, cx.location, self.kind)
    }

    fn destroy(&self, cx: &CreateContext<'_>) -> Result<(), EnvCreateError> {
        cx.run_tool(remove_argv(self.kind, cx.location), cx.location, self.kind)?;
        // The tool leaves the (now empty) prefix dir behind on some
        // versions.
        if cx.location.exists() {
            fs_err::remove_dir_all(cx.location).map_err(|err| EnvCreateError {
                backend: self.kind,
                location: cx.location.to_owned(),
                kind: EnvCreateErrorKind::Io(err.into()),
            })?;
        }
        Ok(())
    }

    fn bin_dir(&self, location: &Utf8Path) -> Option<Utf8PathBuf> {
        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                Some(location.join("Scripts"))
            } else {
                Some(location.join("bin"))
            }
        }
    }

    fn interpreter_path(&self, location: &Utf8Path) -> Option<Utf8PathBuf> {
        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                Some(location.join("python.exe"))
            } else {
                Some(location.join("bin").join("python"))
            }
        }
    }

    fn env_overlay(&self, env: &Environment) -> Vec<(String, String)> {
        let mut overlay = vec![
            ("CONDA_PREFIX".to_owned(), env.location.to_string()),
            ("CONDA_DEFAULT_ENV".to_owned(), env.location.to_string()),
        ];
        if let Some(bin_dir) = &env.bin_dir {
            overlay.push(("PATH".to_owned(), bin_dir.to_string()));
        }
        overlay
    }

    fn install_argv(
        &self,
        env: &Environment,
        args: &[String],
    ) -> Result<Vec<String>, UnsupportedOperationError> {
        pip_install_argv(env, args)
    }

    fn conda_install_argv(
        &self,
        env: &Environment,
        args: &[String],
        channels: &[String],
    ) -> Result<Vec<String>, UnsupportedOperationError> {
        let mut argv = vec![
            self.tool().to_owned(),
            "install".to_owned(),
            "--yes".to_owned(),
            "--prefix".to_owned(),
            env.location.to_string(),
        ];
        for channel in channels {
            argv.push("--channel".to_owned());
            argv.push(channel.clone());
        }
        argv.extend(args.iter().cloned());
        Ok(argv)
    }
}

// Rebuilds go through `remove --yes -p` so conda's own package cache stays
// consistent; a bare directory delete confuses some conda versions.
pub(crate) fn remove_argv(kind: BackendKind, location: &Utf8Path) -> Vec<String> {
    vec![
        kind.as_str().to_owned(),
        "remove".to_owned(),
        "--yes".to_owned(),
        "--all".to_owned(),
        "--prefix".to_owned(),
        location.to_string(),
    ]
}
