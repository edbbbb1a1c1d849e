// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The process-environment builder.
//!
//! Every subprocess launched inside a session environment sees an environment
//! composed from three layers, in order:
//!
//! 1. a base derived from the host environment with [`ENV_DENYLIST`] removed,
//! 2. the backend's overlay (e.g. `VIRTUAL_ENV`, `CONDA_PREFIX`, a `PATH`
//!    prepend),
//! 3. the caller's per-command overlay, where the unset marker removes keys.
//!
//! A `PATH` key in an overlay is prepended to the existing value with the
//! platform separator, never replaced.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Host environment variables stripped from every subprocess launched in an
/// ephemeral environment.
///
/// These are the variables virtual-environment tools use to auto-discover a
/// pre-existing environment, plus the variables that force system-wide
/// interpreter selection. The exact list is part of the public contract;
/// additions are a minor version bump.
pub const ENV_DENYLIST: &[&str] = &[
    "__PYVENV_LAUNCHER__",
    "PYTHONHOME",
    "PYTHONEXECUTABLE",
    "VIRTUAL_ENV",
    "CONDA_PREFIX",
    "CONDA_DEFAULT_ENV",
    "CONDA_PROMPT_MODIFIER",
    "UV_PYTHON",
    "UV_PROJECT_ENVIRONMENT",
];

#[cfg(windows)]
const PATH_SEPARATOR: &str = ";";
#[cfg(not(windows))]
const PATH_SEPARATOR: &str = ":";

/// A caller-supplied environment value: either set a key or remove it.
///
/// In `senv.toml`, the boolean `false` is the unset marker:
///
/// ```toml
/// env = { PYTHONWARNINGS = "error", PYTEST_ADDOPTS = false }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    /// Remove the key. Only `false` is accepted; `true` is rejected at
    /// validation time.
    Unset(bool),
    /// Set the key to this value.
    Set(String),
}

/// Builder for a subprocess environment.
#[derive(Clone, Debug, Default)]
pub struct EnvBuilder {
    vars: BTreeMap<String, String>,
}

impl EnvBuilder {
    /// Starts from the host environment with the deny-list removed.
    pub fn from_host() -> Self {
        let vars = std::env::vars()
            .filter(|(key, _)| !ENV_DENYLIST.contains(&key.as_str()))
            .collect();
        Self { vars }
    }

    /// Starts from an empty environment (for `include_outer_env = false`).
    pub fn empty() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let vars = vars
            .into_iter()
            .filter(|(key, _)| !ENV_DENYLIST.contains(&key.as_str()))
            .collect();
        Self { vars }
    }

    /// Applies a backend overlay. `PATH` entries are prepended to any
    /// existing value.
    pub fn apply_overlay<'a>(
        &mut self,
        overlay: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> &mut Self {
        for (key, value) in overlay {
            if key == "PATH" {
                self.prepend_path(value);
            } else {
                self.vars.insert(key.to_owned(), value.to_owned());
            }
        }
        self
    }

    /// Applies the caller's per-command overlay. Unset markers remove keys;
    /// `PATH` is prepended like in backend overlays.
    pub fn apply_calls<'a>(
        &mut self,
        calls: impl IntoIterator<Item = (&'a str, &'a EnvValue)>,
    ) -> &mut Self {
        for (key, value) in calls {
            match value {
                EnvValue::Set(value) if key == "PATH" => self.prepend_path(value),
                EnvValue::Set(value) => {
                    self.vars.insert(key.to_owned(), value.clone());
                }
                EnvValue::Unset(_) => {
                    self.vars.remove(key);
                }
            }
        }
        self
    }

    fn prepend_path(&mut self, prefix: &str) {
        match self.vars.get_mut("PATH") {
            Some(existing) => {
                let combined = format!("{prefix}{PATH_SEPARATOR}{existing}");
                *existing = combined;
            }
            None => {
                self.vars.insert("PATH".to_owned(), prefix.to_owned());
            }
        }
    }

    /// Returns the current value of `PATH`, if any.
    pub fn path(&self) -> Option<&str> {
        self.vars.get("PATH").map(String::as_str)
    }

    /// Finishes the build.
    pub fn finish(self) -> BTreeMap<String, String> {
        self.vars
    }
}
