// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The invocation option set.
//!
//! Each recognized option can come from three places, merged with this
//! precedence (high to low): a command-line flag, an environment variable
//! mapped to the option (handled by the CLI layer's parser), and an
//! assignment in the configuration's `[options]` table. The merge snapshots
//! into an immutable [`InvocationOptions`] record before anything runs.

use crate::{backends::BackendKind, errors::InvalidOptionError};
use camino::Utf8PathBuf;
use serde::Deserialize;
use std::{fmt, str::FromStr, time::Duration};

/// How aggressively to reuse existing environments.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReusePolicy {
    /// Reuse any existing environment, even a stale one.
    Always,
    /// Reuse when the stored fingerprint matches the request.
    Yes,
    /// Rebuild. The default.
    #[default]
    No,
    /// Rebuild, and ignore any per-session reuse declaration.
    Never,
}

impl ReusePolicy {
    /// True for the CLI modes that override per-session declarations.
    pub fn is_forcing(self) -> bool {
        matches!(self, Self::Always | Self::Never)
    }
}

impl fmt::Display for ReusePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Always => "always",
            Self::Yes => "yes",
            Self::No => "no",
            Self::Never => "never",
        };
        f.write_str(s)
    }
}

impl FromStr for ReusePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(Self::Always),
            "yes" => Ok(Self::Yes),
            "no" => Ok(Self::No),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "unknown reuse policy `{other}` (expected always, yes, no, or never)"
            )),
        }
    }
}

/// Policy for letting a backend download a missing interpreter.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadPython {
    /// Leave it to the backend's own defaults.
    #[default]
    Auto,
    /// Require a backend-managed interpreter.
    Always,
    /// Never download; a missing interpreter follows the
    /// missing-interpreter policy.
    Never,
}

impl FromStr for DownloadPython {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "unknown download-python policy `{other}` (expected auto, always, or never)"
            )),
        }
    }
}

/// Policy for installing the dependencies of `run-script` steps.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptMode {
    /// Install them like any other install primitive (skipped on reuse with
    /// `--no-install`). The default.
    #[default]
    Reuse,
    /// Install them on every run, even into reused environments.
    Fresh,
    /// Never install them; the script runs against whatever is present.
    None,
}

impl FromStr for ScriptMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reuse" => Ok(Self::Reuse),
            "fresh" => Ok(Self::Fresh),
            "none" => Ok(Self::None),
            other => Err(format!(
                "unknown script mode `{other}` (expected reuse, fresh, or none)"
            )),
        }
    }
}

/// The `[options]` table of `senv.toml`: the lowest-precedence layer.
///
/// Values here are loosely typed strings where the option is enum-like, so a
/// bad value is reported as an invalid option (with the key name) rather
/// than as a config parse failure.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ScriptOptions {
    pub envdir: Option<Utf8PathBuf>,
    pub sessions: Option<Vec<String>>,
    pub pythons: Option<Vec<String>>,
    pub keywords: Option<String>,
    pub tags: Option<Vec<String>>,
    pub default_venv_backend: Option<String>,
    pub force_venv_backend: Option<String>,
    pub reuse_venv: Option<String>,
    pub stop_on_first_error: Option<bool>,
    pub error_on_missing_interpreters: Option<bool>,
    pub error_on_external_run: Option<bool>,
    pub download_python: Option<String>,
    pub report: Option<Utf8PathBuf>,
    pub verbose: Option<bool>,
    pub non_interactive: Option<bool>,
    pub install_only: Option<bool>,
    pub script_mode: Option<String>,
}

/// The CLI/environment-variable layer, produced by the front-end's parser.
/// `None` means the flag was not given and its environment variable is not
/// set.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub envdir: Option<Utf8PathBuf>,
    pub sessions: Option<Vec<String>>,
    pub pythons: Option<Vec<String>>,
    pub keywords: Option<String>,
    pub tags: Option<Vec<String>>,
    pub default_backend: Option<String>,
    pub force_backend: Option<String>,
    /// `--no-venv`: force the passthrough backend.
    pub no_venv: bool,
    pub reuse: Option<String>,
    /// `-R` / `--no-install`.
    pub no_install: bool,
    pub stop_on_first_error: Option<bool>,
    pub error_on_missing_interpreters: Option<bool>,
    pub error_on_external_run: Option<bool>,
    pub download_python: Option<String>,
    pub report: Option<Utf8PathBuf>,
    pub verbose: bool,
    pub non_interactive: bool,
    pub install_only: bool,
    pub script_mode: Option<String>,
    pub extra_pythons: Vec<String>,
    pub force_python: Option<String>,
    /// Trailing arguments after `--`.
    pub posargs: Vec<String>,
}

/// The immutable, fully merged option record the engine runs with.
#[derive(Clone, Debug)]
pub struct InvocationOptions {
    pub envdir: Utf8PathBuf,
    /// `None`: no selection anywhere, fall back to defaults. `Some(vec![])`:
    /// an explicitly empty selection (list and run nothing).
    pub sessions: Option<Vec<String>>,
    pub pythons: Vec<String>,
    pub keywords: Option<String>,
    pub tags: Vec<String>,
    pub default_backend: BackendKind,
    pub force_backend: Option<BackendKind>,
    pub reuse: ReusePolicy,
    pub no_install: bool,
    pub stop_on_first_error: bool,
    pub error_on_missing_interpreters: bool,
    pub error_on_external_run: bool,
    pub download_python: DownloadPython,
    pub report: Option<Utf8PathBuf>,
    pub verbose: bool,
    pub non_interactive: bool,
    pub install_only: bool,
    pub script_mode: ScriptMode,
    pub extra_pythons: Vec<String>,
    pub force_python: Option<String>,
    pub posargs: Vec<String>,
    /// The directory senv was invoked from; sessions start here.
    pub invoked_from: Utf8PathBuf,
    /// Grace period between the interrupt escalation steps.
    pub interrupt_grace: Duration,
}

impl InvocationOptions {
    /// Merges the CLI layer over the configuration's `[options]` table.
    ///
    /// CLI selection filters (`sessions`, `keywords`, ...) override their
    /// config counterparts entirely; the two never merge.
    pub fn merge(
        cli: CliOverrides,
        script: &ScriptOptions,
        invoked_from: Utf8PathBuf,
    ) -> Result<Self, InvalidOptionError> {
        let default_backend = first_parsed(
            "default-venv-backend",
            cli.default_backend.as_deref(),
            script.default_venv_backend.as_deref(),
        )?
        .unwrap_or(BackendKind::Virtualenv);

        let mut force_backend: Option<BackendKind> = first_parsed(
            "force-venv-backend",
            cli.force_backend.as_deref(),
            script.force_venv_backend.as_deref(),
        )?;
        if cli.no_venv {
            force_backend = Some(BackendKind::None);
        }

        let reuse = first_parsed(
            "reuse-venv",
            cli.reuse.as_deref(),
            script.reuse_venv.as_deref(),
        )?
        .unwrap_or_default();

        let download_python = first_parsed(
            "download-python",
            cli.download_python.as_deref(),
            script.download_python.as_deref(),
        )?
        .unwrap_or_default();

        let script_mode = first_parsed(
            "script-mode",
            cli.script_mode.as_deref(),
            script.script_mode.as_deref(),
        )?
        .unwrap_or_default();

        let error_on_missing_interpreters = cli
            .error_on_missing_interpreters
            .or(script.error_on_missing_interpreters)
            // On CI a silently skipped session is a hole in coverage, so the
            // default flips to erroring.
            .unwrap_or_else(is_ci::cached);

        Ok(Self {
            envdir: cli
                .envdir
                .or_else(|| script.envdir.clone())
                .unwrap_or_else(|| Utf8PathBuf::from(".senv")),
            sessions: cli.sessions.or_else(|| script.sessions.clone()),
            pythons: cli
                .pythons
                .or_else(|| script.pythons.clone())
                .unwrap_or_default(),
            keywords: cli.keywords.or_else(|| script.keywords.clone()),
            tags: cli.tags.or_else(|| script.tags.clone()).unwrap_or_default(),
            default_backend,
            force_backend,
            reuse,
            no_install: cli.no_install,
            stop_on_first_error: cli
                .stop_on_first_error
                .or(script.stop_on_first_error)
                .unwrap_or(false),
            error_on_missing_interpreters,
            error_on_external_run: cli
                .error_on_external_run
                .or(script.error_on_external_run)
                .unwrap_or(false),
            download_python,
            report: cli.report.or_else(|| script.report.clone()),
            verbose: cli.verbose || script.verbose.unwrap_or(false),
            non_interactive: cli.non_interactive || script.non_interactive.unwrap_or(false),
            install_only: cli.install_only || script.install_only.unwrap_or(false),
            script_mode,
            extra_pythons: cli.extra_pythons,
            force_python: cli.force_python,
            posargs: cli.posargs,
            invoked_from,
            interrupt_grace: Duration::from_secs(3),
        })
    }

    /// The effective reuse policy for one session declaration.
    pub fn reuse_for(&self, decl_policy: Option<ReusePolicy>) -> ReusePolicy {
        if self.reuse.is_forcing() {
            self.reuse
        } else {
            decl_policy.unwrap_or(self.reuse)
        }
    }
}

fn first_parsed<T>(
    key: &str,
    cli: Option<&str>,
    script: Option<&str>,
) -> Result<Option<T>, InvalidOptionError>
where
    T: FromStr<Err = String>,
{
    let Some(raw) = cli.or(script) else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|message: String| InvalidOptionError::new(key, message))
}

/// The current working directory as a UTF-8 path.
pub fn current_dir_utf8() -> Utf8PathBuf {
    std::env::current_dir()
        .ok()
        .and_then(|dir| Utf8PathBuf::try_from(dir).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn merged(cli: CliOverrides, script: ScriptOptions) -> InvocationOptions {
        InvocationOptions::merge(cli, &script, Utf8PathBuf::from("/work")).expect("options merge")
    }

    #[test]
    fn cli_overrides_script_options() {
        let cli = CliOverrides {
            sessions: Some(vec!["lint".to_owned()]),
            reuse: Some("always".to_owned()),
            ..Default::default()
        };
        let script = ScriptOptions {
            sessions: Some(vec!["tests".to_owned(), "docs".to_owned()]),
            reuse_venv: Some("no".to_owned()),
            envdir: Some(Utf8PathBuf::from(".envs")),
            ..Default::default()
        };
        let options = merged(cli, script);
        // Selection overrides entirely; it does not merge.
        assert_eq!(options.sessions.as_deref(), Some(&["lint".to_owned()][..]));
        assert_eq!(options.reuse, ReusePolicy::Always);
        // Untouched options fall through to the script layer.
        assert_eq!(options.envdir, Utf8PathBuf::from(".envs"));
    }

    #[test]
    fn defaults_without_either_layer() {
        let options = merged(CliOverrides::default(), ScriptOptions::default());
        assert_eq!(options.envdir, Utf8PathBuf::from(".senv"));
        assert_eq!(options.sessions, None);
        assert_eq!(options.default_backend, BackendKind::Virtualenv);
        assert_eq!(options.reuse, ReusePolicy::No);
        assert_eq!(options.script_mode, ScriptMode::Reuse);
        assert!(!options.stop_on_first_error);
    }

    #[test]
    fn explicit_empty_selection_is_preserved() {
        let script = ScriptOptions {
            sessions: Some(vec![]),
            ..Default::default()
        };
        let options = merged(CliOverrides::default(), script);
        assert_eq!(options.sessions.as_deref(), Some(&[][..]));
    }

    #[test]
    fn bad_enum_value_names_the_key() {
        let cli = CliOverrides {
            reuse: Some("sometimes".to_owned()),
            ..Default::default()
        };
        let err = InvocationOptions::merge(cli, &ScriptOptions::default(), "/w".into())
            .unwrap_err();
        assert_eq!(err.key, "reuse-venv");
    }

    #[test]
    fn no_venv_forces_passthrough() {
        let cli = CliOverrides {
            no_venv: true,
            force_backend: Some("uv".to_owned()),
            ..Default::default()
        };
        let options = merged(cli, ScriptOptions::default());
        assert_eq!(options.force_backend, Some(BackendKind::None));
    }

    #[test]
    fn decl_reuse_beats_global_unless_forcing() {
        let options = merged(
            CliOverrides {
                reuse: Some("no".to_owned()),
                ..Default::default()
            },
            ScriptOptions::default(),
        );
        assert_eq!(options.reuse_for(Some(ReusePolicy::Yes)), ReusePolicy::Yes);
        assert_eq!(options.reuse_for(None), ReusePolicy::No);

        let forcing = merged(
            CliOverrides {
                reuse: Some("never".to_owned()),
                ..Default::default()
            },
            ScriptOptions::default(),
        );
        assert_eq!(
            forcing.reuse_for(Some(ReusePolicy::Yes)),
            ReusePolicy::Never
        );
    }
}
