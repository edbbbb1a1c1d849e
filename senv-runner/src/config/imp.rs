// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::decl::{RawSessionDecl, SessionDecl},
    errors::{ConfigLoadError, ConfigLoadErrorKind},
    options::ScriptOptions,
};
use camino::Utf8Path;
use serde::Deserialize;

/// The evaluated configuration: `needs-version`, the `[options]` table, and
/// the session declarations in declaration order.
#[derive(Debug)]
pub struct SenvConfig {
    /// The driver version requirement, if declared.
    pub needs_version: Option<String>,

    /// Script-level option assignments.
    pub options: ScriptOptions,

    /// Validated declarations, in declaration order.
    pub sessions: Vec<SessionDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    needs_version: Option<String>,
    #[serde(default)]
    options: ScriptOptions,
    #[serde(default, rename = "session")]
    sessions: Vec<RawSessionDecl>,
}

impl SenvConfig {
    /// Loads and validates a configuration file.
    pub fn from_file(config_file: &Utf8Path) -> Result<Self, ConfigLoadError> {
        let contents = fs_err::read_to_string(config_file).map_err(|err| {
            ConfigLoadError::new(config_file, ConfigLoadErrorKind::Io(err.into()))
        })?;
        let raw: RawConfig = toml::from_str(&contents).map_err(|err| {
            ConfigLoadError::new(config_file, ConfigLoadErrorKind::Parse(Box::new(err)))
        })?;

        let sessions = raw
            .sessions
            .into_iter()
            .map(|decl| {
                let name = decl.name.clone();
                decl.validate().map_err(|message| {
                    ConfigLoadError::new(
                        config_file,
                        ConfigLoadErrorKind::InvalidDecl {
                            session: name,
                            message,
                        },
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            needs_version: raw.needs_version,
            options: raw.options,
            sessions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use indoc::indoc;

    fn load(contents: &str) -> Result<SenvConfig, ConfigLoadError> {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("senv.toml");
        fs_err::write(&path, contents).expect("write config");
        SenvConfig::from_file(&path)
    }

    #[test]
    fn full_config_loads() {
        let config = load(indoc! {r#"
            needs-version = ">=0.3"

            [options]
            envdir = ".envs"
            sessions = ["tests"]

            [[session]]
            name = "tests"
            description = "Run the test suite"
            python = ["3.11", "3.12"]
            tags = ["ci"]

            [[session.parametrize]]
            arg = "django"
            values = ["4.2", "5.0"]

            [[session.steps]]
            install = ["pytest"]

            [[session.steps]]
            run = ["pytest", "{posargs}"]

            [[session]]
            name = "lint"
            default = false

            [[session.steps]]
            run = ["ruff", "check", "."]
        "#})
        .expect("config loads");

        assert_eq!(config.needs_version.as_deref(), Some(">=0.3"));
        assert_eq!(config.options.sessions.as_deref(), Some(&["tests".to_owned()][..]));
        assert_eq!(config.sessions.len(), 2);
        assert_eq!(config.sessions[0].name, "tests");
        assert_eq!(
            config.sessions[0].short_description(),
            Some("Run the test suite")
        );
        assert!(!config.sessions[1].default_selected);
    }

    #[test]
    fn declaration_order_is_preserved() {
        let config = load(indoc! {r#"
            [[session]]
            name = "c"
            [[session]]
            name = "a"
            [[session]]
            name = "b"
        "#})
        .expect("config loads");
        let names: Vec<_> = config.sessions.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn unknown_top_level_key_is_a_parse_error() {
        let err = load("nonsense = 1\n").unwrap_err();
        assert!(matches!(err.kind, ConfigLoadErrorKind::Parse(_)));
    }

    #[test]
    fn invalid_decl_names_the_session() {
        let err = load(indoc! {r#"
            [[session]]
            name = "broken"
            python = true
        "#})
        .unwrap_err();
        match err.kind {
            ConfigLoadErrorKind::InvalidDecl { session, .. } => assert_eq!(session, "broken"),
            other => panic!("expected InvalidDecl, got {other:?}"),
        }
    }
}
