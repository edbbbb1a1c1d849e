// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inline script metadata.
//!
//! A runnable script may start with a comment block of the form:
//!
//! ```text
//! # /// script
//! # requires-python = ">=3.11"
//! # dependencies = [
//! #   "requests<3",
//! #   "rich",
//! # ]
//! # ///
//! ```
//!
//! The body (with the comment prefixes stripped) is parsed as TOML. The
//! driver installs the listed dependencies into the session environment and
//! runs the script with the session interpreter.

use crate::{
    errors::{ScriptMetadataError, ScriptMetadataErrorKind},
    interpreter::InterpreterSpec,
};
use camino::Utf8Path;
use serde::Deserialize;

const BLOCK_OPEN: &str = "# /// script";
const BLOCK_CLOSE: &str = "# ///";

/// Parsed inline metadata of a runnable script.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ScriptMetadata {
    /// The script's interpreter requirement, e.g. `>=3.11`.
    #[serde(default)]
    pub requires_python: Option<String>,

    /// Requirement strings to install before running.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ScriptMetadata {
    /// Reads a script file and parses its metadata block. Returns the
    /// default (empty) metadata if the script has no block.
    pub fn load(script: &Utf8Path) -> Result<Self, ScriptMetadataError> {
        let contents = fs_err::read_to_string(script).map_err(|err| ScriptMetadataError {
            script: script.to_owned(),
            kind: ScriptMetadataErrorKind::Read(err.into()),
        })?;
        Self::parse(&contents).map_err(|kind| ScriptMetadataError {
            script: script.to_owned(),
            kind,
        })
    }

    /// Parses script contents.
    pub fn parse(contents: &str) -> Result<Self, ScriptMetadataErrorKind> {
        let mut lines = contents.lines();
        let has_block = lines.any(|line| line.trim_end() == BLOCK_OPEN);
        if !has_block {
            return Ok(Self::default());
        }

        let mut body = String::new();
        let mut closed = false;
        for line in lines {
            let line = line.trim_end();
            if line == BLOCK_CLOSE {
                closed = true;
                break;
            }
            // Everything inside the block must be a comment line; the block
            // ends implicitly at the first non-comment line otherwise.
            let Some(rest) = line.strip_prefix('#') else {
                break;
            };
            body.push_str(rest.strip_prefix(' ').unwrap_or(rest));
            body.push('\n');
        }
        if !closed {
            return Err(ScriptMetadataErrorKind::Unclosed);
        }

        toml::from_str(&body).map_err(ScriptMetadataErrorKind::Toml)
    }

    /// Checks `requires-python` against a session interpreter spec, when the
    /// spec names a concrete version. A spec without a version (e.g. a bare
    /// executable name) is not checked.
    pub fn check_requires_python(
        &self,
        python: &InterpreterSpec<'_>,
    ) -> Result<(), ScriptMetadataErrorKind> {
        let Some(requirement) = &self.requires_python else {
            return Ok(());
        };
        let Some((major, minor)) = python.version() else {
            return Ok(());
        };
        let Ok(req) = semver::VersionReq::parse(requirement) else {
            // Requirement grammars beyond what semver knows (arbitrary
            // specifier sets) are left to the installer to enforce.
            return Ok(());
        };
        let version = semver::Version::new(u64::from(major), u64::from(minor), 0);
        if req.matches(&version) {
            Ok(())
        } else {
            Err(ScriptMetadataErrorKind::RequiresPython {
                python: python.as_str().to_owned(),
                requirement: requirement.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_full_block() {
        let script = indoc! {r#"
            #!/usr/bin/env python3
            # /// script
            # requires-python = ">=3.11"
            # dependencies = [
            #   "requests<3",
            #   "rich",
            # ]
            # ///
            import requests
        "#};
        let meta = ScriptMetadata::parse(script).expect("valid metadata");
        assert_eq!(meta.requires_python.as_deref(), Some(">=3.11"));
        assert_eq!(meta.dependencies, ["requests<3", "rich"]);
    }

    #[test]
    fn no_block_is_empty_metadata() {
        let meta = ScriptMetadata::parse("import sys\n").expect("no block is fine");
        assert_eq!(meta, ScriptMetadata::default());
    }

    #[test]
    fn unclosed_block_is_rejected() {
        let script = indoc! {r#"
            # /// script
            # dependencies = ["rich"]
        "#};
        let err = ScriptMetadata::parse(script).unwrap_err();
        assert!(matches!(err, ScriptMetadataErrorKind::Unclosed));
    }

    #[test]
    fn bad_toml_is_rejected() {
        let script = indoc! {r#"
            # /// script
            # dependencies = not-a-list
            # ///
        "#};
        let err = ScriptMetadata::parse(script).unwrap_err();
        assert!(matches!(err, ScriptMetadataErrorKind::Toml(_)));
    }

    #[test]
    fn requires_python_check() {
        let meta = ScriptMetadata {
            requires_python: Some(">=3.11".to_owned()),
            dependencies: vec![],
        };
        assert!(
            meta.check_requires_python(&InterpreterSpec::new("3.12"))
                .is_ok()
        );
        assert!(
            meta.check_requires_python(&InterpreterSpec::new("3.10"))
                .is_err()
        );
        // Spec without a concrete version: not checked.
        assert!(
            meta.check_requires_python(&InterpreterSpec::new("jython"))
                .is_ok()
        );
    }
}
