// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping interpreter specs to concrete executables.
//!
//! A spec is what a session declaration writes in its `python` field: a bare
//! version (`3.12`), a version with a platform tag (`3.12-32`), an
//! implementation-qualified version (`pypy-3.10`), a full executable name
//! (`python3.12t`), or an absolute path.

use crate::errors::InterpreterNotFoundError;
use camino::{Utf8Path, Utf8PathBuf};
use std::path::PathBuf;

/// A parsed view of an interpreter spec.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InterpreterSpec<'a> {
    raw: &'a str,
}

impl<'a> InterpreterSpec<'a> {
    /// Wraps a raw spec string.
    pub fn new(raw: &'a str) -> Self {
        Self { raw }
    }

    /// The spec as written.
    pub fn as_str(&self) -> &'a str {
        self.raw
    }

    /// The `major.minor` version named by this spec, if it names one
    /// concretely (`3.12`, `3.12-32`, `cpython-3.12`, `pypy-3.10`,
    /// `python3.12`, `python3.12t`).
    pub fn version(&self) -> Option<(u32, u32)> {
        let mut s = self.raw;
        for prefix in ["cpython-", "pypy-", "pypy", "python"] {
            if let Some(rest) = s.strip_prefix(prefix) {
                s = rest;
                break;
            }
        }
        // Drop a windows arch tag (`-32`/`-64`) or a free-threading suffix.
        let s = s.split('-').next().unwrap_or(s);
        let s = s.strip_suffix('t').unwrap_or(s);

        let (major, minor) = s.split_once('.')?;
        Some((major.parse().ok()?, minor.parse().ok()?))
    }

    /// True if the spec names a Python 2 interpreter.
    pub fn is_python2(&self) -> bool {
        matches!(self.version(), Some((major, _)) if major < 3)
    }

    /// The executable names to try on the search path, most specific first.
    fn candidates(&self) -> Vec<String> {
        let raw = self.raw;

        // Absolute paths and explicit relative paths are taken verbatim.
        if Utf8Path::new(raw).is_absolute() || raw.contains('/') || raw.contains('\\') {
            return vec![raw.to_owned()];
        }

        let normalized = raw.strip_prefix("cpython-").unwrap_or(raw);

        // `pypy-3.10` is spelled `pypy3.10` on disk.
        if let Some(version) = normalized.strip_prefix("pypy-") {
            return vec![format!("pypy{version}"), "pypy3".to_owned()];
        }

        // A bare version like `3.12`, `3.12t`, or `3.12-32`.
        if normalized.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            let version = normalized.split('-').next().unwrap_or(normalized);
            cfg_if::cfg_if! {
                if #[cfg(windows)] {
                    // The windows installers register `python.exe` per
                    // version dir; the launcher-style names below are what
                    // lands on PATH.
                    return vec![format!("python{version}"), "python".to_owned()];
                } else {
                    return vec![format!("python{version}")];
                }
            }
        }

        // Anything else (`python3.12t`, `pypy3`, `jython`, ...) is already an
        // executable name.
        vec![normalized.to_owned()]
    }

    /// Resolves the spec against `search_path` (falling back to the process
    /// `PATH` when `None`).
    pub fn resolve(
        &self,
        search_path: Option<&str>,
    ) -> Result<Utf8PathBuf, InterpreterNotFoundError> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        for candidate in self.candidates() {
            let found = match search_path {
                Some(path) => which::which_in(&candidate, Some(path), &cwd),
                None => which::which(&candidate),
            };
            if let Ok(path) = found
                && let Ok(path) = Utf8PathBuf::try_from(path)
            {
                return Ok(path);
            }
        }
        Err(InterpreterNotFoundError {
            spec: self.raw.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("3.12", Some((3, 12)); "bare version")]
    #[test_case("3.12-32", Some((3, 12)); "windows arch tag")]
    #[test_case("3.13t", Some((3, 13)); "free threaded")]
    #[test_case("cpython-3.12", Some((3, 12)); "cpython prefix")]
    #[test_case("pypy-3.10", Some((3, 10)); "pypy dashed")]
    #[test_case("pypy3.10", Some((3, 10)); "pypy joined")]
    #[test_case("python3.12", Some((3, 12)); "executable name")]
    #[test_case("python3.12t", Some((3, 12)); "executable free threaded")]
    #[test_case("2.7", Some((2, 7)); "python two")]
    #[test_case("jython", None; "no version")]
    fn version_parsing(spec: &str, expected: Option<(u32, u32)>) {
        assert_eq!(InterpreterSpec::new(spec).version(), expected);
    }

    #[test]
    fn python2_detection() {
        assert!(InterpreterSpec::new("2.7").is_python2());
        assert!(!InterpreterSpec::new("3.12").is_python2());
        assert!(!InterpreterSpec::new("pypy3").is_python2());
    }

    #[cfg(unix)]
    #[test]
    fn candidate_shapes() {
        assert_eq!(InterpreterSpec::new("3.12").candidates(), ["python3.12"]);
        assert_eq!(
            InterpreterSpec::new("pypy-3.10").candidates(),
            ["pypy3.10", "pypy3"]
        );
        assert_eq!(
            InterpreterSpec::new("python3.12t").candidates(),
            ["python3.12t"]
        );
        assert_eq!(
            InterpreterSpec::new("/usr/bin/python3").candidates(),
            ["/usr/bin/python3"]
        );
    }

    #[test]
    fn resolve_missing_reports_spec() {
        let err = InterpreterSpec::new("99.99")
            .resolve(Some(""))
            .unwrap_err();
        assert_eq!(err.spec, "99.99");
    }
}
