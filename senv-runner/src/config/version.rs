// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `needs-version` assertion.

use crate::errors::{ConfigLoadError, ConfigLoadErrorKind, VersionMismatchError};
use camino::Utf8Path;
use semver::{Version, VersionReq};

/// The running driver's version.
pub fn current_version() -> Version {
    env!("CARGO_PKG_VERSION")
        .parse()
        .expect("CARGO_PKG_VERSION is valid semver")
}

/// Checks a `needs-version` requirement against a driver version. Fails
/// fast, before any session is considered.
pub fn check_needs_version(
    config_file: &Utf8Path,
    requirement: &str,
    current: &Version,
) -> Result<(), CheckError> {
    let req = VersionReq::parse(requirement).map_err(|err| {
        CheckError::Invalid(ConfigLoadError::new(
            config_file,
            ConfigLoadErrorKind::InvalidDecl {
                session: "needs-version".to_owned(),
                message: format!("`{requirement}` is not a valid version requirement: {err}"),
            },
        ))
    })?;
    if req.matches(current) {
        Ok(())
    } else {
        Err(CheckError::Mismatch(VersionMismatchError {
            required: requirement.to_owned(),
            current: current.clone(),
        }))
    }
}

/// The two ways the version check can fail.
#[derive(Debug)]
pub enum CheckError {
    /// The requirement string itself does not parse.
    Invalid(ConfigLoadError),
    /// The requirement parses but this driver does not satisfy it.
    Mismatch(VersionMismatchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satisfied_requirement_passes() {
        let current = Version::new(0, 3, 0);
        assert!(check_needs_version("senv.toml".into(), ">=0.3", &current).is_ok());
        assert!(check_needs_version("senv.toml".into(), ">=0.1, <1.0", &current).is_ok());
    }

    #[test]
    fn unsatisfied_requirement_is_a_mismatch() {
        let current = Version::new(0, 3, 0);
        match check_needs_version("senv.toml".into(), ">=1.0", &current) {
            Err(CheckError::Mismatch(err)) => {
                assert_eq!(err.required, ">=1.0");
                assert_eq!(err.current, current);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn malformed_requirement_is_invalid() {
        let current = Version::new(0, 3, 0);
        assert!(matches!(
            check_needs_version("senv.toml".into(), "not a requirement", &current),
            Err(CheckError::Invalid(_))
        ));
    }
}
