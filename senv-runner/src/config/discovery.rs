// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Locating `senv.toml`.

use crate::errors::{ConfigLoadError, ConfigLoadErrorKind};
use camino::{Utf8Path, Utf8PathBuf};

/// The canonical configuration file name.
pub const CONFIG_FILE_NAME: &str = "senv.toml";

/// Finds the configuration file: the explicit path if one was given,
/// otherwise the nearest `senv.toml` scanning upward from `start_dir`.
pub fn discover_config_file(
    explicit: Option<&Utf8Path>,
    start_dir: &Utf8Path,
) -> Result<Utf8PathBuf, ConfigLoadError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_owned());
        }
        return Err(ConfigLoadError::new(path, ConfigLoadErrorKind::NotFound));
    }

    let mut dir = start_dir;
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => {
                return Err(ConfigLoadError::new(
                    start_dir.join(CONFIG_FILE_NAME),
                    ConfigLoadErrorKind::NotFound,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;

    #[test]
    fn finds_config_in_parent() {
        let root = tempdir().expect("tempdir");
        let nested = root.path().join("a/b");
        fs_err::create_dir_all(&nested).expect("mkdir");
        fs_err::write(root.path().join(CONFIG_FILE_NAME), "").expect("write");

        let found = discover_config_file(None, &nested).expect("found");
        assert_eq!(found, root.path().join(CONFIG_FILE_NAME));
    }

    #[test]
    fn missing_config_is_not_found() {
        let root = tempdir().expect("tempdir");
        let err = discover_config_file(None, root.path()).unwrap_err();
        assert!(matches!(err.kind, ConfigLoadErrorKind::NotFound));
    }

    #[test]
    fn explicit_path_must_exist() {
        let root = tempdir().expect("tempdir");
        let missing = root.path().join("elsewhere.toml");
        let err = discover_config_file(Some(&missing), root.path()).unwrap_err();
        assert!(matches!(err.kind, ConfigLoadErrorKind::NotFound));
        assert_eq!(err.config_file, missing);
    }
}
