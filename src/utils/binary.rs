//! Binary path resolution and validation utilities.
//!
//! This module handles resolving switch executables from shorthand names or
//! explicit paths, and validating that they exist and are executable.

use std::env;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Errors that can occur during binary resolution or validation
#[derive(Debug, thiserror::Error)]
pub enum BinaryError {
    #[error("Binary not found: {path}")]
    NotFound { path: String },

    #[error("Binary is not executable: {path}")]
    NotExecutable { path: String },

    #[error("Cannot determine home directory")]
    NoHomeDir,

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },
}

/// Get the user's home directory from the HOME environment variable
fn get_home_dir() -> Result<PathBuf, BinaryError> {
    env::var("HOME")
        .map(PathBuf::from)
        .map_err(|_| BinaryError::NoHomeDir)
}

/// Whether `path` is a regular file with any execute bit set
fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Look a shorthand name up in a list of directories, first match wins
pub fn find_in_dirs<I>(name: &str, dirs: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    dirs.into_iter()
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Resolve a binary path from a shorthand name or explicit path.
///
/// Resolution rules:
/// 1. If path contains `/` or starts with `~`: treat as explicit path
/// 2. Otherwise: search the directories in `PATH`
///
/// The `~` is expanded to the user's home directory.
///
/// # Examples
///
/// ```ignore
/// // Shorthand names
/// resolve_binary_path("simple_switch_grpc") -> /usr/local/bin/simple_switch_grpc
///
/// // Explicit paths (returned as-is with ~ expansion)
/// resolve_binary_path("~/behavioral-model/targets/simple_switch_grpc/simple_switch_grpc")
/// resolve_binary_path("/opt/bmv2/bin/simple_switch_grpc")
/// ```
pub fn resolve_binary_path(name_or_path: &str) -> Result<PathBuf, BinaryError> {
    if name_or_path.is_empty() {
        return Err(BinaryError::InvalidPath { path: name_or_path.to_string() });
    }

    if let Some(rest) = name_or_path.strip_prefix("~/") {
        Ok(get_home_dir()?.join(rest))
    } else if name_or_path == "~" {
        get_home_dir()
    } else if name_or_path.contains('/') {
        Ok(PathBuf::from(name_or_path))
    } else {
        let search_path = env::var_os("PATH").unwrap_or_default();
        find_in_dirs(name_or_path, env::split_paths(&search_path)).ok_or_else(|| {
            BinaryError::NotFound { path: name_or_path.to_string() }
        })
    }
}

/// Validate that a binary exists and is executable.
///
/// This is called before any switch is launched so that a typo in the
/// executable path fails before namespaces are created.
pub fn validate_binary(path: &Path) -> Result<(), BinaryError> {
    if !path.exists() {
        return Err(BinaryError::NotFound {
            path: path.display().to_string(),
        });
    }

    let metadata = path.metadata().map_err(|_| BinaryError::InvalidPath {
        path: path.display().to_string(),
    })?;

    // Check if file is executable (any execute bit set)
    let mode = metadata.permissions().mode();
    if !metadata.is_file() || mode & 0o111 == 0 {
        return Err(BinaryError::NotExecutable {
            path: path.display().to_string(),
        });
    }

    Ok(())
}

/// Validate a binary specified by name or path.
///
/// Combines resolution and validation in one step.
pub fn validate_binary_spec(name_or_path: &str) -> Result<PathBuf, BinaryError> {
    let resolved = resolve_binary_path(name_or_path)?;
    validate_binary(&resolved)?;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_file(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_resolve_explicit_tilde() {
        let result = resolve_binary_path("~/bmv2/simple_switch_grpc").unwrap();
        assert!(result.ends_with("bmv2/simple_switch_grpc"));
        assert!(!result.starts_with("~"));
    }

    #[test]
    fn test_resolve_explicit_absolute() {
        let result = resolve_binary_path("/opt/bmv2/simple_switch_grpc").unwrap();
        assert_eq!(result, PathBuf::from("/opt/bmv2/simple_switch_grpc"));
    }

    #[test]
    fn test_resolve_explicit_relative() {
        let result = resolve_binary_path("./build/simple_switch_grpc").unwrap();
        assert_eq!(result, PathBuf::from("./build/simple_switch_grpc"));
    }

    #[test]
    fn test_empty_name_is_invalid() {
        assert!(matches!(resolve_binary_path(""), Err(BinaryError::InvalidPath { .. })));
    }

    #[test]
    fn test_find_in_dirs_skips_non_executables() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        make_file(first.path(), "simple_switch_grpc", 0o644);
        let expected = make_file(second.path(), "simple_switch_grpc", 0o755);

        let found = find_in_dirs(
            "simple_switch_grpc",
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
        );
        assert_eq!(found, Some(expected));
    }

    #[test]
    fn test_find_in_dirs_missing() {
        let dir = TempDir::new().unwrap();
        assert_eq!(find_in_dirs("simple_switch_grpc", vec![dir.path().to_path_buf()]), None);
    }

    #[test]
    fn test_validate_binary() {
        let dir = TempDir::new().unwrap();
        let exe = make_file(dir.path(), "switch", 0o755);
        let plain = make_file(dir.path(), "notes", 0o644);

        assert!(validate_binary(&exe).is_ok());
        assert!(matches!(validate_binary(&plain), Err(BinaryError::NotExecutable { .. })));
        assert!(matches!(
            validate_binary(&dir.path().join("missing")),
            Err(BinaryError::NotFound { .. })
        ));
        // A directory is not a binary even though it has execute bits
        assert!(matches!(validate_binary(dir.path()), Err(BinaryError::NotExecutable { .. })));
    }
}
