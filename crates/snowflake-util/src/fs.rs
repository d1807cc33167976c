//! Filesystem utilities for the snowflake build engine.

use std::path::{Path, PathBuf};

use crate::error::UtilError;

/// Create a directory and all parent directories if they do not exist.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<(), UtilError> {
    std::fs::create_dir_all(path).map_err(|source| UtilError::io(path, source))
}

/// Remove a directory and all its contents. No error if the directory is absent.
///
/// Symbolic links inside the tree are removed, not followed, so nothing
/// outside the tree is ever deleted.
///
/// # Errors
/// Returns an error if the directory exists but cannot be removed.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<(), UtilError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(UtilError::io(path, source)),
    }
}

/// Mark a file executable (mode 0755).
///
/// # Errors
/// Returns an error if the file's permissions cannot be read or changed.
pub fn set_executable(path: &Path) -> Result<(), UtilError> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(path)
        .map_err(|source| UtilError::io(path, source))?
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).map_err(|source| UtilError::io(path, source))
}

/// Whether the file at `path` has any execute bit set.
///
/// # Errors
/// Returns an error if the file's metadata cannot be read.
pub fn is_executable(path: &Path) -> Result<bool, UtilError> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::symlink_metadata(path).map_err(|source| UtilError::io(path, source))?;
    Ok(meta.permissions().mode() & 0o111 != 0)
}

/// List the entries of a directory sorted by file name.
///
/// Returns `(name, path)` pairs. Sorting makes directory walks stable
/// across filesystems and creation order.
///
/// # Errors
/// Returns an error if the directory cannot be read.
pub fn sorted_entries(dir: &Path) -> Result<Vec<(String, PathBuf)>, UtilError> {
    let entries = std::fs::read_dir(dir).map_err(|source| UtilError::io(dir, source))?;

    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| UtilError::io(dir, source))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        out.push((name, entry.path()));
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn ensure_dir_creates_nested() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b").join("c");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn ensure_dir_existing_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        ensure_dir(tmp.path()).unwrap(); // already exists
    }

    #[test]
    fn remove_dir_all_if_exists_removes() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("target");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("file.txt"), b"x").unwrap();

        remove_dir_all_if_exists(&dir).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn remove_dir_all_if_exists_absent_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nonexistent");
        remove_dir_all_if_exists(&dir).unwrap();
    }

    #[test]
    fn remove_dir_all_if_exists_does_not_follow_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("keep.txt"), b"keep").unwrap();

        let dir = tmp.path().join("target");
        fs::create_dir_all(&dir).unwrap();
        std::os::unix::fs::symlink(&outside, dir.join("link")).unwrap();

        remove_dir_all_if_exists(&dir).unwrap();
        assert!(!dir.exists());
        // The link target survives.
        assert!(outside.join("keep.txt").exists());
    }

    #[test]
    fn set_executable_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("script");
        fs::write(&file, b"#!/bin/sh\n").unwrap();

        set_executable(&file).unwrap();
        let mode = fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(is_executable(&file).unwrap());
    }

    #[test]
    fn is_executable_false_for_plain_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("data");
        fs::write(&file, b"x").unwrap();
        assert!(!is_executable(&file).unwrap());
    }

    #[test]
    fn sorted_entries_sorts_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("b.txt"), b"").unwrap();
        fs::write(tmp.path().join("a.txt"), b"").unwrap();
        fs::create_dir(tmp.path().join("c")).unwrap();

        let entries = sorted_entries(tmp.path()).unwrap();
        let names: Vec<_> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c"]);
    }

    #[test]
    fn sorted_entries_missing_dir_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let result = sorted_entries(&tmp.path().join("nope"));
        assert!(result.is_err());
    }
}
