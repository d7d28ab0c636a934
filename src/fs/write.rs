use std::ffi::OsStr;
use std::fs::{self, File, Permissions};
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;

use crate::error::{IoResultExt, Result};

/// write a regular file, replacing whatever is at `path`
pub fn write_file(path: &Path, content: &[u8], executable: bool) -> Result<()> {
    remove_existing(path)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }

    {
        let mut file = File::create(path).with_path(path)?;
        file.write_all(content).with_path(path)?;
    }

    let mode = if executable { 0o755 } else { 0o644 };
    fs::set_permissions(path, Permissions::from_mode(mode)).with_path(path)?;
    Ok(())
}

/// create a symlink whose target is the raw bytes of a link blob
pub fn create_symlink(path: &Path, target: &[u8]) -> Result<()> {
    remove_existing(path)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }

    symlink(OsStr::from_bytes(target), path).with_path(path)?;
    Ok(())
}

/// remove a file and then any parent directories left empty, up to `stop_at`
pub fn remove_file_and_empty_parents(path: &Path, stop_at: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_path(path),
    }

    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == stop_at || !d.starts_with(stop_at) {
            break;
        }
        // fails (and stops) once the directory still has entries
        if fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
    Ok(())
}

/// remove a file, symlink or directory tree sitting where a file must go
fn remove_existing(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).with_path(path),
        Ok(_) => fs::remove_file(path).with_path(path),
        Err(_) => Ok(()),
    }
}

/// atomic write: temp file in `tmp_dir` -> fsync -> rename -> fsync parent
pub fn write_atomic(tmp_dir: &Path, path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or(tmp_dir);
    fs::create_dir_all(parent).with_path(parent)?;

    let tmp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        tmp_file.write_all(content).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }
    fs::rename(&tmp_path, path).with_path(path)?;
    fsync_dir(parent)
}

/// fsync a directory (for durable renames)
pub fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).with_path(path)?;
    dir.sync_all().with_path(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::tempdir;

    #[test]
    fn test_write_file_sets_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/run.sh");
        write_file(&path, b"#!/bin/sh\n", true).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"#!/bin/sh\n");
        assert_eq!(fs::metadata(&path).unwrap().mode() & 0o777, 0o755);

        write_file(&path, b"plain", false).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().mode() & 0o777, 0o644);
    }

    #[test]
    fn test_write_file_replaces_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("thing");
        fs::create_dir_all(path.join("inner")).unwrap();
        write_file(&path, b"now a file", false).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn test_create_symlink_replaces_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("link");
        fs::write(&path, "old").unwrap();
        create_symlink(&path, b"target").unwrap();
        assert_eq!(fs::read_link(&path).unwrap().to_str(), Some("target"));
    }

    #[test]
    fn test_write_atomic_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("tmp");
        fs::create_dir(&tmp).unwrap();
        let target = dir.path().join("refs/heads/main");

        write_atomic(&tmp, &target, b"abc\n").unwrap();
        write_atomic(&tmp, &target, b"def\n").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"def\n");
        assert_eq!(fs::read_dir(&tmp).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_file_and_empty_parents() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/keep"), "").unwrap();
        fs::write(root.join("a/b/gone"), "").unwrap();

        remove_file_and_empty_parents(&root.join("a/b/gone"), root).unwrap();
        assert!(!root.join("a/b").exists());
        assert!(root.join("a/keep").exists());

        // missing files are fine
        remove_file_and_empty_parents(&root.join("nope"), root).unwrap();
    }
}
