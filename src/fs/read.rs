use std::fs::{self, File, Metadata};
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::error::{IoResultExt, Result};
use crate::oid::{ObjectHasher, ObjectKind, Oid};
use crate::types::FileMode;

/// file type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    /// devices, fifos, sockets: never tracked
    Other,
}

impl FileType {
    /// detect file type from metadata
    pub fn from_metadata(meta: &Metadata) -> Self {
        let ft = meta.file_type();
        if ft.is_file() {
            FileType::Regular
        } else if ft.is_dir() {
            FileType::Directory
        } else if ft.is_symlink() {
            FileType::Symlink
        } else {
            FileType::Other
        }
    }
}

/// metadata for a working tree entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub file_type: FileType,
    pub mode: u32,
    pub size: u64,
    pub mtime_secs: i64,
    pub mtime_nanos: u32,
}

impl FileMetadata {
    /// read metadata from path (does not follow symlinks)
    pub fn from_path(path: &Path) -> Result<Self> {
        let meta = fs::symlink_metadata(path).with_path(path)?;
        Ok(Self::from_std_metadata(&meta))
    }

    /// create from std::fs::Metadata
    pub fn from_std_metadata(meta: &Metadata) -> Self {
        Self {
            file_type: FileType::from_metadata(meta),
            mode: meta.mode(),
            size: meta.len(),
            mtime_secs: meta.mtime(),
            mtime_nanos: meta.mtime_nsec() as u32,
        }
    }

    /// tree mode this entry would be staged with
    ///
    /// a directory containing `.git` is a submodule; plain directories and
    /// special files have no blob mode.
    pub fn tree_mode(&self, path: &Path, honor_exec_bit: bool) -> Option<FileMode> {
        match self.file_type {
            FileType::Regular if honor_exec_bit && self.mode & 0o111 != 0 => {
                Some(FileMode::BlobExecutable)
            }
            FileType::Regular => Some(FileMode::Blob),
            FileType::Symlink => Some(FileMode::Link),
            FileType::Directory if path.join(".git").exists() => Some(FileMode::Commit),
            _ => None,
        }
    }
}

/// read symlink target as raw bytes (the content of a link blob)
pub fn read_symlink_target(path: &Path) -> Result<Vec<u8>> {
    let target = fs::read_link(path).with_path(path)?;
    Ok(target.as_os_str().as_bytes().to_vec())
}

/// content that would be stored as the blob for this working tree entry
pub fn read_blob_content(path: &Path, meta: &FileMetadata) -> Result<Vec<u8>> {
    match meta.file_type {
        FileType::Symlink => read_symlink_target(path),
        _ => fs::read(path).with_path(path),
    }
}

/// compute the blob id of a working tree file without storing it
pub fn hash_workdir_file(path: &Path, meta: &FileMetadata) -> Result<Oid> {
    if meta.file_type == FileType::Symlink {
        let target = read_symlink_target(path)?;
        return Ok(crate::oid::hash_object(ObjectKind::Blob, &target));
    }

    let mut file = File::open(path).with_path(path)?;
    let mut hasher = ObjectHasher::new(ObjectKind::Blob, meta.size);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).with_path(path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn test_tree_modes() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain");
        let exe = dir.path().join("exe");
        let link = dir.path().join("link");
        fs::write(&file, "x").unwrap();
        fs::write(&exe, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("plain", &link).unwrap();

        let mode = |p: &Path, honor| FileMetadata::from_path(p).unwrap().tree_mode(p, honor);
        assert_eq!(mode(&file, true), Some(FileMode::Blob));
        assert_eq!(mode(&exe, true), Some(FileMode::BlobExecutable));
        assert_eq!(mode(&exe, false), Some(FileMode::Blob));
        assert_eq!(mode(&link, true), Some(FileMode::Link));
        assert_eq!(mode(dir.path(), true), None);
    }

    #[test]
    fn test_hash_workdir_file_matches_object_hash() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("hello");
        fs::write(&file, "hello\n").unwrap();
        let meta = FileMetadata::from_path(&file).unwrap();
        assert_eq!(
            hash_workdir_file(&file, &meta).unwrap().to_hex(),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );

        let link = dir.path().join("link");
        std::os::unix::fs::symlink("hello", &link).unwrap();
        let meta = FileMetadata::from_path(&link).unwrap();
        assert_eq!(
            hash_workdir_file(&link, &meta).unwrap(),
            crate::oid::hash_object(ObjectKind::Blob, b"hello")
        );
    }
}
