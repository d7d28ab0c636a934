//! staging snapshot: path -> (blob id, mode, stat data)
//!
//! persisted as CBOR, zstd compressed, at `<gitdir>/twig-index`. callers
//! that write it hold the repository lock.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fs::{write_atomic, FileMetadata};
use crate::object::{write_blob_from_path, TreeWalkResult, WalkMode};
use crate::oid::Oid;
use crate::repo::Repo;
use crate::types::{validate_entry_name, FileMode, Tree};

const INDEX_VERSION: u32 = 1;

/// one staged path
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub oid: Oid,
    pub mode: FileMode,
    pub size: u64,
    pub mtime_secs: i64,
    pub mtime_nanos: u32,
}

impl IndexEntry {
    /// an entry with no stat data; the working file is always rehashed
    pub fn new(oid: Oid, mode: FileMode) -> Self {
        Self {
            oid,
            mode,
            size: 0,
            mtime_secs: 0,
            mtime_nanos: 0,
        }
    }

    pub fn with_stat(oid: Oid, mode: FileMode, meta: &FileMetadata) -> Self {
        Self {
            oid,
            mode,
            size: meta.size,
            mtime_secs: meta.mtime_secs,
            mtime_nanos: meta.mtime_nanos,
        }
    }
}

/// on-disk envelope; `saved_at` is the write time as (secs, nanos)
#[derive(Deserialize)]
struct IndexFile {
    version: u32,
    saved_at: (i64, u32),
    entries: BTreeMap<String, IndexEntry>,
}

#[derive(Serialize)]
struct IndexFileRef<'a> {
    version: u32,
    saved_at: (i64, u32),
    entries: &'a BTreeMap<String, IndexEntry>,
}

/// the staging area
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Index {
    entries: BTreeMap<String, IndexEntry>,
    /// write time of the file this was loaded from
    saved_at: Option<(i64, u32)>,
}

impl Index {
    /// load the repository index; a missing file is an empty index
    pub fn load(repo: &Repo) -> Result<Self> {
        let path = repo.index_path();
        let compressed = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::Io { path, source: e }),
        };

        let cbor = zstd::decode_all(&compressed[..]).map_err(|e| Error::Io {
            path: path.clone(),
            source: e,
        })?;
        let file: IndexFile = ciborium::from_reader(&cbor[..])?;
        if file.version != INDEX_VERSION {
            return Err(Error::CorruptObjectMessage(format!(
                "unsupported index version {}",
                file.version
            )));
        }

        tracing::trace!(entries = file.entries.len(), "loaded index");
        Ok(Self {
            entries: file.entries,
            saved_at: Some(file.saved_at),
        })
    }

    /// write the index back to the repository
    pub fn save(&mut self, repo: &Repo) -> Result<()> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| (d.as_secs() as i64, d.subsec_nanos()))
            .unwrap_or((0, 0));

        let file = IndexFileRef {
            version: INDEX_VERSION,
            saved_at: now,
            entries: &self.entries,
        };
        let mut cbor = Vec::new();
        ciborium::into_writer(&file, &mut cbor)?;

        let compressed = zstd::encode_all(&cbor[..], 3).map_err(|e| Error::Io {
            path: PathBuf::from("<zstd>"),
            source: e,
        })?;
        write_atomic(&repo.tmp_path(), &repo.index_path(), &compressed)?;
        self.saved_at = Some(now);

        tracing::debug!(entries = self.entries.len(), "saved index");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// is anything staged below directory `dir`
    pub fn has_entries_under(&self, dir: &str) -> bool {
        let prefix = format!("{}/", dir);
        self.entries
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(p, _)| p.starts_with(&prefix))
    }

    /// entries in path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexEntry)> {
        self.entries.iter().map(|(p, e)| (p.as_str(), e))
    }

    /// stage an entry without stat data
    pub fn add_entry(&mut self, path: &str, oid: Oid, mode: FileMode) {
        self.insert(path, IndexEntry::new(oid, mode));
    }

    pub fn insert(&mut self, path: &str, entry: IndexEntry) {
        // a file replaces any directory of the same name, and vice versa
        let dir_prefix = format!("{}/", path);
        self.entries.retain(|p, _| !p.starts_with(&dir_prefix));
        let mut parent = path;
        while let Some((dir, _)) = parent.rsplit_once('/') {
            self.entries.remove(dir);
            parent = dir;
        }
        self.entries.insert(path.to_string(), entry);
    }

    /// hash a working tree file into the object store and stage it
    pub fn add_path(&mut self, repo: &Repo, path: &str) -> Result<&IndexEntry> {
        validate_path(path)?;
        let workdir = repo.require_workdir()?;
        let full = workdir.join(path);
        let meta = FileMetadata::from_path(&full)?;
        let mode = meta
            .tree_mode(&full, repo.config().core.file_mode)
            .filter(|m| *m != FileMode::Commit)
            .ok_or_else(|| Error::InvalidPath(format!("{} is not a file", path)))?;

        let oid = write_blob_from_path(repo, &full, &meta)?;
        self.insert(path, IndexEntry::with_stat(oid, mode, &meta));
        tracing::trace!(path, oid = %oid, "staged");
        Ok(&self.entries[path])
    }

    /// unstage a path; returns the removed entry
    pub fn remove(&mut self, path: &str) -> Option<IndexEntry> {
        self.entries.remove(path)
    }

    /// replace the contents with the flattened entries of a tree
    pub fn read_tree(&mut self, repo: &Repo, tree: &Tree) -> Result<()> {
        let mut entries = BTreeMap::new();
        tree.walk(repo, WalkMode::PreOrder, |root, entry| {
            if !entry.is_tree() {
                entries.insert(
                    format!("{}{}", root, entry.name),
                    IndexEntry::new(entry.oid, entry.mode),
                );
            }
            TreeWalkResult::Continue
        })?;
        self.entries = entries;
        Ok(())
    }

    /// record fresh stat data for a path after its working file was written
    pub fn update_stat(&mut self, path: &str, meta: &FileMetadata) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.size = meta.size;
            entry.mtime_secs = meta.mtime_secs;
            entry.mtime_nanos = meta.mtime_nanos;
        }
    }

    /// whether stat data alone proves the working file unchanged
    ///
    /// files touched in the same instant the index was written are racy and
    /// never trusted.
    pub fn is_stat_clean(&self, entry: &IndexEntry, meta: &FileMetadata) -> bool {
        if entry.mtime_secs == 0 && entry.mtime_nanos == 0 {
            return false;
        }
        let Some(saved_at) = self.saved_at else {
            return false;
        };
        entry.size == meta.size
            && entry.mtime_secs == meta.mtime_secs
            && entry.mtime_nanos == meta.mtime_nanos
            && (meta.mtime_secs, meta.mtime_nanos) < saved_at
    }

    /// paths equal to `path` ignoring ASCII case
    pub fn find_case_insensitive(&self, path: &str) -> Vec<&str> {
        self.entries
            .keys()
            .filter(|p| p.eq_ignore_ascii_case(path))
            .map(|p| p.as_str())
            .collect()
    }
}

/// validate a slash-separated repository-relative path
pub(crate) fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.split('/').any(|c| validate_entry_name(c).is_err()) {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(())
}
