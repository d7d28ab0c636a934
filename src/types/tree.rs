use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::oid::{ObjectKind, Oid, OID_RAWSZ};

/// file mode of a tree entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileMode {
    /// subtree (040000)
    Tree,
    /// regular file (100644)
    Blob,
    /// executable file (100755)
    BlobExecutable,
    /// symbolic link (120000)
    Link,
    /// submodule gitlink (160000)
    Commit,
}

impl FileMode {
    /// numeric mode as stored in trees
    pub fn raw(&self) -> u32 {
        match self {
            FileMode::Tree => 0o040000,
            FileMode::Blob => 0o100644,
            FileMode::BlobExecutable => 0o100755,
            FileMode::Link => 0o120000,
            FileMode::Commit => 0o160000,
        }
    }

    /// normalize a numeric mode, accepting legacy group-writable blobs
    pub fn from_raw(mode: u32) -> Option<Self> {
        match mode & 0o170000 {
            0o040000 => Some(FileMode::Tree),
            0o120000 => Some(FileMode::Link),
            0o160000 => Some(FileMode::Commit),
            0o100000 if mode & 0o111 != 0 => Some(FileMode::BlobExecutable),
            0o100000 => Some(FileMode::Blob),
            _ => None,
        }
    }

    /// parse the octal ascii mode of a tree record
    pub fn parse(octal: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(octal)
            .map_err(|_| Error::InvalidFileMode(String::from_utf8_lossy(octal).into_owned()))?;
        let raw = u32::from_str_radix(text, 8)
            .map_err(|_| Error::InvalidFileMode(text.to_string()))?;
        Self::from_raw(raw).ok_or_else(|| Error::InvalidFileMode(text.to_string()))
    }

    /// octal ascii form written into tree objects (trees without leading zero)
    pub fn to_octal(&self) -> String {
        format!("{:o}", self.raw())
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, FileMode::Tree)
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, FileMode::Blob | FileMode::BlobExecutable)
    }

    /// kind of object the entry points at
    pub fn object_kind(&self) -> ObjectKind {
        match self {
            FileMode::Tree => ObjectKind::Tree,
            FileMode::Commit => ObjectKind::Commit,
            FileMode::Blob | FileMode::BlobExecutable | FileMode::Link => ObjectKind::Blob,
        }
    }

    /// coarse kind used for typechange detection
    pub(crate) fn type_class(&self) -> u8 {
        match self {
            FileMode::Blob | FileMode::BlobExecutable => 0,
            FileMode::Link => 1,
            FileMode::Commit => 2,
            FileMode::Tree => 3,
        }
    }
}

/// a single entry in a tree
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub oid: Oid,
    pub mode: FileMode,
}

impl TreeEntry {
    pub fn new(name: impl Into<String>, oid: Oid, mode: FileMode) -> Self {
        Self {
            name: name.into(),
            oid,
            mode,
        }
    }

    /// kind of the pointee
    pub fn kind(&self) -> ObjectKind {
        self.mode.object_kind()
    }

    pub fn is_tree(&self) -> bool {
        self.mode.is_tree()
    }
}

/// compare two entry names the way git orders tree records:
/// a subtree name sorts as if it had a trailing '/'
pub fn entry_name_cmp(a: &str, a_is_tree: bool, b: &str, b_is_tree: bool) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let len = a.len().min(b.len());
    match a[..len].cmp(&b[..len]) {
        Ordering::Equal => {}
        other => return other,
    }
    let terminal = |name: &[u8], is_tree: bool| match name.get(len) {
        Some(c) => *c,
        None if is_tree => b'/',
        None => 0,
    };
    terminal(a, a_is_tree).cmp(&terminal(b, b_is_tree))
}

/// sort entries into canonical tree order
pub(crate) fn sort_entries(entries: &mut [TreeEntry]) {
    entries.sort_by(|a, b| entry_name_cmp(&a.name, a.is_tree(), &b.name, b.is_tree()));
}

/// an immutable directory listing loaded from (or written to) the object store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tree {
    id: Oid,
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// assemble a tree whose entries are already in canonical order
    pub(crate) fn from_sorted(id: Oid, entries: Vec<TreeEntry>) -> Self {
        Self { id, entries }
    }

    /// id of this tree
    pub fn id(&self) -> Oid {
        self.id
    }

    /// entries in canonical order
    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TreeEntry> {
        self.entries.iter()
    }

    /// number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// look up an entry by name (binary search)
    pub fn entry_by_name(&self, name: &str) -> Option<&TreeEntry> {
        // the name may belong to a blob or a subtree; each collates differently
        [false, true].iter().find_map(|&as_tree| {
            self.entries
                .binary_search_by(|e| entry_name_cmp(&e.name, e.is_tree(), name, as_tree))
                .ok()
                .map(|i| &self.entries[i])
        })
    }

    /// look up an entry by position
    pub fn entry_by_index(&self, idx: usize) -> Option<&TreeEntry> {
        self.entries.get(idx)
    }

    /// find the first entry pointing at `oid`
    ///
    /// this is a linear scan over every entry; avoid it in hot loops.
    pub fn entry_by_oid(&self, oid: &Oid) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.oid == *oid)
    }

    /// serialize entries into the raw tree object body
    pub fn serialize(entries: &[TreeEntry]) -> Vec<u8> {
        let mut out = Vec::with_capacity(entries.len() * 40);
        for entry in entries {
            out.extend_from_slice(entry.mode.to_octal().as_bytes());
            out.push(b' ');
            out.extend_from_slice(entry.name.as_bytes());
            out.push(0);
            out.extend_from_slice(entry.oid.as_bytes());
        }
        out
    }

    /// parse a raw tree object body
    pub fn parse(id: Oid, data: &[u8]) -> Result<Self> {
        let corrupt = |message: &str| Error::CorruptObject {
            oid: id,
            message: message.to_string(),
        };

        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let space = data[pos..]
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| corrupt("missing space after mode"))?;
            let mode = FileMode::parse(&data[pos..pos + space])?;
            pos += space + 1;

            let nul = data[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| corrupt("missing NUL after name"))?;
            let name = std::str::from_utf8(&data[pos..pos + nul])
                .map_err(|_| corrupt("entry name is not utf-8"))?
                .to_string();
            pos += nul + 1;

            if pos + OID_RAWSZ > data.len() {
                return Err(corrupt("truncated entry id"));
            }
            let oid = Oid::from_slice(&data[pos..pos + OID_RAWSZ])?;
            pos += OID_RAWSZ;

            entries.push(TreeEntry { name, oid, mode });
        }

        Ok(Self { id, entries })
    }
}

impl<'a> IntoIterator for &'a Tree {
    type Item = &'a TreeEntry;
    type IntoIter = std::slice::Iter<'a, TreeEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// validate a tree entry name
pub(crate) fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidEntryName("empty name".to_string()));
    }
    if name.contains('/') {
        return Err(Error::InvalidEntryName(format!(
            "name contains '/': {}",
            name
        )));
    }
    if name.contains('\0') {
        return Err(Error::InvalidEntryName(format!(
            "name contains null byte: {}",
            name
        )));
    }
    if name == "." || name == ".." || name.eq_ignore_ascii_case(".git") {
        return Err(Error::InvalidEntryName(format!("reserved name: {}", name)));
    }
    Ok(())
}
