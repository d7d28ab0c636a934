use crate::oid::Oid;
use crate::types::FileMode;

/// kind of change a delta records
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delta {
    Unmodified,
    Added,
    Deleted,
    Modified,
    Renamed,
    Typechange,
    Untracked,
    Ignored,
}

impl std::fmt::Display for Delta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = match self {
            Delta::Unmodified => ' ',
            Delta::Added => 'A',
            Delta::Deleted => 'D',
            Delta::Modified => 'M',
            Delta::Renamed => 'R',
            Delta::Typechange => 'T',
            Delta::Untracked => '?',
            Delta::Ignored => '!',
        };
        write!(f, "{}", c)
    }
}

/// one side of a delta; `oid` is zero and `mode` is `None` when the side is absent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffFile {
    pub path: String,
    pub oid: Oid,
    pub mode: Option<FileMode>,
}

impl DiffFile {
    pub fn new(path: impl Into<String>, oid: Oid, mode: FileMode) -> Self {
        Self {
            path: path.into(),
            oid,
            mode: Some(mode),
        }
    }

    /// a side that does not exist
    pub fn absent(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            oid: Oid::ZERO,
            mode: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.mode.is_some()
    }
}

/// a single file-level difference between two snapshots
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffDelta {
    pub status: Delta,
    pub old_file: DiffFile,
    pub new_file: DiffFile,
}

impl DiffDelta {
    /// path the delta is reported under (new side, falling back to old)
    pub fn path(&self) -> &str {
        if self.new_file.exists() || !self.old_file.exists() {
            &self.new_file.path
        } else {
            &self.old_file.path
        }
    }
}
