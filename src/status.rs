//! working tree status: HEAD vs index vs working tree, per path
//!
//! two diffs are computed (HEAD's tree to the index, the index to the
//! working tree) and folded into one [`Status`] bit set per path.

use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign, ControlFlow};

use crate::error::{Error, Result};
use crate::ignore::IgnoreRules;
use crate::index::{validate_path, Index};
use crate::object::{peel_to_commit, read_tree};
use crate::ops::diff::{diff_index_to_workdir, diff_tree_to_index, DiffOptions};
use crate::pathspec::Pathspec;
use crate::refs::head_oid;
use crate::repo::Repo;
use crate::types::{Delta, DiffDelta, Tree};

/// set of changes recorded for one path
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Status(u32);

impl Status {
    /// unchanged everywhere
    pub const CURRENT: Status = Status(0);
    pub const INDEX_NEW: Status = Status(1 << 0);
    pub const INDEX_MODIFIED: Status = Status(1 << 1);
    pub const INDEX_DELETED: Status = Status(1 << 2);
    pub const INDEX_RENAMED: Status = Status(1 << 3);
    pub const INDEX_TYPECHANGE: Status = Status(1 << 4);
    pub const WT_NEW: Status = Status(1 << 7);
    pub const WT_MODIFIED: Status = Status(1 << 8);
    pub const WT_DELETED: Status = Status(1 << 9);
    pub const WT_TYPECHANGE: Status = Status(1 << 10);
    pub const WT_RENAMED: Status = Status(1 << 11);
    pub const IGNORED: Status = Status(1 << 14);

    const INDEX_MASK: u32 = 0x1f;
    const WT_MASK: u32 = 0x1f << 7;

    const NAMES: [(Status, &'static str); 11] = [
        (Status::INDEX_NEW, "INDEX_NEW"),
        (Status::INDEX_MODIFIED, "INDEX_MODIFIED"),
        (Status::INDEX_DELETED, "INDEX_DELETED"),
        (Status::INDEX_RENAMED, "INDEX_RENAMED"),
        (Status::INDEX_TYPECHANGE, "INDEX_TYPECHANGE"),
        (Status::WT_NEW, "WT_NEW"),
        (Status::WT_MODIFIED, "WT_MODIFIED"),
        (Status::WT_DELETED, "WT_DELETED"),
        (Status::WT_TYPECHANGE, "WT_TYPECHANGE"),
        (Status::WT_RENAMED, "WT_RENAMED"),
        (Status::IGNORED, "IGNORED"),
    ];

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_current(&self) -> bool {
        self.0 == 0
    }

    /// every bit of `other` is set in `self`
    pub fn contains(&self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_index_change(&self) -> bool {
        self.0 & Self::INDEX_MASK != 0
    }

    pub fn is_workdir_change(&self) -> bool {
        self.0 & Self::WT_MASK != 0
    }

    fn from_index_delta(delta: Delta) -> Self {
        match delta {
            Delta::Added => Status::INDEX_NEW,
            Delta::Deleted => Status::INDEX_DELETED,
            Delta::Modified => Status::INDEX_MODIFIED,
            Delta::Renamed => Status::INDEX_RENAMED,
            Delta::Typechange => Status::INDEX_TYPECHANGE,
            Delta::Unmodified | Delta::Untracked | Delta::Ignored => Status::CURRENT,
        }
    }

    fn from_workdir_delta(delta: Delta) -> Self {
        match delta {
            Delta::Untracked | Delta::Added => Status::WT_NEW,
            Delta::Deleted => Status::WT_DELETED,
            Delta::Modified => Status::WT_MODIFIED,
            Delta::Renamed => Status::WT_RENAMED,
            Delta::Typechange => Status::WT_TYPECHANGE,
            Delta::Ignored => Status::IGNORED,
            Delta::Unmodified => Status::CURRENT,
        }
    }
}

impl BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        Status(self.0 | rhs.0)
    }
}

impl BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Status) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_current() {
            return write!(f, "Status(CURRENT)");
        }
        let names: Vec<_> = Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Status({})", names.join(" | "))
    }
}

/// which comparisons a status run reports
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Show {
    /// one report per path, both comparisons merged
    #[default]
    IndexAndWorkdir,
    IndexOnly,
    WorkdirOnly,
    /// every index change, then every working tree change, never merged
    IndexThenWorkdir,
}

#[derive(Clone, Debug, Default)]
pub struct StatusOptions {
    pub show: Show,
    pub include_untracked: bool,
    pub include_ignored: bool,
    pub include_unmodified: bool,
    pub exclude_submodules: bool,
    /// when false an untracked directory is reported once, as `dir/`
    pub recurse_untracked_dirs: bool,
    pub recurse_ignored_dirs: bool,
    /// treat pathspecs as literal paths
    pub disable_pathspec_match: bool,
    pub renames_head_to_index: bool,
    pub renames_index_to_workdir: bool,
    pub sort_case_sensitively: bool,
    pub sort_case_insensitively: bool,
    pub pathspec: Vec<String>,
}

impl StatusOptions {
    /// what [`foreach`] reports
    pub fn with_untracked_and_ignored() -> Self {
        Self {
            include_untracked: true,
            include_ignored: true,
            recurse_untracked_dirs: true,
            ..Default::default()
        }
    }

    fn case_insensitive(&self, repo: &Repo) -> bool {
        self.sort_case_insensitively || (!self.sort_case_sensitively && repo.ignore_case())
    }
}

/// status of one path and the deltas it was derived from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    pub status: Status,
    pub head_to_index: Option<DiffDelta>,
    pub index_to_workdir: Option<DiffDelta>,
}

/// a materialized, ordered status run
#[derive(Clone, Debug, Default)]
pub struct StatusList {
    entries: Vec<StatusEntry>,
}

impl StatusList {
    pub fn new(repo: &Repo, opts: &StatusOptions) -> Result<Self> {
        let workdir = repo.require_workdir()?;
        tracing::debug!(workdir = %workdir.display(), show = ?opts.show, "computing status");

        let index = Index::load(repo)?;
        let head_tree = head_tree(repo)?;
        let case_insensitive = opts.case_insensitive(repo);
        let pathspec = Pathspec::new(
            &opts.pathspec,
            opts.disable_pathspec_match,
            case_insensitive,
        )?;

        let base = DiffOptions {
            pathspec,
            include_unmodified: opts.include_unmodified,
            include_untracked: opts.include_untracked,
            include_ignored: opts.include_ignored,
            recurse_untracked_dirs: opts.recurse_untracked_dirs,
            recurse_ignored_dirs: opts.recurse_ignored_dirs,
            exclude_submodules: opts.exclude_submodules,
            detect_renames: false,
            sort_case_insensitively: case_insensitive,
        };

        let staged = if opts.show == Show::WorkdirOnly {
            Vec::new()
        } else {
            let diff_opts = DiffOptions {
                detect_renames: opts.renames_head_to_index,
                ..base.clone()
            };
            diff_tree_to_index(repo, head_tree.as_ref(), &index, &diff_opts)?
        };

        let unstaged = if opts.show == Show::IndexOnly {
            Vec::new()
        } else {
            let mut ignore = IgnoreRules::new(repo)?;
            let diff_opts = DiffOptions {
                detect_renames: opts.renames_index_to_workdir,
                ..base
            };
            diff_index_to_workdir(repo, &index, &mut ignore, &diff_opts)?
        };

        let entries = match opts.show {
            Show::IndexAndWorkdir => merge(staged, unstaged, case_insensitive),
            Show::IndexOnly | Show::WorkdirOnly | Show::IndexThenWorkdir => staged
                .into_iter()
                .map(index_entry)
                .chain(unstaged.into_iter().map(workdir_entry))
                .collect(),
        };
        Ok(Self { entries })
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn by_index(&self, idx: usize) -> Option<&StatusEntry> {
        self.entries.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StatusEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a StatusList {
    type Item = &'a StatusEntry;
    type IntoIter = std::slice::Iter<'a, StatusEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn index_entry(delta: DiffDelta) -> StatusEntry {
    StatusEntry {
        path: delta.path().to_string(),
        status: Status::from_index_delta(delta.status),
        head_to_index: Some(delta),
        index_to_workdir: None,
    }
}

fn workdir_entry(delta: DiffDelta) -> StatusEntry {
    StatusEntry {
        path: delta.path().to_string(),
        status: Status::from_workdir_delta(delta.status),
        head_to_index: None,
        index_to_workdir: Some(delta),
    }
}

/// fold both diffs into one entry per path, keeping sort order
fn merge(staged: Vec<DiffDelta>, unstaged: Vec<DiffDelta>, case_insensitive: bool) -> Vec<StatusEntry> {
    let mut entries: Vec<StatusEntry> = staged.into_iter().map(index_entry).collect();
    let mut by_path: HashMap<String, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.path.clone(), i))
        .collect();

    for delta in unstaged {
        match by_path.get(delta.path()) {
            Some(&i) => {
                entries[i].status |= Status::from_workdir_delta(delta.status);
                entries[i].index_to_workdir = Some(delta);
            }
            None => {
                let entry = workdir_entry(delta);
                by_path.insert(entry.path.clone(), entries.len());
                entries.push(entry);
            }
        }
    }

    if case_insensitive {
        entries.sort_by(|a, b| {
            a.path
                .to_ascii_lowercase()
                .cmp(&b.path.to_ascii_lowercase())
                .then_with(|| a.path.cmp(&b.path))
        });
    } else {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
    }
    entries
}

/// tree of the commit HEAD resolves to, `None` on an unborn branch
fn head_tree(repo: &Repo) -> Result<Option<Tree>> {
    let Some(oid) = head_oid(repo)? else {
        return Ok(None);
    };
    let (_, commit) = peel_to_commit(repo, &oid)?;
    Ok(Some(read_tree(repo, &commit.tree)?))
}

/// report every changed path, untracked and ignored files included
pub fn foreach<F>(repo: &Repo, callback: F) -> Result<()>
where
    F: FnMut(&str, Status) -> ControlFlow<()>,
{
    foreach_ext(repo, &StatusOptions::with_untracked_and_ignored(), callback)
}

/// report paths in order; a callback returning `Break` stops the run with
/// `Error::UserCancelled`
pub fn foreach_ext<F>(repo: &Repo, opts: &StatusOptions, mut callback: F) -> Result<()>
where
    F: FnMut(&str, Status) -> ControlFlow<()>,
{
    let list = StatusList::new(repo, opts)?;
    for entry in &list {
        if callback(&entry.path, entry.status).is_break() {
            tracing::debug!(path = %entry.path, "status callback aborted");
            return Err(Error::UserCancelled);
        }
    }
    Ok(())
}

/// status of a single file
pub fn file(repo: &Repo, path: &str) -> Result<Status> {
    validate_path(path)?;
    let workdir = repo.require_workdir()?;
    let full = workdir.join(path);
    if full.symlink_metadata().is_ok_and(|m| m.is_dir()) {
        return Err(Error::InvalidPath(format!("{} is a directory", path)));
    }

    let ignore_case = repo.ignore_case();
    if ignore_case {
        let index = Index::load(repo)?;
        let found = index.find_case_insensitive(path);
        if found.len() > 1 {
            return Err(Error::Ambiguous(format!(
                "{} matches {} index entries",
                path,
                found.len()
            )));
        }
    }

    let opts = StatusOptions {
        include_untracked: true,
        include_ignored: true,
        include_unmodified: true,
        recurse_untracked_dirs: true,
        recurse_ignored_dirs: true,
        disable_pathspec_match: true,
        pathspec: vec![path.to_string()],
        ..Default::default()
    };
    let list = StatusList::new(repo, &opts)?;
    let same = |p: &str| {
        if ignore_case {
            p.eq_ignore_ascii_case(path)
        } else {
            p == path
        }
    };
    if let Some(entry) = list.iter().find(|e| same(&e.path)) {
        return Ok(entry.status);
    }

    if should_ignore(repo, path)? {
        return Ok(Status::IGNORED);
    }
    Err(Error::StatusPathNotFound(path.to_string()))
}

/// would `path` be ignored if it were untracked
pub fn should_ignore(repo: &Repo, path: &str) -> Result<bool> {
    let mut rules = IgnoreRules::new(repo)?;
    let path = path.trim_end_matches('/');
    let is_dir = repo
        .require_workdir()?
        .join(path)
        .symlink_metadata()
        .is_ok_and(|m| m.is_dir());
    rules.is_ignored(path, is_dir)
}
