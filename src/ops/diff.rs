//! file-level deltas between HEAD's tree, the index and the working tree

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::fs::{hash_workdir_file, FileMetadata, FileType};
use crate::ignore::IgnoreRules;
use crate::index::Index;
use crate::object::{TreeWalkResult, WalkMode};
use crate::oid::Oid;
use crate::pathspec::Pathspec;
use crate::repo::{Repo, DOT_GIT};
use crate::types::{Delta, DiffDelta, DiffFile, FileMode, Tree};

/// what a diff reports and how
#[derive(Clone, Debug, Default)]
pub struct DiffOptions {
    pub pathspec: Pathspec,
    pub include_unmodified: bool,
    pub include_untracked: bool,
    pub include_ignored: bool,
    pub recurse_untracked_dirs: bool,
    pub recurse_ignored_dirs: bool,
    pub exclude_submodules: bool,
    /// pair a deletion with an addition of identical content
    pub detect_renames: bool,
    /// order paths ignoring ASCII case
    pub sort_case_insensitively: bool,
}

/// compare a tree (HEAD's, or nothing for an unborn branch) with the index
pub fn diff_tree_to_index(
    repo: &Repo,
    tree: Option<&Tree>,
    index: &Index,
    opts: &DiffOptions,
) -> Result<Vec<DiffDelta>> {
    let mut old: BTreeMap<String, (Oid, FileMode)> = BTreeMap::new();
    if let Some(tree) = tree {
        tree.walk(repo, WalkMode::PreOrder, |root, entry| {
            if !entry.is_tree() {
                old.insert(format!("{}{}", root, entry.name), (entry.oid, entry.mode));
            }
            TreeWalkResult::Continue
        })?;
    }

    let mut deltas = Vec::new();
    for (path, entry) in index.iter() {
        if !opts.pathspec.matches(path) || skip_submodule(opts, entry.mode) {
            old.remove(path);
            continue;
        }
        let new_file = DiffFile::new(path, entry.oid, entry.mode);
        let delta = match old.remove(path) {
            None => DiffDelta {
                status: Delta::Added,
                old_file: DiffFile::absent(path),
                new_file,
            },
            Some((oid, mode)) => {
                let status = compare(oid, mode, entry.oid, entry.mode);
                if status == Delta::Unmodified && !opts.include_unmodified {
                    continue;
                }
                DiffDelta {
                    status,
                    old_file: DiffFile::new(path, oid, mode),
                    new_file,
                }
            }
        };
        deltas.push(delta);
    }

    for (path, (oid, mode)) in old {
        if opts.pathspec.matches(&path) && !skip_submodule(opts, mode) {
            deltas.push(DiffDelta {
                status: Delta::Deleted,
                old_file: DiffFile::new(&path, oid, mode),
                new_file: DiffFile::absent(&path),
            });
        }
    }

    if opts.detect_renames {
        pair_renames(&mut deltas, Delta::Added);
    }
    sort_deltas(&mut deltas, opts.sort_case_insensitively);
    Ok(deltas)
}

/// compare the index with the working tree
pub fn diff_index_to_workdir(
    repo: &Repo,
    index: &Index,
    ignore: &mut IgnoreRules,
    opts: &DiffOptions,
) -> Result<Vec<DiffDelta>> {
    let workdir = repo.require_workdir()?;
    let honor_exec = repo.config().core.file_mode;
    let mut deltas = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let mut walker = WalkDir::new(workdir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| walk_error(workdir, e))?;
        let Some(path) = relative_path(workdir, entry.path()) else {
            tracing::warn!(path = %entry.path().display(), "skipping non utf-8 path");
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        };

        if entry.file_type().is_dir() {
            if entry.file_name() == DOT_GIT {
                walker.skip_current_dir();
                continue;
            }

            // nested repository: a gitlink when staged as one
            if entry.path().join(DOT_GIT).exists() {
                walker.skip_current_dir();
                match index.get(&path) {
                    Some(staged) if staged.mode == FileMode::Commit => {
                        seen.insert(path.clone());
                        if opts.include_unmodified
                            && opts.pathspec.matches(&path)
                            && !opts.exclude_submodules
                        {
                            let file = DiffFile::new(&path, staged.oid, staged.mode);
                            deltas.push(DiffDelta {
                                status: Delta::Unmodified,
                                old_file: file.clone(),
                                new_file: file,
                            });
                        }
                    }
                    _ => push_untracked_dir(&mut deltas, repo, ignore, opts, &path)?,
                }
                continue;
            }

            // staged entries below are filtered by pathspec on the deleted pass
            if !opts.pathspec.may_match_within(&path) {
                walker.skip_current_dir();
                continue;
            }
            if index.has_entries_under(&path) {
                continue;
            }

            if ignore.is_ignored(&path, true)? {
                if !opts.include_ignored {
                    walker.skip_current_dir();
                } else if !opts.recurse_ignored_dirs {
                    walker.skip_current_dir();
                    if opts.pathspec.matches(&path) {
                        deltas.push(untracked_delta(format!("{}/", path), Delta::Ignored, None));
                    }
                }
                continue;
            }

            if !opts.include_untracked && !opts.include_ignored {
                walker.skip_current_dir();
            } else if opts.include_untracked && !opts.recurse_untracked_dirs {
                walker.skip_current_dir();
                push_untracked_dir(&mut deltas, repo, ignore, opts, &path)?;
            }
            continue;
        }

        let meta = FileMetadata::from_std_metadata(&entry.metadata().map_err(|e| walk_error(workdir, e))?);
        if !matches!(meta.file_type, FileType::Regular | FileType::Symlink) {
            continue;
        }

        if let Some(staged) = index.get(&path) {
            seen.insert(path.clone());
            if !opts.pathspec.matches(&path) || skip_submodule(opts, staged.mode) {
                continue;
            }

            let wt_mode = meta
                .tree_mode(entry.path(), honor_exec)
                .unwrap_or(FileMode::Blob);
            // without core.file_mode the staged exec bit is kept
            let wt_mode = if !honor_exec && wt_mode.is_blob() && staged.mode.is_blob() {
                staged.mode
            } else {
                wt_mode
            };

            let delta = if staged.mode.type_class() != wt_mode.type_class() {
                let oid = hash_workdir_file(entry.path(), &meta)?;
                Some((Delta::Typechange, oid))
            } else if staged.mode == wt_mode && index.is_stat_clean(staged, &meta) {
                opts.include_unmodified.then_some((Delta::Unmodified, staged.oid))
            } else {
                let oid = hash_workdir_file(entry.path(), &meta)?;
                match compare(staged.oid, staged.mode, oid, wt_mode) {
                    Delta::Unmodified if !opts.include_unmodified => None,
                    status => Some((status, oid)),
                }
            };

            if let Some((status, oid)) = delta {
                deltas.push(DiffDelta {
                    status,
                    old_file: DiffFile::new(&path, staged.oid, staged.mode),
                    new_file: DiffFile::new(&path, oid, wt_mode),
                });
            }
            continue;
        }

        if !opts.pathspec.matches(&path) {
            continue;
        }
        let status = if ignore.is_ignored(&path, false)? {
            Delta::Ignored
        } else {
            Delta::Untracked
        };
        let wanted = match status {
            Delta::Ignored => opts.include_ignored,
            _ => opts.include_untracked,
        };
        if wanted {
            let oid = if opts.detect_renames && status == Delta::Untracked {
                Some(hash_workdir_file(entry.path(), &meta)?)
            } else {
                None
            };
            let mode = meta.tree_mode(entry.path(), honor_exec);
            deltas.push(untracked_delta(path, status, oid.zip(mode)));
        }
    }

    for (path, staged) in index.iter() {
        if seen.contains(path) || !opts.pathspec.matches(path) || skip_submodule(opts, staged.mode)
        {
            continue;
        }
        deltas.push(DiffDelta {
            status: Delta::Deleted,
            old_file: DiffFile::new(path, staged.oid, staged.mode),
            new_file: DiffFile::absent(path),
        });
    }

    if opts.detect_renames {
        pair_renames(&mut deltas, Delta::Untracked);
    }
    sort_deltas(&mut deltas, opts.sort_case_insensitively);
    Ok(deltas)
}

/// report an untracked directory as one `dir/` entry, if it holds anything
/// that is not ignored
fn push_untracked_dir(
    deltas: &mut Vec<DiffDelta>,
    repo: &Repo,
    ignore: &mut IgnoreRules,
    opts: &DiffOptions,
    dir: &str,
) -> Result<()> {
    if !opts.include_untracked || !opts.pathspec.matches(dir) {
        return Ok(());
    }
    let workdir = repo.require_workdir()?;
    for entry in WalkDir::new(workdir.join(dir)).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| walk_error(workdir, e))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let Some(path) = relative_path(workdir, entry.path()) else {
            continue;
        };
        if !ignore.is_ignored(&path, false)? {
            deltas.push(untracked_delta(format!("{}/", dir), Delta::Untracked, None));
            return Ok(());
        }
    }
    Ok(())
}

fn untracked_delta(path: String, status: Delta, content: Option<(Oid, FileMode)>) -> DiffDelta {
    let new_file = match content {
        Some((oid, mode)) => DiffFile::new(&path, oid, mode),
        None => DiffFile {
            path: path.clone(),
            oid: Oid::ZERO,
            mode: Some(FileMode::Blob),
        },
    };
    DiffDelta {
        status,
        old_file: DiffFile::absent(&path),
        new_file,
    }
}

/// classify a change between two sides that both exist
fn compare(old_oid: Oid, old_mode: FileMode, new_oid: Oid, new_mode: FileMode) -> Delta {
    if old_mode.type_class() != new_mode.type_class() {
        Delta::Typechange
    } else if old_oid != new_oid || old_mode != new_mode {
        Delta::Modified
    } else {
        Delta::Unmodified
    }
}

fn skip_submodule(opts: &DiffOptions, mode: FileMode) -> bool {
    opts.exclude_submodules && mode == FileMode::Commit
}

/// turn (deleted, `added_kind`) pairs with identical content into renames
fn pair_renames(deltas: &mut Vec<DiffDelta>, added_kind: Delta) {
    let mut added: HashMap<Oid, Vec<usize>> = HashMap::new();
    for (i, d) in deltas.iter().enumerate() {
        if d.status == added_kind && !d.new_file.oid.is_zero() {
            added.entry(d.new_file.oid).or_default().push(i);
        }
    }

    let mut consumed = HashSet::new();
    let mut renamed = Vec::new();
    for (i, d) in deltas.iter().enumerate() {
        if d.status != Delta::Deleted {
            continue;
        }
        let Some(candidates) = added.get_mut(&d.old_file.oid) else {
            continue;
        };
        if candidates.is_empty() {
            continue;
        }
        let j = candidates.remove(0);
        consumed.insert(i);
        consumed.insert(j);
        renamed.push(DiffDelta {
            status: Delta::Renamed,
            old_file: d.old_file.clone(),
            new_file: deltas[j].new_file.clone(),
        });
    }

    if renamed.is_empty() {
        return;
    }
    let mut i = 0;
    deltas.retain(|_| {
        let keep = !consumed.contains(&i);
        i += 1;
        keep
    });
    deltas.extend(renamed);
}

fn sort_deltas(deltas: &mut [DiffDelta], case_insensitive: bool) {
    if case_insensitive {
        deltas.sort_by(|a, b| {
            a.path()
                .to_ascii_lowercase()
                .cmp(&b.path().to_ascii_lowercase())
                .then_with(|| a.path().cmp(b.path()))
        });
    } else {
        deltas.sort_by(|a, b| a.path().cmp(b.path()));
    }
}

fn relative_path(workdir: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(workdir)
        .ok()?
        .to_str()
        .map(|s| s.to_string())
}

fn walk_error(workdir: &Path, e: walkdir::Error) -> Error {
    let path = e.path().unwrap_or(workdir).to_path_buf();
    Error::Io {
        path,
        source: e
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walkdir error")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{read_tree, write_tree_from_index};
    use std::fs;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Repo) {
        let dir = tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("work")).unwrap();
        (dir, repo)
    }

    fn write(repo: &Repo, path: &str, content: &str) {
        let full = repo.workdir().unwrap().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    fn summary(deltas: &[DiffDelta]) -> Vec<(String, Delta)> {
        deltas
            .iter()
            .map(|d| (d.path().to_string(), d.status))
            .collect()
    }

    #[test]
    fn test_tree_to_index() {
        let (_dir, repo) = setup();
        write(&repo, "a", "one");
        write(&repo, "b", "two");
        write(&repo, "c", "three");
        let mut index = Index::default();
        for p in ["a", "b", "c"] {
            index.add_path(&repo, p).unwrap();
        }
        let tree = read_tree(&repo, &write_tree_from_index(&repo, &index).unwrap()).unwrap();

        write(&repo, "a", "changed");
        write(&repo, "d", "new");
        index.add_path(&repo, "a").unwrap();
        index.add_path(&repo, "d").unwrap();
        index.remove("b");

        let deltas = diff_tree_to_index(&repo, Some(&tree), &index, &DiffOptions::default()).unwrap();
        assert_eq!(
            summary(&deltas),
            vec![
                ("a".to_string(), Delta::Modified),
                ("b".to_string(), Delta::Deleted),
                ("d".to_string(), Delta::Added),
            ]
        );

        let all = DiffOptions {
            include_unmodified: true,
            ..Default::default()
        };
        assert_eq!(diff_tree_to_index(&repo, Some(&tree), &index, &all).unwrap().len(), 4);
    }

    #[test]
    fn test_tree_to_index_renames() {
        let (_dir, repo) = setup();
        write(&repo, "old.txt", "same content");
        let mut index = Index::default();
        index.add_path(&repo, "old.txt").unwrap();
        let tree = read_tree(&repo, &write_tree_from_index(&repo, &index).unwrap()).unwrap();

        fs::rename(
            repo.workdir().unwrap().join("old.txt"),
            repo.workdir().unwrap().join("new.txt"),
        )
        .unwrap();
        index.remove("old.txt");
        index.add_path(&repo, "new.txt").unwrap();

        let opts = DiffOptions {
            detect_renames: true,
            ..Default::default()
        };
        let deltas = diff_tree_to_index(&repo, Some(&tree), &index, &opts).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].status, Delta::Renamed);
        assert_eq!(deltas[0].old_file.path, "old.txt");
        assert_eq!(deltas[0].new_file.path, "new.txt");
    }

    #[test]
    fn test_index_to_workdir() {
        let (_dir, repo) = setup();
        write(&repo, "clean", "c");
        write(&repo, "dirty", "d");
        write(&repo, "gone", "g");
        write(&repo, ".gitignore", "*.log\n");
        let mut index = Index::default();
        for p in ["clean", "dirty", "gone", ".gitignore"] {
            index.add_path(&repo, p).unwrap();
        }

        write(&repo, "dirty", "dd");
        fs::remove_file(repo.workdir().unwrap().join("gone")).unwrap();
        write(&repo, "fresh", "f");
        write(&repo, "debug.log", "l");
        write(&repo, "newdir/a", "a");
        write(&repo, "newdir/b", "b");

        let mut ignore = IgnoreRules::new(&repo).unwrap();
        let opts = DiffOptions {
            include_untracked: true,
            include_ignored: true,
            ..Default::default()
        };
        let deltas = diff_index_to_workdir(&repo, &index, &mut ignore, &opts).unwrap();
        assert_eq!(
            summary(&deltas),
            vec![
                ("debug.log".to_string(), Delta::Ignored),
                ("dirty".to_string(), Delta::Modified),
                ("fresh".to_string(), Delta::Untracked),
                ("gone".to_string(), Delta::Deleted),
                ("newdir/".to_string(), Delta::Untracked),
            ]
        );

        let recurse = DiffOptions {
            include_untracked: true,
            recurse_untracked_dirs: true,
            ..Default::default()
        };
        let deltas = diff_index_to_workdir(&repo, &index, &mut ignore, &recurse).unwrap();
        let paths: Vec<_> = deltas.iter().map(|d| d.path().to_string()).collect();
        assert!(paths.contains(&"newdir/a".to_string()));
        assert!(paths.contains(&"newdir/b".to_string()));
        assert!(!paths.contains(&"debug.log".to_string()));
    }

    #[test]
    fn test_index_to_workdir_typechange() {
        let (_dir, repo) = setup();
        write(&repo, "target", "t");
        write(&repo, "link", "was a file");
        let mut index = Index::default();
        index.add_path(&repo, "target").unwrap();
        index.add_path(&repo, "link").unwrap();

        let link = repo.workdir().unwrap().join("link");
        fs::remove_file(&link).unwrap();
        std::os::unix::fs::symlink("target", &link).unwrap();

        let mut ignore = IgnoreRules::new(&repo).unwrap();
        let deltas =
            diff_index_to_workdir(&repo, &index, &mut ignore, &DiffOptions::default()).unwrap();
        assert_eq!(summary(&deltas), vec![("link".to_string(), Delta::Typechange)]);
        assert_eq!(deltas[0].new_file.mode, Some(FileMode::Link));
    }

    #[test]
    fn test_index_to_workdir_pathspec_and_exec_bit() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, repo) = setup();
        write(&repo, "src/run.sh", "#!/bin/sh\n");
        write(&repo, "docs/readme", "r");
        let mut index = Index::default();
        index.add_path(&repo, "src/run.sh").unwrap();
        index.add_path(&repo, "docs/readme").unwrap();

        let script = repo.workdir().unwrap().join("src/run.sh");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        write(&repo, "docs/readme", "changed");

        let mut ignore = IgnoreRules::new(&repo).unwrap();
        let opts = DiffOptions {
            pathspec: Pathspec::new(&["src"], false, false).unwrap(),
            ..Default::default()
        };
        let deltas = diff_index_to_workdir(&repo, &index, &mut ignore, &opts).unwrap();
        assert_eq!(summary(&deltas), vec![("src/run.sh".to_string(), Delta::Modified)]);
        assert_eq!(deltas[0].new_file.mode, Some(FileMode::BlobExecutable));
    }

    #[test]
    fn test_workdir_renames() {
        let (_dir, repo) = setup();
        write(&repo, "before", "moved content");
        let mut index = Index::default();
        index.add_path(&repo, "before").unwrap();
        fs::rename(
            repo.workdir().unwrap().join("before"),
            repo.workdir().unwrap().join("after"),
        )
        .unwrap();

        let mut ignore = IgnoreRules::new(&repo).unwrap();
        let opts = DiffOptions {
            include_untracked: true,
            detect_renames: true,
            ..Default::default()
        };
        let deltas = diff_index_to_workdir(&repo, &index, &mut ignore, &opts).unwrap();
        assert_eq!(summary(&deltas), vec![("after".to_string(), Delta::Renamed)]);
    }
}
