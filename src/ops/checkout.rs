use std::fs;
use std::path::Path;

use crate::error::{IoResultExt, Result};
use crate::fs::{
    create_symlink, hash_workdir_file, remove_file_and_empty_parents, write_file, FileMetadata,
};
use crate::index::{Index, IndexEntry};
use crate::object::read_blob;
use crate::repo::Repo;
use crate::types::FileMode;

/// what a checkout did to the working tree
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckoutStats {
    pub written: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// make the working tree match the index
///
/// `removed` lists paths that were tracked before and are gone from the
/// index now; they are deleted first, along with directories they leave
/// empty. files that are not tracked are never touched. stat data of every
/// checked-out entry is refreshed in `index`, the caller saves it.
pub fn checkout_index(repo: &Repo, index: &mut Index, removed: &[String]) -> Result<CheckoutStats> {
    let workdir = repo.require_workdir()?;
    let mut stats = CheckoutStats::default();

    for path in removed {
        if index.contains(path) {
            continue;
        }
        let full = workdir.join(path);
        // a directory here means the path turned into a tree we still track
        if full.symlink_metadata().is_ok_and(|m| !m.is_dir()) {
            remove_file_and_empty_parents(&full, workdir)?;
            stats.removed += 1;
        }
    }

    let honor_exec = repo.config().core.file_mode;
    let paths: Vec<(String, IndexEntry)> = index
        .iter()
        .map(|(p, e)| (p.to_string(), e.clone()))
        .collect();

    for (path, entry) in paths {
        let full = workdir.join(&path);
        if entry.mode == FileMode::Commit {
            // gitlinks only get an empty directory to mount into
            if !full.is_dir() {
                clear_file_ancestors(workdir, &path)?;
                fs::create_dir_all(&full).with_path(&full)?;
            }
            continue;
        }

        if is_up_to_date(&full, &entry, honor_exec)? {
            let meta = FileMetadata::from_path(&full)?;
            index.update_stat(&path, &meta);
            stats.unchanged += 1;
            continue;
        }

        clear_file_ancestors(workdir, &path)?;
        let content = read_blob(repo, &entry.oid)?;
        match entry.mode {
            FileMode::Link => create_symlink(&full, &content)?,
            mode => write_file(&full, &content, mode == FileMode::BlobExecutable)?,
        }
        let meta = FileMetadata::from_path(&full)?;
        index.update_stat(&path, &meta);
        stats.written += 1;
        tracing::trace!(path = %path, oid = %entry.oid, "checked out");
    }

    tracing::debug!(
        written = stats.written,
        unchanged = stats.unchanged,
        removed = stats.removed,
        "checkout complete"
    );
    Ok(stats)
}

/// working file already has the staged content and kind
fn is_up_to_date(full: &Path, entry: &IndexEntry, honor_exec: bool) -> Result<bool> {
    let Ok(meta) = FileMetadata::from_path(full) else {
        return Ok(false);
    };
    let Some(mode) = meta.tree_mode(full, honor_exec) else {
        return Ok(false);
    };
    let mode_matches = if honor_exec {
        mode == entry.mode
    } else {
        mode.type_class() == entry.mode.type_class()
    };
    if !mode_matches || mode == FileMode::Commit {
        return Ok(false);
    }
    Ok(hash_workdir_file(full, &meta)? == entry.oid)
}

/// remove files sitting where a parent directory of `path` must be
fn clear_file_ancestors(workdir: &Path, path: &str) -> Result<()> {
    let mut end = 0;
    while let Some(i) = path[end..].find('/') {
        let dir = workdir.join(&path[..end + i]);
        if dir.symlink_metadata().is_ok_and(|m| !m.is_dir()) {
            fs::remove_file(&dir).with_path(&dir)?;
        }
        end += i + 1;
    }
    Ok(())
}
