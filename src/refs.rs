use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoResultExt, Result};
use crate::fs::write_atomic;
use crate::object::find_by_prefix;
use crate::oid::{Oid, OID_HEXSZ, OID_MINPREFIXLEN};
use crate::repo::Repo;

const SYMREF_PREFIX: &str = "ref: ";

/// symbolic refs nested deeper than this are treated as a cycle
const MAX_SYMREF_DEPTH: usize = 5;

/// where HEAD points
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Head {
    /// HEAD names a branch, which may not exist yet (unborn)
    Symbolic(String),
    /// HEAD holds a commit id directly
    Detached(Oid),
}

/// a ref read from `packed-refs`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedRef {
    pub name: String,
    pub oid: Oid,
    /// target of an annotated tag (the `^` line following it)
    pub peeled: Option<Oid>,
}

/// read HEAD
pub fn head(repo: &Repo) -> Result<Head> {
    let path = repo.head_path();
    let content = fs::read_to_string(&path).with_path(&path)?;
    let content = content.trim_end();
    match content.strip_prefix(SYMREF_PREFIX) {
        Some(target) => Ok(Head::Symbolic(target.trim().to_string())),
        None => Ok(Head::Detached(Oid::from_hex(content)?)),
    }
}

/// commit HEAD resolves to, `None` when the branch is unborn
pub fn head_oid(repo: &Repo) -> Result<Option<Oid>> {
    match head(repo)? {
        Head::Detached(oid) => Ok(Some(oid)),
        Head::Symbolic(name) => match read_ref(repo, &name) {
            Ok(oid) => Ok(Some(oid)),
            Err(Error::RefNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        },
    }
}

/// point HEAD at a branch
pub fn set_head_symbolic(repo: &Repo, ref_name: &str) -> Result<()> {
    validate_ref_name(ref_name)?;
    let content = format!("{}{}\n", SYMREF_PREFIX, ref_name);
    write_atomic(&repo.tmp_path(), &repo.head_path(), content.as_bytes())
}

/// detach HEAD at a commit
pub fn set_head_detached(repo: &Repo, oid: &Oid) -> Result<()> {
    write_atomic(
        &repo.tmp_path(),
        &repo.head_path(),
        format!("{}\n", oid.to_hex()).as_bytes(),
    )
}

/// move whatever HEAD refers to: its branch, or HEAD itself when detached
pub fn update_head(repo: &Repo, oid: &Oid) -> Result<()> {
    match head(repo)? {
        Head::Symbolic(name) => write_ref(repo, &name, oid),
        Head::Detached(_) => set_head_detached(repo, oid),
    }
}

/// write a loose ref (create or update)
pub fn write_ref(repo: &Repo, ref_name: &str, oid: &Oid) -> Result<()> {
    validate_ref_name(ref_name)?;
    let path = ref_path(repo, ref_name);
    write_atomic(
        &repo.tmp_path(),
        &path,
        format!("{}\n", oid.to_hex()).as_bytes(),
    )?;
    tracing::debug!(reference = ref_name, oid = %oid, "updated ref");
    Ok(())
}

/// read a ref, following symbolic refs, then falling back to `packed-refs`
pub fn read_ref(repo: &Repo, ref_name: &str) -> Result<Oid> {
    let mut name = ref_name.to_string();
    for _ in 0..MAX_SYMREF_DEPTH {
        let path = ref_path(repo, &name);
        match fs::read_to_string(&path) {
            Ok(content) => {
                let content = content.trim();
                match content.strip_prefix(SYMREF_PREFIX) {
                    Some(target) => name = target.trim().to_string(),
                    None => return Oid::from_hex(content),
                }
            }
            Err(e) if is_missing(&e) => {
                return read_packed_refs(repo)?
                    .into_iter()
                    .find(|r| r.name == name)
                    .map(|r| r.oid)
                    .ok_or_else(|| Error::RefNotFound(ref_name.to_string()));
            }
            Err(e) => return Err(Error::Io { path, source: e }),
        }
    }
    Err(Error::InvalidRef(format!("symbolic ref loop at {}", ref_name)))
}

/// delete a loose ref
///
/// `packed-refs` is never rewritten; a ref that only exists there cannot be
/// deleted.
pub fn delete_ref(repo: &Repo, ref_name: &str) -> Result<()> {
    let path = ref_path(repo, ref_name);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if is_missing(&e) => {
            if read_packed_refs(repo)?.iter().any(|r| r.name == ref_name) {
                Err(Error::Unsupported(format!(
                    "cannot delete packed ref {}",
                    ref_name
                )))
            } else {
                Err(Error::RefNotFound(ref_name.to_string()))
            }
        }
        Err(e) => Err(Error::Io { path, source: e }),
    }
}

/// check if a ref exists (loose or packed)
pub fn ref_exists(repo: &Repo, ref_name: &str) -> bool {
    read_ref(repo, ref_name).is_ok()
}

/// every ref under `refs/`, sorted by name; loose refs shadow packed ones
pub fn list_refs(repo: &Repo) -> Result<Vec<(String, Oid)>> {
    let mut refs: std::collections::BTreeMap<String, Oid> = read_packed_refs(repo)?
        .into_iter()
        .map(|r| (r.name, r.oid))
        .collect();

    let refs_dir = repo.refs_path();
    if refs_dir.exists() {
        let mut names = Vec::new();
        collect_refs(repo.path(), &refs_dir, &mut names)?;
        for name in names {
            match read_ref(repo, &name) {
                Ok(oid) => {
                    refs.insert(name, oid);
                }
                // dangling symbolic refs and stray files are not refs
                Err(e) => tracing::warn!(reference = %name, error = %e, "skipping unreadable ref"),
            }
        }
    }

    Ok(refs.into_iter().collect())
}

/// parse `packed-refs`; a missing file is an empty list
pub fn read_packed_refs(repo: &Repo) -> Result<Vec<PackedRef>> {
    let path = repo.packed_refs_path();
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if is_missing(&e) => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io { path, source: e }),
    };

    let mut refs: Vec<PackedRef> = Vec::new();
    for line in content.lines() {
        if line.starts_with('#') || line.is_empty() {
            continue;
        }
        if let Some(peeled) = line.strip_prefix('^') {
            if let Some(last) = refs.last_mut() {
                last.peeled = Some(Oid::from_hex(peeled.trim())?);
            }
            continue;
        }
        let Some((hex, name)) = line.split_once(' ') else {
            tracing::warn!(line, "malformed packed-refs line");
            continue;
        };
        refs.push(PackedRef {
            name: name.trim().to_string(),
            oid: Oid::from_hex(hex)?,
            peeled: None,
        });
    }
    Ok(refs)
}

/// resolve `HEAD`, a ref name, a full hex id or an abbreviated one
///
/// short names are tried as `refs/<name>`, `refs/tags/<name>`,
/// `refs/heads/<name>` and `refs/remotes/<name>`, in that order.
pub fn resolve_revision(repo: &Repo, rev: &str) -> Result<Oid> {
    if rev == "HEAD" {
        return head_oid(repo)?.ok_or_else(|| Error::RefNotFound("HEAD".to_string()));
    }

    let is_hex = rev.chars().all(|c| c.is_ascii_hexdigit());
    if rev.len() == OID_HEXSZ && is_hex {
        return Oid::from_hex(rev);
    }

    let candidates = [
        rev.to_string(),
        format!("refs/{}", rev),
        format!("refs/tags/{}", rev),
        format!("refs/heads/{}", rev),
        format!("refs/remotes/{}", rev),
    ];
    for name in &candidates {
        if !name.starts_with("refs/") || validate_ref_name(name).is_err() {
            continue;
        }
        match read_ref(repo, name) {
            Ok(oid) => return Ok(oid),
            Err(Error::RefNotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    if is_hex && rev.len() >= OID_MINPREFIXLEN {
        return match find_by_prefix(repo, rev)?.as_slice() {
            [] => Err(Error::PrefixNotFound(rev.to_string())),
            [oid] => Ok(*oid),
            many => Err(Error::Ambiguous(format!(
                "{} objects match prefix {}",
                many.len(),
                rev
            ))),
        };
    }

    Err(Error::RefNotFound(rev.to_string()))
}

/// get filesystem path for a ref (names are relative to the git dir)
fn ref_path(repo: &Repo, ref_name: &str) -> PathBuf {
    repo.path().join(ref_name)
}

fn is_missing(e: &std::io::Error) -> bool {
    // a file where a directory is expected (or the reverse) is "no such ref"
    matches!(
        e.kind(),
        std::io::ErrorKind::NotFound
            | std::io::ErrorKind::NotADirectory
            | std::io::ErrorKind::IsADirectory
    )
}

/// recursively collect ref names below `dir`, relative to `base`
fn collect_refs(base: &Path, dir: &Path, refs: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir).with_path(dir)? {
        let entry = entry.with_path(dir)?;
        let path = entry.path();

        if path.is_dir() {
            collect_refs(base, &path, refs)?;
        } else if path.is_file() {
            if let Ok(rel) = path.strip_prefix(base) {
                refs.push(rel.to_string_lossy().to_string());
            }
        }
    }
    Ok(())
}

/// validate a ref name against git's naming rules
pub fn validate_ref_name(name: &str) -> Result<()> {
    let invalid = |why: &str| Err(Error::InvalidRef(format!("{}: {}", why, name)));

    if name.is_empty() {
        return invalid("empty ref name");
    }
    if name.starts_with('/') || name.ends_with('/') {
        return invalid("ref name cannot start or end with '/'");
    }
    if name.contains("//") || name.contains("..") || name.contains("@{") {
        return invalid("ref name contains a forbidden sequence");
    }
    if name.ends_with('.') || name.ends_with(".lock") {
        return invalid("ref name has a forbidden suffix");
    }
    if name
        .chars()
        .any(|c| c.is_ascii_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return invalid("ref name contains a forbidden character");
    }
    if name.split('/').any(|c| c.starts_with('.')) {
        return invalid("ref name component cannot start with '.'");
    }
    Ok(())
}
