//! transport to a repository on the local filesystem
//!
//! objects move as loose files: hardlinked when both repositories share a
//! filesystem, copied otherwise. no pack is ever built.

use std::fs;
use std::path::PathBuf;

use crate::error::{Error, IoResultExt, Result};
use crate::object::{
    collect_reachable, is_ancestor, object_exists, object_path, read_header, read_tag,
};
use crate::oid::{ObjectKind, Oid};
use crate::refs::{self, Head};
use crate::repo::Repo;
use crate::transport::{
    CancelHandle, ConnectFlags, ConnectionState, CredentialCallback, Direction, ProgressCallback,
    PushReport, PushSpec, RefUpdateStatus, RemoteHead, Transport, TransferProgress,
};

const MAX_PEEL_DEPTH: usize = 16;

#[derive(Default)]
pub struct LocalTransport {
    url: Option<String>,
    remote: Option<Repo>,
    direction: Option<Direction>,
    flags: ConnectFlags,
    state: ConnectionState,
    heads: Vec<RemoteHead>,
    wants: Vec<Oid>,
    cancel: CancelHandle,
}

/// what moving one object cost
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    pub hardlinked: usize,
    pub copied: usize,
    pub skipped: usize,
    pub bytes_copied: u64,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn remote(&self) -> Result<&Repo> {
        self.cancel.check()?;
        self.remote
            .as_ref()
            .ok_or_else(|| Error::transport("transport is not connected"))
    }
}

/// `file:///srv/repo` and `/srv/repo` both name `/srv/repo`
pub fn local_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}

/// HEAD first, then every ref in name order, tags peeled
pub fn advertise(repo: &Repo) -> Result<Vec<RemoteHead>> {
    let mut heads = Vec::new();

    if let Some(oid) = refs::head_oid(repo)? {
        let mut head = RemoteHead::new("HEAD", oid);
        if let Head::Symbolic(branch) = refs::head(repo)? {
            head.symref_target = Some(branch);
        }
        heads.push(head);
    }

    for (name, oid) in refs::list_refs(repo)? {
        let mut head = RemoteHead::new(name, oid);
        head.peeled = peel_tag(repo, &oid)?;
        heads.push(head);
    }
    Ok(heads)
}

/// final non-tag object behind an annotated tag, `None` for anything else
fn peel_tag(repo: &Repo, oid: &Oid) -> Result<Option<Oid>> {
    let mut current = *oid;
    for depth in 0..MAX_PEEL_DEPTH {
        let (kind, _) = read_header(repo, &current)?;
        if kind != ObjectKind::Tag {
            return Ok((depth > 0).then_some(current));
        }
        current = read_tag(repo, &current)?.target;
    }
    Err(Error::PeelFailed(*oid))
}

/// move one loose object from `src` to `dst`
pub fn copy_object(src: &Repo, dst: &Repo, oid: &Oid, stats: &mut CopyStats) -> Result<()> {
    let src_path = object_path(src, oid);
    let dst_path = object_path(dst, oid);

    if dst_path.exists() {
        stats.skipped += 1;
        return Ok(());
    }

    if let Some(parent) = dst_path.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }

    // loose objects are immutable, so sharing the inode is safe
    if fs::hard_link(&src_path, &dst_path).is_ok() {
        stats.hardlinked += 1;
    } else {
        let content = fs::read(&src_path).with_path(&src_path)?;
        stats.bytes_copied += content.len() as u64;
        crate::fs::write_atomic(&dst.tmp_path(), &dst_path, &content)?;
        stats.copied += 1;
    }
    Ok(())
}

/// copy `objects` into `dst`, reporting after each one
fn copy_objects(
    src: &Repo,
    dst: &Repo,
    objects: &[Oid],
    cancel: &CancelHandle,
    progress: &mut ProgressCallback<'_>,
) -> Result<TransferProgress> {
    let mut stats = CopyStats::default();
    let mut report = TransferProgress {
        total_objects: objects.len(),
        ..TransferProgress::default()
    };

    for oid in objects {
        cancel.check()?;
        let before = stats.bytes_copied;
        copy_object(src, dst, oid, &mut stats)?;
        report.received_objects += 1;
        report.indexed_objects += 1;
        report.received_bytes += stats.bytes_copied - before;
        if progress(&report).is_break() {
            return Err(Error::UserCancelled);
        }
    }

    tracing::debug!(
        hardlinked = stats.hardlinked,
        copied = stats.copied,
        skipped = stats.skipped,
        bytes = stats.bytes_copied,
        "copied objects"
    );
    Ok(report)
}

/// tips the local repository already has, used to trim what gets copied
fn local_tips(repo: &Repo) -> Result<Vec<Oid>> {
    let mut tips: Vec<Oid> = refs::list_refs(repo)?.into_iter().map(|(_, oid)| oid).collect();
    if let Some(oid) = refs::head_oid(repo)? {
        tips.push(oid);
    }
    Ok(tips)
}

impl Transport for LocalTransport {
    fn connect(
        &mut self,
        url: &str,
        _credentials: Option<CredentialCallback>,
        direction: Direction,
        flags: ConnectFlags,
    ) -> Result<()> {
        if let Some(bound) = &self.url {
            if bound != url {
                return Err(Error::transport(format!(
                    "transport is bound to {}, not {}",
                    bound, url
                )));
            }
        }
        self.cancel.reset();

        let remote = Repo::open(&local_path(url))?;
        self.heads = advertise(&remote)?;
        tracing::debug!(url, heads = self.heads.len(), "connected to local repository");

        self.url = Some(url.to_string());
        self.remote = Some(remote);
        self.direction = Some(direction);
        self.flags = flags;
        self.state = ConnectionState::Connected;
        Ok(())
    }

    fn ls(&self) -> Result<&[RemoteHead]> {
        self.remote()?;
        Ok(&self.heads)
    }

    fn push(&mut self, repo: &Repo, specs: &[PushSpec]) -> Result<PushReport> {
        let remote = self.remote()?;
        let known: Vec<Oid> = self.heads.iter().map(|h| h.oid).collect();
        let mut report = PushReport::default();

        for spec in specs {
            self.cancel.check()?;
            let error = push_one(repo, remote, spec, &known, &self.cancel)?;
            if let Some(reason) = &error {
                tracing::warn!(reference = %spec.dst, reason = %reason, "push rejected");
            }
            report.updates.push(RefUpdateStatus {
                reference: spec.dst.clone(),
                error,
            });
        }

        let heads = advertise(remote)?;
        self.heads = heads;
        Ok(report)
    }

    fn negotiate_fetch(&mut self, repo: &Repo, wants: &[RemoteHead]) -> Result<()> {
        self.remote()?;
        self.wants = wants
            .iter()
            .map(|h| h.oid)
            .filter(|oid| !object_exists(repo, oid))
            .collect();
        self.wants.dedup();
        self.state = ConnectionState::Negotiating;
        Ok(())
    }

    fn download_pack(
        &mut self,
        repo: &Repo,
        progress: &mut ProgressCallback<'_>,
    ) -> Result<TransferProgress> {
        self.cancel.check()?;
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| Error::transport("transport is not connected"))?;
        self.state = ConnectionState::Transferring;
        if self.wants.is_empty() {
            return Ok(TransferProgress::default());
        }

        let objects = collect_reachable(remote, &self.wants, &local_tips(repo)?)?;
        copy_objects(remote, repo, &objects, &self.cancel, progress)
    }

    fn read_flags(&self) -> ConnectFlags {
        self.flags
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.remote = None;
        self.wants.clear();
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

/// apply one push spec to `remote`; `Ok(Some(reason))` is a rejection
fn push_one(
    repo: &Repo,
    remote: &Repo,
    spec: &PushSpec,
    known: &[Oid],
    cancel: &CancelHandle,
) -> Result<Option<String>> {
    refs::validate_ref_name(&spec.dst)?;

    if !remote.is_bare() {
        if let Head::Symbolic(branch) = refs::head(remote)? {
            if branch == spec.dst {
                return Ok(Some("branch is currently checked out".to_string()));
            }
        }
    }

    let old = match refs::read_ref(remote, &spec.dst) {
        Ok(oid) => Some(oid),
        Err(Error::RefNotFound(_)) => None,
        Err(e) => return Err(e),
    };

    let Some(src) = &spec.src else {
        return match old {
            Some(_) => {
                refs::delete_ref(remote, &spec.dst)?;
                Ok(None)
            }
            None => Ok(Some("remote ref does not exist".to_string())),
        };
    };

    let new = refs::resolve_revision(repo, src)?;
    if let Some(old) = old {
        if old == new {
            return Ok(None);
        }
        let fast_forward = object_exists(repo, &old) && is_ancestor(repo, &old, &new)?;
        if !spec.force && !fast_forward {
            return Ok(Some("non-fast-forward".to_string()));
        }
    }

    let objects = collect_reachable(repo, &[new], known)?;
    copy_objects(repo, remote, &objects, cancel, &mut |_| {
        std::ops::ControlFlow::Continue(())
    })?;
    refs::write_ref(remote, &spec.dst, &new)?;
    Ok(None)
}
