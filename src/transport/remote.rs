//! fetch and push against a named remote or a bare url

use crate::error::{Error, Result};
use crate::oid::Oid;
use crate::refs;
use crate::repo::Repo;
use crate::transport::{
    self, ConnectFlags, CredentialCallback, Direction, ProgressCallback, PushReport, PushSpec,
    RemoteHead, TransferProgress,
};

/// what a fetch changed locally
#[derive(Debug, Default, Clone)]
pub struct FetchResult {
    /// local refs written, with their new targets
    pub updated: Vec<(String, Oid)>,
    /// everything the remote advertised
    pub heads: Vec<RemoteHead>,
    pub progress: TransferProgress,
}

/// `(remote name, url)`: a configured remote, or `remote` itself as a url
fn resolve_remote(repo: &Repo, remote: &str) -> Result<(Option<String>, String)> {
    match repo.config().get_remote(remote) {
        Some(r) => Ok((Some(r.name.clone()), r.url.clone())),
        None if remote.contains('/') || remote.contains(':') => Ok((None, remote.to_string())),
        None => Err(Error::RemoteNotFound(remote.to_string())),
    }
}

/// fetch every branch and tag of `remote`
///
/// branches land in `refs/remotes/<name>/…` for configured remotes; tags
/// are created locally when missing and never moved.
pub fn fetch(
    repo: &Repo,
    remote: &str,
    credentials: Option<CredentialCallback>,
    progress: &mut ProgressCallback<'_>,
) -> Result<FetchResult> {
    let (name, url) = resolve_remote(repo, remote)?;
    let mut t = transport::new_with_config(&url, &repo.config().transport)?;
    t.connect(&url, credentials, Direction::Fetch, ConnectFlags::default())?;

    let heads = t.ls()?.to_vec();
    let wanted: Vec<RemoteHead> = heads
        .iter()
        .filter(|h| h.name.starts_with("refs/heads/") || h.name.starts_with("refs/tags/"))
        .cloned()
        .collect();
    t.negotiate_fetch(repo, &wanted)?;
    let stats = t.download_pack(repo, progress)?;
    t.close()?;

    let mut updated = Vec::new();
    for head in &wanted {
        let local = if let Some(branch) = head.name.strip_prefix("refs/heads/") {
            match &name {
                Some(name) => format!("refs/remotes/{}/{}", name, branch),
                None => continue,
            }
        } else if refs::ref_exists(repo, &head.name) {
            continue;
        } else {
            head.name.clone()
        };

        if refs::read_ref(repo, &local).ok() != Some(head.oid) {
            refs::write_ref(repo, &local, &head.oid)?;
            updated.push((local, head.oid));
        }
    }

    tracing::info!(
        remote = %url,
        updated = updated.len(),
        objects = stats.received_objects,
        "fetch complete"
    );
    Ok(FetchResult {
        updated,
        heads,
        progress: stats,
    })
}

/// push `specs` to `remote`; rejected refs are reported, not raised
pub fn push(
    repo: &Repo,
    remote: &str,
    specs: &[PushSpec],
    credentials: Option<CredentialCallback>,
) -> Result<PushReport> {
    let (_, url) = resolve_remote(repo, remote)?;
    let mut t = transport::new_with_config(&url, &repo.config().transport)?;
    t.connect(&url, credentials, Direction::Push, ConnectFlags::default())?;
    let report = t.push(repo, specs)?;
    t.close()?;
    Ok(report)
}
