//! transports: how refs and objects move between repositories
//!
//! every transport is bound to one url for its lifetime and walks
//! `Disconnected -> Connected -> Negotiating -> Transferring`, returning to
//! `Disconnected` on [`Transport::close`]. Dropping a transport closes it.

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::oid::Oid;
use crate::repo::Repo;

pub mod credential;
pub mod dummy;
pub mod local;
pub mod pack;
pub mod pkt;
pub mod remote;
pub mod smart;

pub use credential::{Credential, CredentialCallback, CredentialType};
pub use dummy::DummyTransport;
pub use local::LocalTransport;
pub use remote::{fetch, push, FetchResult};
pub use smart::{Service, SmartStream, SmartSubtransport, SmartTransport};

/// which way objects flow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Fetch,
    Push,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectFlags {
    /// accept any TLS certificate
    pub skip_certificate_check: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Negotiating,
    Transferring,
}

/// a ref as the remote advertises it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteHead {
    pub name: String,
    pub oid: Oid,
    /// object an annotated tag points at
    pub peeled: Option<Oid>,
    /// branch a symbolic ref (usually HEAD) points at
    pub symref_target: Option<String>,
}

impl RemoteHead {
    pub fn new(name: impl Into<String>, oid: Oid) -> Self {
        Self {
            name: name.into(),
            oid,
            peeled: None,
            symref_target: None,
        }
    }
}

/// one ref update requested by a push
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushSpec {
    /// local revision to push; `None` deletes the remote ref
    pub src: Option<String>,
    /// full remote ref name
    pub dst: String,
    /// allow non fast-forward updates
    pub force: bool,
}

impl PushSpec {
    pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src: Some(src.into()),
            dst: dst.into(),
            force: false,
        }
    }

    pub fn delete(dst: impl Into<String>) -> Self {
        Self {
            src: None,
            dst: dst.into(),
            force: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// outcome for one pushed ref; `error` is `None` when the remote took it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefUpdateStatus {
    pub reference: String,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PushReport {
    /// `None` when the remote unpacked what was sent
    pub unpack_error: Option<String>,
    pub updates: Vec<RefUpdateStatus>,
}

impl PushReport {
    pub fn is_ok(&self) -> bool {
        self.unpack_error.is_none() && self.updates.iter().all(|u| u.error.is_none())
    }

    /// first rejected ref as an error
    pub fn into_result(self) -> Result<Self> {
        if let Some(reason) = &self.unpack_error {
            return Err(Error::PushRejected {
                reference: "(unpack)".to_string(),
                reason: reason.clone(),
            });
        }
        if let Some(update) = self.updates.iter().find(|u| u.error.is_some()) {
            return Err(Error::PushRejected {
                reference: update.reference.clone(),
                reason: update.error.clone().unwrap_or_default(),
            });
        }
        Ok(self)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub total_objects: usize,
    pub received_objects: usize,
    pub indexed_objects: usize,
    /// delta bases taken from the local repository
    pub local_objects: usize,
    pub received_bytes: u64,
}

/// callback watching a download; `Break` stops it with `UserCancelled`
pub type ProgressCallback<'a> = dyn FnMut(&TransferProgress) -> ControlFlow<()> + 'a;

/// shared flag that stops a transport from another thread
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub trait Transport: Send {
    /// bind to `url` and read the remote's refs
    fn connect(
        &mut self,
        url: &str,
        credentials: Option<CredentialCallback>,
        direction: Direction,
        flags: ConnectFlags,
    ) -> Result<()>;

    /// refs advertised at connect time
    fn ls(&self) -> Result<&[RemoteHead]>;

    /// update remote refs; per-ref rejections are in the report, not errors
    fn push(&mut self, repo: &Repo, specs: &[PushSpec]) -> Result<PushReport>;

    /// tell the remote which of `wants` to send, given what `repo` has
    fn negotiate_fetch(&mut self, repo: &Repo, wants: &[RemoteHead]) -> Result<()>;

    /// receive the negotiated objects into `repo`
    fn download_pack(
        &mut self,
        repo: &Repo,
        progress: &mut ProgressCallback<'_>,
    ) -> Result<TransferProgress>;

    fn is_connected(&self) -> bool {
        self.state() != ConnectionState::Disconnected
    }

    fn read_flags(&self) -> ConnectFlags;

    fn cancel_handle(&self) -> CancelHandle;

    /// stop in-flight work; safe from any thread through [`CancelHandle`]
    fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    /// release the connection; idempotent
    fn close(&mut self) -> Result<()>;

    fn state(&self) -> ConnectionState;
}

/// pick a transport for `url`
pub fn new(url: &str) -> Result<Box<dyn Transport>> {
    new_with_config(url, &TransportConfig::default())
}

/// pick a transport for `url`, with network settings from `config`
pub fn new_with_config(url: &str, config: &TransportConfig) -> Result<Box<dyn Transport>> {
    let wrap = |sub: Box<dyn SmartSubtransport>| -> Box<dyn Transport> {
        Box::new(SmartTransport::with_config(sub, config.clone()))
    };

    if let Some(scheme) = url_scheme(url) {
        return match scheme {
            "file" => Ok(Box::new(LocalTransport::new())),
            "git" => Ok(wrap(Box::new(smart::git::GitSubtransport::new()))),
            "http" | "https" => Ok(wrap(Box::new(smart::http::HttpSubtransport::new()))),
            "ssh" | "ssh+git" | "git+ssh" => Ok(wrap(Box::new(smart::ssh::SshSubtransport))),
            other => Err(Error::Unsupported(format!("url scheme '{}'", other))),
        };
    }

    if Path::new(url).exists() {
        return Ok(Box::new(LocalTransport::new()));
    }
    if is_scp_like(url) {
        return Ok(wrap(Box::new(smart::ssh::SshSubtransport)));
    }
    Err(Error::Unsupported(format!("no transport for '{}'", url)))
}

fn url_scheme(url: &str) -> Option<&str> {
    let (scheme, _) = url.split_once("://")?;
    scheme
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        .then_some(scheme)
}

/// `user@host:path` style ssh address
fn is_scp_like(url: &str) -> bool {
    match url.split_once(':') {
        Some((host, _)) => !host.is_empty() && !host.contains('/'),
        None => false,
    }
}
