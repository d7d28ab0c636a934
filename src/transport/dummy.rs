use crate::error::{Error, Result};
use crate::repo::Repo;
use crate::transport::{
    CancelHandle, ConnectFlags, ConnectionState, CredentialCallback, Direction, ProgressCallback,
    PushReport, PushSpec, RefUpdateStatus, RemoteHead, Transport, TransferProgress,
};

/// a transport that talks to nothing
///
/// it follows the state machine and advertises whatever heads it was built
/// with, which makes it a stand-in for a real remote in tests.
#[derive(Debug, Default)]
pub struct DummyTransport {
    url: Option<String>,
    direction: Option<Direction>,
    flags: ConnectFlags,
    state: ConnectionState,
    heads: Vec<RemoteHead>,
    cancel: CancelHandle,
}

impl DummyTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heads(heads: Vec<RemoteHead>) -> Self {
        Self {
            heads,
            ..Self::default()
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    fn require_connected(&self) -> Result<()> {
        self.cancel.check()?;
        if self.state == ConnectionState::Disconnected {
            return Err(Error::transport("transport is not connected"));
        }
        Ok(())
    }
}

impl Transport for DummyTransport {
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
        self.url = Some(url.to_string());
        self.direction = Some(direction);
        self.flags = flags;
        self.cancel.reset();
        self.state = ConnectionState::Connected;
        Ok(())
    }

    fn ls(&self) -> Result<&[RemoteHead]> {
        self.require_connected()?;
        Ok(&self.heads)
    }

    fn push(&mut self, _repo: &Repo, specs: &[PushSpec]) -> Result<PushReport> {
        self.require_connected()?;
        Ok(PushReport {
            unpack_error: None,
            updates: specs
                .iter()
                .map(|s| RefUpdateStatus {
                    reference: s.dst.clone(),
                    error: None,
                })
                .collect(),
        })
    }

    fn negotiate_fetch(&mut self, _repo: &Repo, _wants: &[RemoteHead]) -> Result<()> {
        self.require_connected()?;
        self.state = ConnectionState::Negotiating;
        Ok(())
    }

    fn download_pack(
        &mut self,
        _repo: &Repo,
        _progress: &mut ProgressCallback<'_>,
    ) -> Result<TransferProgress> {
        self.require_connected()?;
        self.state = ConnectionState::Transferring;
        Ok(TransferProgress::default())
    }

    fn read_flags(&self) -> ConnectFlags {
        self.flags
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}
