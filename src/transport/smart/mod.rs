//! the smart protocol on top of a pluggable carrier
//!
//! a [`SmartSubtransport`] only knows how to open byte streams for a
//! [`Service`]; [`SmartTransport`] speaks pkt-line over them.

use std::io::{Read, Write};
use std::time::Duration;

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::object::{collect_reachable, is_ancestor, object_exists};
use crate::oid::Oid;
use crate::refs;
use crate::repo::Repo;
use crate::transport::pack;
use crate::transport::pkt::PktReader;
use crate::transport::{
    CancelHandle, ConnectFlags, ConnectionState, CredentialCallback, Direction, ProgressCallback,
    PushReport, PushSpec, RefUpdateStatus, RemoteHead, Transport, TransferProgress,
};

pub mod git;
pub mod http;
pub mod protocol;
pub mod ssh;

use protocol::{Advertisement, Capabilities, PushCommand, Sideband};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Service {
    UploadPackLs,
    UploadPack,
    ReceivePackLs,
    ReceivePack,
}

impl Service {
    /// the server program behind this service
    pub fn program(&self) -> &'static str {
        match self {
            Service::UploadPackLs | Service::UploadPack => "git-upload-pack",
            Service::ReceivePackLs | Service::ReceivePack => "git-receive-pack",
        }
    }

    pub fn is_ls(&self) -> bool {
        matches!(self, Service::UploadPackLs | Service::ReceivePackLs)
    }

    /// the request allowed to follow this one without closing in between
    fn follow_up(&self) -> Option<Service> {
        match self {
            Service::UploadPackLs => Some(Service::UploadPack),
            Service::ReceivePackLs => Some(Service::ReceivePack),
            Service::UploadPack | Service::ReceivePack => None,
        }
    }
}

/// a duplex byte stream for one action; dropping it releases it
pub trait SmartStream: Read + Write + Send {}

impl<T: Read + Write + Send> SmartStream for T {}

/// settings handed to a subtransport when its transport connects
pub struct SubtransportOptions {
    pub credentials: Option<CredentialCallback>,
    pub flags: ConnectFlags,
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// the owning transport's handle; blocking reads should give up once it fires
    pub cancel: CancelHandle,
}

pub trait SmartSubtransport: Send {
    fn configure(&mut self, _options: SubtransportOptions) {}

    /// open a stream carrying `service` for `url`
    fn action(&mut self, url: &str, service: Service) -> Result<Box<dyn SmartStream>>;

    /// drop whatever connection is held; idempotent
    fn close(&mut self) -> Result<()>;

    /// each request is a fresh stream (http) rather than one long
    /// conversation (git://)
    fn is_rpc(&self) -> bool;
}

pub struct SmartTransport {
    sub: Box<dyn SmartSubtransport>,
    config: TransportConfig,
    url: Option<String>,
    direction: Option<Direction>,
    flags: ConnectFlags,
    state: ConnectionState,
    heads: Vec<RemoteHead>,
    capabilities: Capabilities,
    last_action: Option<(String, Service)>,
    /// the advertisement's stream, which a stateful carrier's request continues on
    live: Option<Box<dyn SmartStream>>,
    /// upload-pack reply waiting for `download_pack`
    pending: Option<(Box<dyn SmartStream>, Sideband)>,
    cancel: CancelHandle,
}

impl SmartTransport {
    pub fn new(sub: Box<dyn SmartSubtransport>) -> Self {
        Self::with_config(sub, TransportConfig::default())
    }

    pub fn with_config(sub: Box<dyn SmartSubtransport>, config: TransportConfig) -> Self {
        Self {
            sub,
            config,
            url: None,
            direction: None,
            flags: ConnectFlags::default(),
            state: ConnectionState::Disconnected,
            heads: Vec::new(),
            capabilities: Capabilities::default(),
            last_action: None,
            live: None,
            pending: None,
            cancel: CancelHandle::default(),
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// open a stream, closing the subtransport first unless this request
    /// continues the previous one
    fn action(&mut self, url: &str, service: Service) -> Result<Box<dyn SmartStream>> {
        if self.last_action.is_some() && !self.continues(url, service) {
            self.pending = None;
            self.live = None;
            self.sub.close()?;
        }
        tracing::trace!(url, ?service, "smart action");
        let stream = self.sub.action(url, service)?;
        self.last_action = Some((url.to_string(), service));
        Ok(stream)
    }

    fn continues(&self, url: &str, service: Service) -> bool {
        match &self.last_action {
            Some((last_url, last)) => last_url == url && last.follow_up() == Some(service),
            None => false,
        }
    }

    /// read the refs for `service`; a stateful carrier keeps the stream for
    /// the request that follows
    fn advertise(&mut self, url: &str, service: Service) -> Result<Advertisement> {
        let mut reader = PktReader::new(self.action(url, service)?);
        let adv = protocol::read_advertisement(&mut reader, service)?;
        if !self.sub.is_rpc() {
            self.live = Some(reader.into_inner());
        }
        Ok(adv)
    }

    /// the stream a request is written to
    ///
    /// rpc carriers get a fresh action per request. stateful carriers
    /// continue on the advertisement's stream, or skip past the
    /// advertisement a new conversation starts with.
    fn request(&mut self, url: &str, service: Service) -> Result<Box<dyn SmartStream>> {
        if self.sub.is_rpc() {
            return self.action(url, service);
        }
        if self.continues(url, service) {
            if let Some(stream) = self.live.take() {
                self.last_action = Some((url.to_string(), service));
                return Ok(stream);
            }
        }
        let mut reader = PktReader::new(self.action(url, service)?);
        protocol::read_advertisement(&mut reader, service)?;
        Ok(reader.into_inner())
    }

    fn connected_url(&self) -> Result<String> {
        self.cancel.check()?;
        match (&self.url, self.state) {
            (Some(url), state) if state != ConnectionState::Disconnected => Ok(url.clone()),
            _ => Err(Error::transport("transport is not connected")),
        }
    }
}

impl Transport for SmartTransport {
    fn connect(
        &mut self,
        url: &str,
        credentials: Option<CredentialCallback>,
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
        self.sub.configure(SubtransportOptions {
            credentials,
            flags,
            user_agent: self.config.user_agent.clone(),
            connect_timeout: Duration::from_secs(self.config.connect_timeout_secs),
            cancel: self.cancel.clone(),
        });

        let service = match direction {
            Direction::Fetch => Service::UploadPackLs,
            Direction::Push => Service::ReceivePackLs,
        };
        let adv = self.advertise(url, service)?;
        tracing::debug!(url, heads = adv.heads.len(), ?direction, "connected");

        self.heads = adv.heads;
        self.capabilities = adv.capabilities;
        self.url = Some(url.to_string());
        self.direction = Some(direction);
        self.flags = flags;
        self.state = ConnectionState::Connected;
        Ok(())
    }

    fn ls(&self) -> Result<&[RemoteHead]> {
        self.connected_url()?;
        Ok(&self.heads)
    }

    fn push(&mut self, repo: &Repo, specs: &[PushSpec]) -> Result<PushReport> {
        let url = self.connected_url()?;
        if self.direction != Some(Direction::Push) {
            return Err(Error::transport("transport was connected for fetch"));
        }

        let mut commands = Vec::new();
        let mut rejected = Vec::new();
        for spec in specs {
            refs::validate_ref_name(&spec.dst)?;
            let old = self
                .heads
                .iter()
                .find(|h| h.name == spec.dst)
                .map_or(Oid::ZERO, |h| h.oid);
            let new = match &spec.src {
                Some(rev) => refs::resolve_revision(repo, rev)?,
                None => Oid::ZERO,
            };

            if !spec.force && !old.is_zero() && !new.is_zero() {
                let fast_forward = object_exists(repo, &old) && is_ancestor(repo, &old, &new)?;
                if !fast_forward {
                    rejected.push((spec.dst.clone(), "non-fast-forward".to_string()));
                    continue;
                }
            }
            if old.is_zero() && new.is_zero() {
                rejected.push((spec.dst.clone(), "remote ref does not exist".to_string()));
                continue;
            }
            commands.push(PushCommand {
                old,
                new,
                reference: spec.dst.clone(),
            });
        }

        let mut report = PushReport::default();
        if !commands.is_empty() {
            self.state = ConnectionState::Transferring;
            let mut request = protocol::push_request(&commands, &self.capabilities, &self.config.user_agent)?;
            if commands.iter().any(|c| !c.is_delete()) {
                let tips: Vec<Oid> = commands.iter().filter(|c| !c.is_delete()).map(|c| c.new).collect();
                let known: Vec<Oid> = self.heads.iter().map(|h| h.oid).collect();
                let objects = collect_reachable(repo, &tips, &known)?;
                pack::write_pack(repo, &objects, &mut request)?;
            }

            let mut stream = self.request(&url, Service::ReceivePack)?;
            stream.write_all(&request).map_err(crate::transport::pkt::io_error)?;
            stream.flush().map_err(crate::transport::pkt::io_error)?;
            report = protocol::read_report_status(&mut PktReader::new(stream))?;

            for update in report.updates.iter().filter(|u| u.error.is_none()) {
                let Some(cmd) = commands.iter().find(|c| c.reference == update.reference) else {
                    continue;
                };
                self.heads.retain(|h| h.name != cmd.reference);
                if !cmd.is_delete() {
                    self.heads.push(RemoteHead::new(cmd.reference.clone(), cmd.new));
                }
            }
        }

        for (reference, reason) in rejected {
            tracing::warn!(reference = %reference, reason = %reason, "push rejected locally");
            report.updates.push(RefUpdateStatus {
                reference,
                error: Some(reason),
            });
        }
        // report in the order the caller asked
        report
            .updates
            .sort_by_key(|u| specs.iter().position(|s| s.dst == u.reference));
        Ok(report)
    }

    fn negotiate_fetch(&mut self, repo: &Repo, wants: &[RemoteHead]) -> Result<()> {
        let url = self.connected_url()?;
        self.state = ConnectionState::Negotiating;
        self.pending = None;

        let mut missing: Vec<Oid> = Vec::new();
        for head in wants {
            if !object_exists(repo, &head.oid) && !missing.contains(&head.oid) {
                missing.push(head.oid);
            }
        }
        if missing.is_empty() {
            tracing::debug!("nothing to fetch");
            return Ok(());
        }

        let haves = protocol::local_haves(repo)?;
        let (request, sideband) =
            protocol::fetch_request(&missing, &haves, &self.capabilities, &self.config.user_agent)?;
        tracing::debug!(wants = missing.len(), haves = haves.len(), "negotiating");

        let mut stream = self.request(&url, Service::UploadPack)?;
        stream.write_all(&request).map_err(crate::transport::pkt::io_error)?;
        stream.flush().map_err(crate::transport::pkt::io_error)?;

        let mut reader = PktReader::new(stream);
        if let Some(common) = protocol::read_negotiation_reply(&mut reader)? {
            tracing::debug!(common = %common, "server acknowledged a common commit");
        }
        self.pending = Some((reader.into_inner(), sideband));
        Ok(())
    }

    fn download_pack(
        &mut self,
        repo: &Repo,
        progress: &mut ProgressCallback<'_>,
    ) -> Result<TransferProgress> {
        self.connected_url()?;
        self.state = ConnectionState::Transferring;
        let Some((stream, sideband)) = self.pending.take() else {
            return Ok(TransferProgress::default());
        };

        let data = protocol::read_pack_data(stream, sideband, &self.cancel)?;
        let stats = pack::unpack(repo, &data, &self.cancel, progress)?;
        tracing::info!(
            objects = stats.received_objects,
            bytes = stats.received_bytes,
            "fetched pack"
        );
        Ok(stats)
    }

    fn read_flags(&self) -> ConnectFlags {
        self.flags
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.pending = None;
        self.live = None;
        let result = if self.last_action.take().is_some() {
            self.sub.close()
        } else {
            Ok(())
        };
        self.state = ConnectionState::Disconnected;
        result
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

impl Drop for SmartTransport {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!(error = %e, "closing transport on drop");
        }
    }
}
