//! the git smart protocol (v0/v1) spoken over any [`SmartStream`]
//!
//! [`SmartStream`]: super::SmartStream

use std::io::Read;

use crate::error::{Error, Result};
use crate::object::ancestry;
use crate::oid::Oid;
use crate::refs;
use crate::repo::Repo;
use crate::transport::pkt::{self, Pkt, PktReader};
use crate::transport::{CancelHandle, PushReport, RefUpdateStatus, RemoteHead};

use super::Service;

/// commits offered as `have` lines in one negotiation round
pub const MAX_HAVES: usize = 256;

const EMPTY_REPO_MARKER: &str = "capabilities^{}";
const PEELED_SUFFIX: &str = "^{}";

/// capability list from the first advertised ref
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities(Vec<String>);

impl Capabilities {
    pub fn parse(list: &str) -> Self {
        Self(list.split_whitespace().map(str::to_string).collect())
    }

    pub fn has(&self, name: &str) -> bool {
        self.0
            .iter()
            .any(|c| c == name || c.split_once('=').is_some_and(|(k, _)| k == name))
    }

    /// every value of `name=value` capabilities, in order
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0.iter().filter_map(move |c| {
            c.split_once('=')
                .and_then(|(k, v)| (k == name).then_some(v))
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sideband {
    None,
    /// 1000 byte packets
    Band,
    /// 65520 byte packets
    Band64k,
}

#[derive(Clone, Debug, Default)]
pub struct Advertisement {
    pub heads: Vec<RemoteHead>,
    pub capabilities: Capabilities,
}

/// read the ref advertisement up to its closing flush
///
/// http carriers prefix it with `# service=<name>` and a flush.
pub fn read_advertisement<R: Read>(
    reader: &mut PktReader<R>,
    service: Service,
) -> Result<Advertisement> {
    let mut adv = Advertisement::default();
    let mut first = true;
    let mut after_preamble = false;

    loop {
        let line = match reader.read_line()? {
            Some(line) => line,
            None if after_preamble => {
                after_preamble = false;
                continue;
            }
            None => break,
        };
        let line = String::from_utf8(line)
            .map_err(|_| Error::Protocol("ref advertisement is not utf-8".to_string()))?;

        if let Some(name) = line.strip_prefix("# service=") {
            if name != service.program() {
                return Err(Error::Protocol(format!(
                    "expected service {}, got {}",
                    service.program(),
                    name
                )));
            }
            after_preamble = true;
            continue;
        }
        after_preamble = false;
        check_remote_error(&line)?;

        let (refline, caps) = match line.split_once('\0') {
            Some((refline, caps)) => (refline, Some(caps)),
            None => (line.as_str(), None),
        };
        if first {
            adv.capabilities = Capabilities::parse(caps.unwrap_or(""));
            first = false;
        }

        let (hex, name) = refline
            .split_once(' ')
            .ok_or_else(|| Error::Protocol(format!("malformed ref line '{}'", refline)))?;
        let oid = Oid::from_hex(hex)?;

        if name == EMPTY_REPO_MARKER {
            continue;
        }
        if let Some(base) = name.strip_suffix(PEELED_SUFFIX) {
            match adv.heads.last_mut() {
                Some(last) if last.name == base => last.peeled = Some(oid),
                _ => tracing::warn!(reference = %name, "peeled ref without its tag"),
            }
            continue;
        }
        adv.heads.push(RemoteHead::new(name, oid));
    }

    for symref in adv.capabilities.values("symref") {
        if let Some((from, to)) = symref.split_once(':') {
            if let Some(head) = adv.heads.iter_mut().find(|h| h.name == from) {
                head.symref_target = Some(to.to_string());
            }
        }
    }

    tracing::debug!(
        heads = adv.heads.len(),
        capabilities = adv.capabilities.0.len(),
        "read ref advertisement"
    );
    Ok(adv)
}

fn check_remote_error(line: &str) -> Result<()> {
    match line.strip_prefix("ERR ") {
        Some(message) => Err(Error::Protocol(format!("remote error: {}", message))),
        None => Ok(()),
    }
}

/// commits the local repository can offer: ref tips and their history
pub fn local_haves(repo: &Repo) -> Result<Vec<Oid>> {
    let mut tips: Vec<Oid> = refs::list_refs(repo)?.into_iter().map(|(_, oid)| oid).collect();
    if let Some(oid) = refs::head_oid(repo)? {
        tips.push(oid);
    }
    ancestry(repo, &tips, MAX_HAVES)
}

/// the upload-pack request: wants, a flush, haves, `done`
///
/// capabilities go on the first want and are limited to what the server
/// advertised.
pub fn fetch_request(
    wants: &[Oid],
    haves: &[Oid],
    server: &Capabilities,
    agent: &str,
) -> Result<(Vec<u8>, Sideband)> {
    let sideband = if server.has("side-band-64k") {
        Sideband::Band64k
    } else if server.has("side-band") {
        Sideband::Band
    } else {
        Sideband::None
    };

    let mut caps = Vec::new();
    match sideband {
        Sideband::Band64k => caps.push("side-band-64k".to_string()),
        Sideband::Band => caps.push("side-band".to_string()),
        Sideband::None => {}
    }
    if server.has("ofs-delta") {
        caps.push("ofs-delta".to_string());
    }
    if server.has("agent") {
        caps.push(format!("agent={}", agent));
    }

    let mut buf = Vec::new();
    for (i, want) in wants.iter().enumerate() {
        if i == 0 && !caps.is_empty() {
            pkt::push_line(&mut buf, &format!("want {} {}", want, caps.join(" ")))?;
        } else {
            pkt::push_line(&mut buf, &format!("want {}", want))?;
        }
    }
    pkt::push_flush(&mut buf);
    for have in haves {
        pkt::push_line(&mut buf, &format!("have {}", have))?;
    }
    pkt::push_line(&mut buf, "done")?;
    Ok((buf, sideband))
}

/// the server's answer to `done`: `NAK`, or `ACK` with a common commit
pub fn read_negotiation_reply<R: Read>(reader: &mut PktReader<R>) -> Result<Option<Oid>> {
    loop {
        let Some(line) = reader.read_line()? else {
            continue;
        };
        let line = String::from_utf8_lossy(&line);
        check_remote_error(&line)?;
        if line == "NAK" {
            return Ok(None);
        }
        if let Some(rest) = line.strip_prefix("ACK ") {
            let hex = rest.split_whitespace().next().unwrap_or(rest);
            return Ok(Some(Oid::from_hex(hex)?));
        }
        return Err(Error::Protocol(format!("unexpected negotiation reply '{}'", line)));
    }
}

/// collect raw pack bytes, demultiplexing side-band when negotiated
pub fn read_pack_data<R: Read>(
    mut stream: R,
    sideband: Sideband,
    cancel: &CancelHandle,
) -> Result<Vec<u8>> {
    let mut pack = Vec::new();

    if sideband == Sideband::None {
        let mut chunk = [0u8; 64 * 1024];
        loop {
            cancel.check()?;
            let n = stream.read(&mut chunk).map_err(pkt::io_error)?;
            if n == 0 {
                return Ok(pack);
            }
            pack.extend_from_slice(&chunk[..n]);
        }
    }

    let mut reader = PktReader::new(stream);
    loop {
        cancel.check()?;
        let data = match reader.read_pkt()? {
            Pkt::Flush => return Ok(pack),
            Pkt::Data(data) => data,
        };
        match data.split_first() {
            Some((1, payload)) => pack.extend_from_slice(payload),
            Some((2, payload)) => {
                let text = String::from_utf8_lossy(payload);
                tracing::debug!(remote = %text.trim_end(), "remote progress");
            }
            Some((3, payload)) => {
                return Err(Error::Protocol(format!(
                    "remote error: {}",
                    String::from_utf8_lossy(payload).trim_end()
                )))
            }
            Some((band, _)) => {
                return Err(Error::Protocol(format!("unknown side-band {}", band)))
            }
            None => continue,
        }
    }
}

/// one ref update as sent to receive-pack
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushCommand {
    pub old: Oid,
    pub new: Oid,
    pub reference: String,
}

impl PushCommand {
    pub fn is_delete(&self) -> bool {
        self.new.is_zero()
    }
}

/// the receive-pack command list and its flush
pub fn push_request(commands: &[PushCommand], server: &Capabilities, agent: &str) -> Result<Vec<u8>> {
    let mut caps = vec!["report-status".to_string()];
    if commands.iter().any(PushCommand::is_delete) && server.has("delete-refs") {
        caps.push("delete-refs".to_string());
    }
    if server.has("agent") {
        caps.push(format!("agent={}", agent));
    }

    let mut buf = Vec::new();
    for (i, cmd) in commands.iter().enumerate() {
        let mut line = format!("{} {} {}", cmd.old, cmd.new, cmd.reference);
        if i == 0 {
            line.push('\0');
            line.push_str(&caps.join(" "));
        }
        pkt::push_line(&mut buf, &line)?;
    }
    pkt::push_flush(&mut buf);
    Ok(buf)
}

/// parse `report-status`: `unpack ok|<error>` then `ok <ref>` / `ng <ref> <reason>`
pub fn read_report_status<R: Read>(reader: &mut PktReader<R>) -> Result<PushReport> {
    let first = reader
        .read_line()?
        .ok_or_else(|| Error::Protocol("empty push report".to_string()))?;
    let first = String::from_utf8_lossy(&first).into_owned();
    check_remote_error(&first)?;
    let unpack = first
        .strip_prefix("unpack ")
        .ok_or_else(|| Error::Protocol(format!("bad unpack status '{}'", first)))?;

    let mut report = PushReport {
        unpack_error: (unpack != "ok").then(|| unpack.to_string()),
        updates: Vec::new(),
    };

    while let Some(line) = reader.read_line()? {
        let line = String::from_utf8_lossy(&line);
        if let Some(reference) = line.strip_prefix("ok ") {
            report.updates.push(RefUpdateStatus {
                reference: reference.to_string(),
                error: None,
            });
        } else if let Some(rest) = line.strip_prefix("ng ") {
            let (reference, reason) = rest.split_once(' ').unwrap_or((rest, "rejected"));
            report.updates.push(RefUpdateStatus {
                reference: reference.to_string(),
                error: Some(reason.to_string()),
            });
        } else {
            return Err(Error::Protocol(format!("bad ref status '{}'", line)));
        }
    }
    Ok(report)
}
