//! pkt-line framing: a 4 hex digit length (counting itself) then payload,
//! `0000` is a flush

use std::io::{Read, Write};

use crate::error::{Error, Result};

/// largest packet, length prefix included
pub const MAX_PKT_LEN: usize = 65520;

/// largest payload a single packet carries
pub const MAX_PKT_DATA: usize = MAX_PKT_LEN - 4;

pub const FLUSH: &[u8] = b"0000";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pkt {
    Flush,
    Data(Vec<u8>),
}

/// frame `data` as one packet
pub fn encode(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > MAX_PKT_DATA {
        return Err(Error::Protocol(format!(
            "pkt-line payload of {} bytes exceeds {}",
            data.len(),
            MAX_PKT_DATA
        )));
    }
    let mut out = Vec::with_capacity(data.len() + 4);
    out.extend_from_slice(format!("{:04x}", data.len() + 4).as_bytes());
    out.extend_from_slice(data);
    Ok(out)
}

/// append a text line (newline added) as one packet
pub fn push_line(buf: &mut Vec<u8>, line: &str) -> Result<()> {
    let mut data = Vec::with_capacity(line.len() + 1);
    data.extend_from_slice(line.as_bytes());
    data.push(b'\n');
    buf.extend_from_slice(&encode(&data)?);
    Ok(())
}

pub fn push_flush(buf: &mut Vec<u8>) {
    buf.extend_from_slice(FLUSH);
}

pub fn write_pkt(w: &mut impl Write, data: &[u8]) -> Result<()> {
    w.write_all(&encode(data)?).map_err(io_error)
}

pub fn write_flush(w: &mut impl Write) -> Result<()> {
    w.write_all(FLUSH).map_err(io_error)
}

/// reads packets without buffering past the current one, so the inner
/// stream can be handed on (raw pack data follows negotiation)
pub struct PktReader<R> {
    inner: R,
}

impl<R: Read> PktReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read_pkt(&mut self) -> Result<Pkt> {
        let mut len_hex = [0u8; 4];
        self.inner.read_exact(&mut len_hex).map_err(io_error)?;
        let len = std::str::from_utf8(&len_hex)
            .ok()
            .and_then(|s| usize::from_str_radix(s, 16).ok())
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "bad pkt-line length {:?}",
                    String::from_utf8_lossy(&len_hex)
                ))
            })?;

        match len {
            0 => Ok(Pkt::Flush),
            1..=3 => Err(Error::Protocol(format!("bad pkt-line length {}", len))),
            n if n > MAX_PKT_LEN => Err(Error::Protocol(format!("pkt-line of {} bytes", n))),
            n => {
                let mut data = vec![0u8; n - 4];
                self.inner.read_exact(&mut data).map_err(io_error)?;
                Ok(Pkt::Data(data))
            }
        }
    }

    /// next data packet with its trailing newline stripped, `None` at a flush
    pub fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        match self.read_pkt()? {
            Pkt::Flush => Ok(None),
            Pkt::Data(mut data) => {
                if data.last() == Some(&b'\n') {
                    data.pop();
                }
                Ok(Some(data))
            }
        }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// stream errors carrying one of ours (an http carrier failing auth, say)
/// come back out unchanged
pub(crate) fn io_error(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        return Error::Protocol("remote hung up unexpectedly".to_string());
    }
    let message = e.to_string();
    match e.into_inner().map(|inner| inner.downcast::<Error>()) {
        Some(Ok(err)) => *err,
        _ => Error::transport(format!("stream error: {}", message)),
    }
}
