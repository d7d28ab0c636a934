//! ssh carrier placeholder
//!
//! urls are recognised so callers get a clear error instead of a guess at
//! some other transport.

use crate::error::{Error, Result};

use super::{Service, SmartStream, SmartSubtransport};

#[derive(Debug, Default)]
pub struct SshSubtransport;

impl SmartSubtransport for SshSubtransport {
    fn action(&mut self, url: &str, service: Service) -> Result<Box<dyn SmartStream>> {
        tracing::debug!(url, service = service.program(), "ssh requested");
        Err(Error::Unsupported(format!("ssh transport ({})", url)))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_rpc(&self) -> bool {
        false
    }
}
