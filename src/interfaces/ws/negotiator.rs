//! OCPP subprotocol negotiation
//!
//! A station offers the subprotocol of its configured version in
//! `Sec-WebSocket-Protocol`. The server side picks the first version it
//! supports from its own preference list.

use crate::domain::OcppVersion;

pub struct ProtocolNegotiator {
    /// Versions the server accepts, in preference order.
    supported_versions: Vec<OcppVersion>,
}

impl ProtocolNegotiator {
    pub fn new(supported_versions: Vec<OcppVersion>) -> Self {
        Self { supported_versions }
    }

    /// Pick a version from the comma separated `Sec-WebSocket-Protocol`
    /// header value. `None` when nothing matches.
    pub fn negotiate(&self, requested_protocols: &str) -> Option<OcppVersion> {
        let requested: Vec<&str> = requested_protocols.split(',').map(str::trim).collect();

        self.supported_versions
            .iter()
            .copied()
            .find(|v| requested.contains(&v.subprotocol()))
    }

    pub fn supported_versions(&self) -> &[OcppVersion] {
        &self.supported_versions
    }

    pub fn supported_subprotocols(&self) -> Vec<&'static str> {
        self.supported_versions
            .iter()
            .map(|v| v.subprotocol())
            .collect()
    }
}

impl Default for ProtocolNegotiator {
    /// Every version, newest first.
    fn default() -> Self {
        Self::new(OcppVersion::ALL.to_vec())
    }
}
