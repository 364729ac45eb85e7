//! Parameter negotiation.
//!
//! Keeps the parameters this side advertises and the ones learned from the
//! peer, and derives the effective payload limit from both. Link-wide
//! parameters arrive in the activation block and in PAX PDUs; per-connection
//! ones (MIUX, RW) in CONNECT and CC.

use crate::connection::Connection;
use llcp_protocol::{
    LinkParameters, LocalParameters, ParameterSet, ProtocolError, RemoteParameters, BASE_MIU,
    MAX_LOCAL_MIUX,
};

/// Receive window assumed when a CONNECT or CC carries no RW parameter.
pub const DEFAULT_RW: u8 = 1;

/// Payload limit for one direction: base unit plus the smaller extension.
pub fn effective_miu(local_miux: u16, remote_miux: u16) -> usize {
    BASE_MIU + local_miux.min(remote_miux) as usize
}

#[derive(Debug, Clone)]
pub struct Negotiation {
    local: LocalParameters,
    remote: RemoteParameters,
    link_miu: usize,
}

impl Negotiation {
    /// Local MIUX is clamped so a full payload always fits one frame.
    pub fn new(mut local: LocalParameters) -> Self {
        if local.miux > MAX_LOCAL_MIUX {
            tracing::warn!(
                "Local MIUX {} exceeds frame capacity, clamping to {}",
                local.miux,
                MAX_LOCAL_MIUX
            );
            local.miux = MAX_LOCAL_MIUX;
        }
        let remote = Self::initial_remote();
        Self {
            link_miu: effective_miu(local.miux, remote.miux),
            local,
            remote,
        }
    }

    /// Until the peer says otherwise it is assumed to speak our version with
    /// no extension.
    fn initial_remote() -> RemoteParameters {
        LinkParameters {
            miux: 0,
            ..LinkParameters::default()
        }
    }

    pub fn local(&self) -> &LocalParameters {
        &self.local
    }

    pub fn remote(&self) -> &RemoteParameters {
        &self.remote
    }

    /// Effective payload limit for connections without their own MIUX.
    pub fn link_miu(&self) -> usize {
        self.link_miu
    }

    pub(crate) fn set_well_known(&mut self, wks: u16) {
        self.local.wks = wks;
    }

    /// Merges a link-wide TLV stream into the remote parameters.
    ///
    /// Fails with `VersionMismatch` if the peer's major version differs; the
    /// remote parameters are left unchanged in that case.
    pub fn merge_link(&mut self, tlvs: &[u8]) -> Result<(), ProtocolError> {
        let mut merged = self.remote;
        merged.merge(tlvs)?;
        if !self.local.version.is_compatible(merged.version) {
            return Err(ProtocolError::VersionMismatch {
                local: self.local.version,
                remote: merged.version,
            });
        }
        self.remote = merged;
        self.link_miu = effective_miu(self.local.miux, self.remote.miux);
        tracing::debug!(
            "Remote parameters: version {} miux {} lto {}ms, link MIU {}",
            self.remote.version,
            self.remote.miux,
            self.remote.lto_ms(),
            self.link_miu
        );
        Ok(())
    }

    /// Merges the TLVs of a CONNECT or CC into `connection`, recomputing its
    /// payload limit and window. Absent parameters take their defaults.
    pub fn merge_connection(
        &self,
        connection: &mut Connection,
        tlvs: &[u8],
    ) -> Result<(), ProtocolError> {
        let mut params = LinkParameters {
            miux: 0,
            rw: DEFAULT_RW,
            ..self.remote
        };
        params.merge(tlvs)?;
        connection.remote_miux = params.miux;
        connection.window = params.rw;
        connection.miu = effective_miu(self.local.miux, params.miux);
        Ok(())
    }

    pub fn encode_link(&self, out: &mut [u8]) -> Result<usize, ProtocolError> {
        self.local.encode(ParameterSet::Link, out)
    }

    pub fn encode_connection(&self, out: &mut [u8]) -> Result<usize, ProtocolError> {
        self.local.encode(ParameterSet::Connection, out)
    }

    /// Forgets everything learned from the peer.
    pub fn reset_remote(&mut self) {
        self.remote = Self::initial_remote();
        self.link_miu = effective_miu(self.local.miux, self.remote.miux);
    }
}
