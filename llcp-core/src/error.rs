//! Core error types.

use crate::connection::ConnectionId;
use crate::link::LinkError;
use llcp_protocol::ProtocolError;
use thiserror::Error;

/// Errors from the link engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("connection table full ({capacity} slots)")]
    ResourceExhausted { capacity: usize },

    #[error("service table full ({capacity} entries)")]
    CapacityExceeded { capacity: usize },

    #[error("request already pending for address {sap}")]
    AlreadyRequested { sap: u8 },

    #[error("no service registered at address {sap}")]
    ServiceNotFound { sap: u8 },

    #[error("address {sap} already registered")]
    AddressInUse { sap: u8 },

    #[error("address {sap} cannot be registered")]
    InvalidAddress { sap: u8 },

    #[error("connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    #[error("mailbox full: {len} + {extra} bytes exceeds {capacity}")]
    MailboxFull {
        len: usize,
        extra: usize,
        capacity: usize,
    },

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    LinkLost(#[from] LinkError),
}

impl CoreError {
    /// Returns whether the engine must be reset before further use.
    ///
    /// Everything else can be retried at the call site.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Protocol(_) | CoreError::LinkLost(_))
    }

    /// Returns a stable error code for logs and summaries.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::ResourceExhausted { .. } => "RESOURCE_EXHAUSTED",
            CoreError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            CoreError::AlreadyRequested { .. } => "ALREADY_REQUESTED",
            CoreError::ServiceNotFound { .. } => "SERVICE_NOT_FOUND",
            CoreError::AddressInUse { .. } => "ADDRESS_IN_USE",
            CoreError::InvalidAddress { .. } => "INVALID_ADDRESS",
            CoreError::ConnectionNotFound(_) => "CONNECTION_NOT_FOUND",
            CoreError::MailboxFull { .. } => "MAILBOX_FULL",
            CoreError::Protocol(_) => "PROTOCOL_VIOLATION",
            CoreError::LinkLost(_) => "LINK_LOST",
        }
    }
}
