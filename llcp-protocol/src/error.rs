//! Protocol error types.

use crate::params::Version;
use thiserror::Error;

/// Errors raised while decoding or encoding link PDUs and parameter streams.
///
/// Every variant is a protocol violation from the engine's point of view: the
/// peer sent something this implementation cannot interpret, or a frame could
/// not be laid out in the caller's buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("unknown PDU type: {0:#x}")]
    UnknownPduType(u8),

    #[error("malformed parameter {tag:#04x}: length {len}")]
    MalformedParameter { tag: u8, len: usize },

    #[error("version mismatch: local {local}, remote {remote}")]
    VersionMismatch { local: Version, remote: Version },

    #[error("invalid activation magic: {0:02x?}")]
    BadMagic([u8; 3]),

    #[error("buffer too small: need {needed} bytes (capacity {capacity})")]
    BufferTooSmall { needed: usize, capacity: usize },
}

impl ProtocolError {
    /// Returns a stable code for logs and summaries.
    pub fn error_code(&self) -> &'static str {
        match self {
            ProtocolError::Truncated { .. } => "TRUNCATED",
            ProtocolError::UnknownPduType(_) => "UNKNOWN_PDU_TYPE",
            ProtocolError::MalformedParameter { .. } => "MALFORMED_PARAMETER",
            ProtocolError::VersionMismatch { .. } => "VERSION_MISMATCH",
            ProtocolError::BadMagic(_) => "BAD_MAGIC",
            ProtocolError::BufferTooSmall { .. } => "BUFFER_TOO_SMALL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::UnknownPduType(0x0F);
        assert!(err.to_string().contains("0xf"));

        let err = ProtocolError::Truncated {
            needed: 3,
            actual: 2,
        };
        assert!(err.to_string().contains("need 3"));

        let err = ProtocolError::MalformedParameter { tag: 0x02, len: 5 };
        let msg = err.to_string();
        assert!(msg.contains("0x02"));
        assert!(msg.contains("length 5"));

        let err = ProtocolError::VersionMismatch {
            local: Version::new(1, 1),
            remote: Version::new(2, 0),
        };
        assert_eq!(err.to_string(), "version mismatch: local 1.1, remote 2.0");

        let err = ProtocolError::BadMagic([0x00, 0x01, 0xFF]);
        assert!(err.to_string().contains("ff"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ProtocolError::UnknownPduType(10).error_code(), "UNKNOWN_PDU_TYPE");
        assert_eq!(
            ProtocolError::BufferTooSmall {
                needed: 4,
                capacity: 2
            }
            .error_code(),
            "BUFFER_TOO_SMALL"
        );
    }
}
