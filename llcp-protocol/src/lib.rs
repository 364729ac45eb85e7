//! # llcp-protocol
//!
//! Wire format for the llcp logical link engine.
//!
//! This crate provides:
//! - The 2/3-byte PDU header codec and PDU type table
//! - Modulo-16 sequence counters
//! - Parameter TLV encoding/decoding and the link activation block
//! - Protocol error type
//!
//! No I/O and no allocation happen here; everything encodes into or parses
//! from caller-provided slices.

pub mod error;
pub mod params;
pub mod pdu;
pub mod sequence;

pub use error::ProtocolError;
pub use params::{
    LinkParameters, LocalParameters, ParameterSet, RemoteParameters, Tlvs, Version,
    ACTIVATION_MAGIC, MAX_LOCAL_MIUX, MAX_TLV_LEN,
};
pub use pdu::{
    decode_header, encode_header, write_pdu, DisconnectReason, Header, Pdu, PduType, Sequence,
    HEADER_LEN, SEQUENCED_HEADER_LEN,
};
pub use sequence::SeqNum;

/// Largest service access point address (6 bits).
pub const MAX_SAP: u8 = 0x3F;

/// Address of the link management connection.
pub const SAP_LINK_MANAGEMENT: u8 = 0x00;

/// Address of the service discovery endpoint.
pub const SAP_SERVICE_DISCOVERY: u8 = 0x01;

/// Base maximum information unit, before the negotiated extension.
pub const BASE_MIU: usize = 128;

/// Largest information unit this implementation sends or accepts.
pub const MAX_MIU: usize = 256;

/// Capacity of a frame buffer: sequenced header plus a full information unit.
pub const MAX_FRAME_LEN: usize = SEQUENCED_HEADER_LEN + MAX_MIU;
