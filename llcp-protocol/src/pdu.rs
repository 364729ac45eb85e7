//! PDU header codec.
//!
//! Every PDU starts with a 2-byte header packing the destination address,
//! the PDU type and the source address. Sequenced PDUs (I, RR, RNR) carry a
//! third byte with the send and receive sequence numbers.
//!
//! ```text
//!  byte 0                  byte 1                  byte 2 (sequenced only)
//! +-----------+-----+     +-----+-----------+     +---------+---------+
//! | DSAP (6)  | PT  |     | PT  | SSAP (6)  |     | N(S) (4)| N(R) (4)|
//! |           | hi2 |     | lo2 |           |     |         |         |
//! +-----------+-----+     +-----+-----------+     +---------+---------+
//! ```
//!
//! The body that follows depends on the type: parameter TLVs for PAX,
//! CONNECT and CC, a single reason byte for DM, raw payload for UI and I.

use crate::error::ProtocolError;
use crate::sequence::SeqNum;
use crate::MAX_SAP;
use bytes::{Buf, BufMut};
use std::fmt;

/// Size of the unsequenced header in bytes.
pub const HEADER_LEN: usize = 2;

/// Size of the header of I, RR and RNR PDUs (header + sequence byte).
pub const SEQUENCED_HEADER_LEN: usize = 3;

/// Largest value the 4-bit type field can hold.
pub const MAX_PTYPE: u8 = 0x0F;

/// PDU type, as carried in the 4-bit type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PduType {
    /// Symmetry: idle keep-alive filler.
    Symm = 0x0,
    /// Parameter exchange.
    Pax = 0x1,
    /// Aggregated frame.
    Agf = 0x2,
    /// Unnumbered information (connectionless).
    Ui = 0x3,
    /// Connection request.
    Connect = 0x4,
    /// Disconnect.
    Disc = 0x5,
    /// Connection complete.
    Cc = 0x6,
    /// Disconnected mode.
    Dm = 0x7,
    /// Frame reject.
    Frmr = 0x8,
    /// Service name lookup.
    Snl = 0x9,
    /// Information (sequenced).
    I = 0xC,
    /// Receive ready.
    Rr = 0xD,
    /// Receive not ready.
    Rnr = 0xE,
}

impl TryFrom<u8> for PduType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(PduType::Symm),
            0x1 => Ok(PduType::Pax),
            0x2 => Ok(PduType::Agf),
            0x3 => Ok(PduType::Ui),
            0x4 => Ok(PduType::Connect),
            0x5 => Ok(PduType::Disc),
            0x6 => Ok(PduType::Cc),
            0x7 => Ok(PduType::Dm),
            0x8 => Ok(PduType::Frmr),
            0x9 => Ok(PduType::Snl),
            0xC => Ok(PduType::I),
            0xD => Ok(PduType::Rr),
            0xE => Ok(PduType::Rnr),
            _ => Err(ProtocolError::UnknownPduType(value)),
        }
    }
}

impl PduType {
    /// Returns true if this type carries the N(S)/N(R) sequence byte.
    pub fn is_sequenced(self) -> bool {
        matches!(self, PduType::I | PduType::Rr | PduType::Rnr)
    }

    pub fn name(self) -> &'static str {
        match self {
            PduType::Symm => "SYMM",
            PduType::Pax => "PAX",
            PduType::Agf => "AGF",
            PduType::Ui => "UI",
            PduType::Connect => "CONNECT",
            PduType::Disc => "DISC",
            PduType::Cc => "CC",
            PduType::Dm => "DM",
            PduType::Frmr => "FRMR",
            PduType::Snl => "SNL",
            PduType::I => "I",
            PduType::Rr => "RR",
            PduType::Rnr => "RNR",
        }
    }
}

impl fmt::Display for PduType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Packs `dsap`, `ptype` and `ssap` into the first two bytes of `out`.
///
/// Addresses must fit in 6 bits and the type in 4 bits; wider values are a
/// caller bug and are only checked in debug builds.
pub fn encode_header(dsap: u8, ptype: u8, ssap: u8, out: &mut [u8]) -> Result<usize, ProtocolError> {
    debug_assert!(dsap <= MAX_SAP, "dsap {dsap} exceeds 6 bits");
    debug_assert!(ssap <= MAX_SAP, "ssap {ssap} exceeds 6 bits");
    debug_assert!(ptype <= MAX_PTYPE, "ptype {ptype} exceeds 4 bits");

    if out.len() < HEADER_LEN {
        return Err(ProtocolError::BufferTooSmall {
            needed: HEADER_LEN,
            capacity: out.len(),
        });
    }

    let mut cursor = &mut out[..HEADER_LEN];
    cursor.put_u8((dsap << 2) | (ptype >> 2));
    cursor.put_u8(((ptype & 0x03) << 6) | ssap);
    Ok(HEADER_LEN)
}

/// Unpacks the first two bytes of `buf` into `(dsap, ptype, ssap)`.
pub fn decode_header(buf: &[u8]) -> Result<(u8, u8, u8), ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            needed: HEADER_LEN,
            actual: buf.len(),
        });
    }

    let mut cursor = buf;
    let hi = cursor.get_u8();
    let lo = cursor.get_u8();
    let dsap = hi >> 2;
    let ptype = ((hi & 0x03) << 2) | (lo >> 6);
    let ssap = lo & MAX_SAP;
    Ok((dsap, ptype, ssap))
}

/// Decoded PDU header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Destination service access point.
    pub dsap: u8,
    /// PDU type.
    pub ptype: PduType,
    /// Source service access point.
    pub ssap: u8,
}

impl Header {
    pub const fn new(dsap: u8, ptype: PduType, ssap: u8) -> Self {
        Self { dsap, ptype, ssap }
    }

    /// Size of this header on the wire, including the sequence byte if any.
    pub fn encoded_len(&self) -> usize {
        if self.ptype.is_sequenced() {
            SEQUENCED_HEADER_LEN
        } else {
            HEADER_LEN
        }
    }
}

/// Sequence byte of I, RR and RNR PDUs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sequence {
    /// Send sequence number N(S). Zero for RR/RNR.
    pub ns: SeqNum,
    /// Receive sequence number N(R): next N(S) expected from the peer.
    pub nr: SeqNum,
}

impl Sequence {
    pub const fn new(ns: SeqNum, nr: SeqNum) -> Self {
        Self { ns, nr }
    }

    /// Acknowledgment-only sequence byte for RR/RNR.
    pub const fn ack(nr: SeqNum) -> Self {
        Self {
            ns: SeqNum::new(0),
            nr,
        }
    }

    pub fn to_byte(self) -> u8 {
        (self.ns.value() << 4) | self.nr.value()
    }

    pub fn from_byte(byte: u8) -> Self {
        Self {
            ns: SeqNum::new(byte >> 4),
            nr: SeqNum::new(byte),
        }
    }
}

/// A parsed PDU borrowing its body from the receive buffer.
///
/// Only scalars are extracted; the body slice must be consumed (copied into
/// a mailbox or merged into parameters) before the buffer is reused for the
/// reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pdu<'a> {
    pub header: Header,
    /// Present exactly when `header.ptype.is_sequenced()`.
    pub sequence: Option<Sequence>,
    pub body: &'a [u8],
}

impl<'a> Pdu<'a> {
    /// Parses a complete PDU from `buf`.
    pub fn parse(buf: &'a [u8]) -> Result<Self, ProtocolError> {
        let (dsap, ptype, ssap) = decode_header(buf)?;
        let ptype = PduType::try_from(ptype)?;
        let header = Header::new(dsap, ptype, ssap);

        let mut rest = &buf[HEADER_LEN..];
        let sequence = if ptype.is_sequenced() {
            if !rest.has_remaining() {
                return Err(ProtocolError::Truncated {
                    needed: SEQUENCED_HEADER_LEN,
                    actual: buf.len(),
                });
            }
            Some(Sequence::from_byte(rest.get_u8()))
        } else {
            None
        };

        Ok(Self {
            header,
            sequence,
            body: rest,
        })
    }
}

/// Writes a complete PDU into `out` and returns its length.
///
/// Sequenced types without an explicit `sequence` get an all-zero sequence
/// byte.
pub fn write_pdu(
    out: &mut [u8],
    header: Header,
    sequence: Option<Sequence>,
    body: &[u8],
) -> Result<usize, ProtocolError> {
    let total = header.encoded_len() + body.len();
    if out.len() < total {
        return Err(ProtocolError::BufferTooSmall {
            needed: total,
            capacity: out.len(),
        });
    }

    encode_header(header.dsap, header.ptype as u8, header.ssap, out)?;
    let mut cursor = &mut out[HEADER_LEN..total];
    if header.ptype.is_sequenced() {
        cursor.put_u8(sequence.unwrap_or_default().to_byte());
    }
    cursor.put_slice(body);
    Ok(total)
}

/// Reason byte carried by a DM PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Reply to a DISC.
    DisconnectReceived,
    /// A connection-oriented PDU arrived for an address pair with no connection.
    NoActiveConnection,
    /// CONNECT addressed to an address with no service registered.
    NoServiceBound,
    /// CONNECT refused, e.g. because the connection table is full.
    ConnectionRejected,
    /// Any other reason code sent by the peer.
    Other(u8),
}

impl DisconnectReason {
    pub fn to_byte(self) -> u8 {
        match self {
            DisconnectReason::DisconnectReceived => 0x00,
            DisconnectReason::NoActiveConnection => 0x01,
            DisconnectReason::NoServiceBound => 0x02,
            DisconnectReason::ConnectionRejected => 0x03,
            DisconnectReason::Other(code) => code,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => DisconnectReason::DisconnectReceived,
            0x01 => DisconnectReason::NoActiveConnection,
            0x02 => DisconnectReason::NoServiceBound,
            0x03 => DisconnectReason::ConnectionRejected,
            code => DisconnectReason::Other(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::DisconnectReceived => write!(f, "disconnect received"),
            DisconnectReason::NoActiveConnection => write!(f, "no active connection"),
            DisconnectReason::NoServiceBound => write!(f, "no service bound"),
            DisconnectReason::ConnectionRejected => write!(f, "connection rejected"),
            DisconnectReason::Other(code) => write!(f, "reason {code:#04x}"),
        }
    }
}
