//! Link and connection parameters and their TLV encoding.
//!
//! Parameters travel as a stream of `{tag: 1B, len: 1B, value: len B}`
//! records, in the body of PAX, CONNECT and CC PDUs and in the link
//! activation block handed to the activation layer.
//!
//! ```text
//! +-----+-----+----------------+-----+-----+--------+
//! | tag | len | value (len B)  | tag | len | value  | ...
//! +-----+-----+----------------+-----+-----+--------+
//! ```

use crate::error::ProtocolError;
use crate::{BASE_MIU, MAX_MIU};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Magic prefix of the link activation parameter block.
pub const ACTIVATION_MAGIC: [u8; 3] = [0x46, 0x66, 0x6D];

/// Largest MIUX this implementation advertises.
pub const MAX_LOCAL_MIUX: u16 = (MAX_MIU - BASE_MIU) as u16;

/// Significant bits of a MIUX value on the wire.
pub const MIUX_MASK: u16 = 0x07FF;

/// Significant bits of an RW value on the wire.
pub const RW_MASK: u8 = 0x0F;

/// Upper bound on an encoded parameter stream (all tags of one set).
pub const MAX_TLV_LEN: usize = 32;

/// Parameter tags.
pub mod tag {
    pub const VERSION: u8 = 0x01;
    pub const MIUX: u8 = 0x02;
    pub const WKS: u8 = 0x03;
    pub const LTO: u8 = 0x04;
    pub const RW: u8 = 0x05;
    pub const OPT: u8 = 0x07;
}

/// Protocol version, encoded on the wire as `major << 4 | minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    /// Version implemented by this crate.
    pub const CURRENT: Version = Version::new(1, 1);

    pub const fn new(major: u8, minor: u8) -> Self {
        Self {
            major: major & 0x0F,
            minor: minor & 0x0F,
        }
    }

    pub fn to_byte(self) -> u8 {
        (self.major << 4) | self.minor
    }

    pub fn from_byte(byte: u8) -> Self {
        Self::new(byte >> 4, byte & 0x0F)
    }

    /// Peers interoperate as long as their major versions agree.
    pub fn is_compatible(self, other: Version) -> bool {
        self.major == other.major
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Which tags a parameter stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSet {
    /// Link-wide parameters: PAX PDUs and the activation block.
    Link,
    /// Per-connection parameters: CONNECT and CC PDUs.
    Connection,
}

/// One side's protocol parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkParameters {
    /// Protocol version.
    pub version: Version,
    /// Maximum information unit extension, added to [`BASE_MIU`].
    pub miux: u16,
    /// Well-known service bitmap.
    pub wks: u16,
    /// Link timeout in 10 ms units.
    pub lto: u8,
    /// Receive window size.
    pub rw: u8,
    /// Option flags.
    pub opt: u8,
}

/// Parameters this side advertises.
pub type LocalParameters = LinkParameters;

/// Parameters learned from the peer.
pub type RemoteParameters = LinkParameters;

impl Default for LinkParameters {
    fn default() -> Self {
        Self {
            version: Version::CURRENT,
            miux: 0,
            // Bit 0: the link management service is always present.
            wks: 0x0001,
            lto: 10,
            rw: 1,
            opt: 0,
        }
    }
}

impl LinkParameters {
    /// Maximum information unit these parameters advertise.
    pub fn miu(&self) -> usize {
        BASE_MIU + self.miux as usize
    }

    /// Link timeout in milliseconds.
    pub fn lto_ms(&self) -> u32 {
        u32::from(self.lto) * 10
    }

    /// Encodes the tags of `set` into `out`, returning the number of bytes written.
    pub fn encode(&self, set: ParameterSet, out: &mut [u8]) -> Result<usize, ProtocolError> {
        let needed = match set {
            ParameterSet::Link => 3 + 4 + 4 + 3 + 3,
            ParameterSet::Connection => 4 + 3,
        };
        if out.len() < needed {
            return Err(ProtocolError::BufferTooSmall {
                needed,
                capacity: out.len(),
            });
        }

        let mut cursor = &mut out[..needed];
        match set {
            ParameterSet::Link => {
                cursor.put_slice(&[tag::VERSION, 1, self.version.to_byte()]);
                cursor.put_slice(&[tag::MIUX, 2]);
                cursor.put_u16(self.miux & MIUX_MASK);
                cursor.put_slice(&[tag::WKS, 2]);
                cursor.put_u16(self.wks);
                cursor.put_slice(&[tag::LTO, 1, self.lto]);
                cursor.put_slice(&[tag::OPT, 1, self.opt]);
            }
            ParameterSet::Connection => {
                cursor.put_slice(&[tag::MIUX, 2]);
                cursor.put_u16(self.miux & MIUX_MASK);
                cursor.put_slice(&[tag::RW, 1, self.rw & RW_MASK]);
            }
        }
        Ok(needed)
    }

    /// Overwrites the fields present in the TLV stream `tlvs`.
    ///
    /// Unknown tags are skipped. A known tag with the wrong length, or a
    /// record running past the end of the stream, is rejected and leaves
    /// `self` untouched.
    pub fn merge(&mut self, tlvs: &[u8]) -> Result<(), ProtocolError> {
        let mut merged = *self;
        for record in Tlvs::new(tlvs) {
            let (tag, mut value) = record?;
            let len = value.len();
            let check_len = move |want: usize| {
                if len == want {
                    Ok(())
                } else {
                    Err(ProtocolError::MalformedParameter { tag, len })
                }
            };
            match tag {
                tag::VERSION => {
                    check_len(1)?;
                    merged.version = Version::from_byte(value.get_u8());
                }
                tag::MIUX => {
                    check_len(2)?;
                    merged.miux = value.get_u16() & MIUX_MASK;
                }
                tag::WKS => {
                    check_len(2)?;
                    merged.wks = value.get_u16();
                }
                tag::LTO => {
                    check_len(1)?;
                    merged.lto = value.get_u8();
                }
                tag::RW => {
                    check_len(1)?;
                    merged.rw = value.get_u8() & RW_MASK;
                }
                tag::OPT => {
                    check_len(1)?;
                    merged.opt = value.get_u8();
                }
                _ => {}
            }
        }
        *self = merged;
        Ok(())
    }
}

/// Iterator over the `(tag, value)` records of a TLV stream.
///
/// Yields an error and stops if a record is cut short.
#[derive(Debug, Clone)]
pub struct Tlvs<'a> {
    rest: &'a [u8],
}

impl<'a> Tlvs<'a> {
    pub fn new(stream: &'a [u8]) -> Self {
        Self { rest: stream }
    }
}

impl<'a> Iterator for Tlvs<'a> {
    type Item = Result<(u8, &'a [u8]), ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        if self.rest.len() < 2 {
            let tag = self.rest[0];
            self.rest = &[];
            return Some(Err(ProtocolError::MalformedParameter { tag, len: 0 }));
        }

        let tag = self.rest.get_u8();
        let len = self.rest.get_u8() as usize;
        if self.rest.len() < len {
            let available = self.rest.len();
            self.rest = &[];
            return Some(Err(ProtocolError::MalformedParameter {
                tag,
                len: available,
            }));
        }

        let (value, rest) = self.rest.split_at(len);
        self.rest = rest;
        Some(Ok((tag, value)))
    }
}

/// Writes the activation block (magic + link parameters) into `out`.
pub fn encode_activation_block(
    params: &LinkParameters,
    out: &mut [u8],
) -> Result<usize, ProtocolError> {
    if out.len() < ACTIVATION_MAGIC.len() {
        return Err(ProtocolError::BufferTooSmall {
            needed: ACTIVATION_MAGIC.len(),
            capacity: out.len(),
        });
    }
    out[..ACTIVATION_MAGIC.len()].copy_from_slice(&ACTIVATION_MAGIC);
    let written = params.encode(ParameterSet::Link, &mut out[ACTIVATION_MAGIC.len()..])?;
    Ok(ACTIVATION_MAGIC.len() + written)
}

/// Checks the magic prefix of an activation block and returns its TLV stream.
pub fn activation_tlvs(block: &[u8]) -> Result<&[u8], ProtocolError> {
    if block.len() < ACTIVATION_MAGIC.len() {
        return Err(ProtocolError::Truncated {
            needed: ACTIVATION_MAGIC.len(),
            actual: block.len(),
        });
    }
    let (magic, tlvs) = block.split_at(ACTIVATION_MAGIC.len());
    if magic != ACTIVATION_MAGIC {
        return Err(ProtocolError::BadMagic([magic[0], magic[1], magic[2]]));
    }
    Ok(tlvs)
}
