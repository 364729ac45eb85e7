//! Modulo-16 sequence counters.
//!
//! The send and receive state variables of a data link connection (V(S),
//! V(SA), V(R), V(RA)) and the N(S)/N(R) fields of sequenced PDUs are all
//! 4-bit values that wrap at 16.

use serde::Serialize;
use std::fmt;

/// A 4-bit sequence number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SeqNum(u8);

impl SeqNum {
    /// Number of distinct sequence values.
    pub const MODULUS: u8 = 16;

    const MASK: u8 = Self::MODULUS - 1;

    /// Creates a sequence number, discarding bits above the low nibble.
    pub const fn new(value: u8) -> Self {
        Self(value & Self::MASK)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    /// Returns the successor, wrapping 15 to 0.
    pub const fn next(self) -> Self {
        Self::new(self.0.wrapping_add(1))
    }

    /// Advances this counter by one.
    pub fn increment(&mut self) {
        *self = self.next();
    }

    /// Number of steps from `earlier` forward to `self`, modulo 16.
    pub const fn distance_from(self, earlier: SeqNum) -> u8 {
        self.0.wrapping_sub(earlier.0) & Self::MASK
    }
}

impl From<u8> for SeqNum {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
