//! Per-connection state.
//!
//! A [`Connection`] is one logical data link multiplexed over the link. It
//! carries the four modulo-16 state variables, the negotiated payload limit
//! and window, the two service-facing mailboxes and the pending local intent.
//!
//! ```text
//!  Disconnected ──connect()/CONNECT──▶ Connecting ──CC──▶ Connected
//!       ▲                                                   │
//!       └──────────────── DM / remove() ◀── DISC ───────────┘
//! ```

use crate::error::CoreError;
use llcp_protocol::{DisconnectReason, SeqNum, SAP_LINK_MANAGEMENT};
use serde::Serialize;
use std::fmt;

/// Capacity of each mailbox in bytes.
pub const MAILBOX_CAPACITY: usize = 1024;

/// Stable handle to a connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(pub(crate) u8);

impl ConnectionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fixed-capacity byte buffer shared between the engine and a service.
///
/// `pending` tells the other side there is something to pick up: outbound
/// data waiting to be segmented, or inbound data waiting to be read.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    buffer: heapless::Vec<u8, MAILBOX_CAPACITY>,
    pending: bool,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Bytes that can still be appended.
    pub fn remaining(&self) -> usize {
        MAILBOX_CAPACITY - self.buffer.len()
    }

    /// Appends `data` and marks the mailbox pending. Nothing is written if
    /// `data` does not fit entirely.
    pub fn push(&mut self, data: &[u8]) -> Result<(), CoreError> {
        self.buffer
            .extend_from_slice(data)
            .map_err(|_| CoreError::MailboxFull {
                len: self.buffer.len(),
                extra: data.len(),
                capacity: MAILBOX_CAPACITY,
            })?;
        if !self.buffer.is_empty() {
            self.pending = true;
        }
        Ok(())
    }

    /// Drops the first `count` bytes, shifting the rest to the front.
    /// Clears `pending` once the mailbox is empty.
    pub fn consume_front(&mut self, count: usize) {
        let count = count.min(self.buffer.len());
        let remaining = self.buffer.len() - count;
        self.buffer.copy_within(count.., 0);
        self.buffer.truncate(remaining);
        if self.buffer.is_empty() {
            self.pending = false;
        }
    }

    /// Copies as much as fits into `out`, consumes it, and returns the count.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.buffer.len());
        out[..count].copy_from_slice(&self.buffer[..count]);
        self.consume_front(count);
        count
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending = false;
    }
}

/// Locally requested transition not yet completed by the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    #[default]
    None,
    ConnectRequested,
    DisconnectRequested,
}

/// Coarse lifecycle state derived from the status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Status flags of a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Status {
    /// CONNECT/CC handshake completed.
    pub connected: bool,
    /// Our CONNECT is on the wire, waiting for CC or DM.
    pub connect_asked: bool,
    /// Our DISC is on the wire, waiting for DM.
    pub disconnect_asked: bool,
    /// The peer sent DISC; the connection stays up until removed locally.
    pub disconnect_received: bool,
}

/// Reply generated while handling an inbound PDU, sent on the next turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    ConnectionComplete,
    DisconnectedMode(DisconnectReason),
    ReceiveReady(SeqNum),
    ReceiveNotReady(SeqNum),
}

/// A reply together with the addresses it goes out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedReply {
    pub dsap: u8,
    pub ssap: u8,
    pub reply: Reply,
}

/// One logical data link connection.
#[derive(Debug, Clone)]
pub struct Connection {
    local: u8,
    remote: u8,
    /// Send state variable V(S).
    pub(crate) v_s: SeqNum,
    /// Last send sequence acknowledged by the peer, V(SA).
    pub(crate) v_sa: SeqNum,
    /// Receive state variable V(R).
    pub(crate) v_r: SeqNum,
    /// Last receive sequence we acknowledged, V(RA).
    pub(crate) v_ra: SeqNum,
    pub(crate) miu: usize,
    pub(crate) remote_miux: u16,
    pub(crate) window: u8,
    outbound: Mailbox,
    inbound: Mailbox,
    pub(crate) intent: Intent,
    pub(crate) status: Status,
    pub(crate) reply: Option<QueuedReply>,
}

impl Connection {
    /// Creates a connection with zeroed sequence state.
    pub(crate) fn new(local: u8, remote: u8, miu: usize, remote_miux: u16, window: u8) -> Self {
        Self {
            local,
            remote,
            v_s: SeqNum::default(),
            v_sa: SeqNum::default(),
            v_r: SeqNum::default(),
            v_ra: SeqNum::default(),
            miu,
            remote_miux,
            window,
            outbound: Mailbox::new(),
            inbound: Mailbox::new(),
            intent: Intent::None,
            status: Status::default(),
            reply: None,
        }
    }

    /// The reserved 0↔0 link management connection.
    pub(crate) fn management(miu: usize) -> Self {
        let mut connection = Self::new(SAP_LINK_MANAGEMENT, SAP_LINK_MANAGEMENT, miu, 0, 0);
        connection.status.connected = true;
        connection
    }

    pub fn local(&self) -> u8 {
        self.local
    }

    pub fn remote(&self) -> u8 {
        self.remote
    }

    pub fn is_management(&self) -> bool {
        self.local == SAP_LINK_MANAGEMENT && self.remote == SAP_LINK_MANAGEMENT
    }

    pub fn send_seq(&self) -> SeqNum {
        self.v_s
    }

    pub fn send_ack_seq(&self) -> SeqNum {
        self.v_sa
    }

    pub fn recv_seq(&self) -> SeqNum {
        self.v_r
    }

    pub fn recv_ack_seq(&self) -> SeqNum {
        self.v_ra
    }

    /// Effective maximum information unit for outbound I PDUs.
    pub fn miu(&self) -> usize {
        self.miu
    }

    /// Peer's receive window.
    pub fn window(&self) -> u8 {
        self.window
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status.connected
    }

    pub fn state(&self) -> ConnectionState {
        if self.status.connected {
            ConnectionState::Connected
        } else if self.intent == Intent::ConnectRequested {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Data queued by the service for the peer.
    pub fn outbound(&self) -> &Mailbox {
        &self.outbound
    }

    pub fn outbound_mut(&mut self) -> &mut Mailbox {
        &mut self.outbound
    }

    /// Data received from the peer, waiting for the service.
    pub fn inbound(&self) -> &Mailbox {
        &self.inbound
    }

    pub fn inbound_mut(&mut self) -> &mut Mailbox {
        &mut self.inbound
    }

    /// I PDUs sent and not yet acknowledged.
    pub fn unacknowledged(&self) -> u8 {
        self.v_s.distance_from(self.v_sa)
    }

    /// Whether another I PDU fits in the peer's window.
    pub fn window_open(&self) -> bool {
        self.unacknowledged() < self.window
    }

    /// Binds the peer address and restarts sequencing, as on CONNECT receipt.
    pub(crate) fn bind_remote(&mut self, remote: u8) {
        self.remote = remote;
        self.reset_sequence();
    }

    pub(crate) fn reset_sequence(&mut self) {
        self.v_s = SeqNum::default();
        self.v_sa = SeqNum::default();
        self.v_r = SeqNum::default();
        self.v_ra = SeqNum::default();
    }

    /// Applies an acknowledgment N(R) from the peer.
    ///
    /// Returns false, leaving V(SA) unchanged, if `nr` lies outside the range
    /// of sent-but-unacknowledged sequence numbers.
    pub(crate) fn acknowledge(&mut self, nr: SeqNum) -> bool {
        if nr.distance_from(self.v_sa) > self.unacknowledged() {
            return false;
        }
        self.v_sa = nr;
        true
    }

    pub(crate) fn queue_reply(&mut self, reply: Reply) {
        self.queue_reply_to(self.remote, self.local, reply);
    }

    pub(crate) fn queue_reply_to(&mut self, dsap: u8, ssap: u8, reply: Reply) {
        if let Some(previous) = self.reply {
            tracing::warn!(
                "connection {}<->{}: replacing unsent reply {:?}",
                self.local,
                self.remote,
                previous.reply
            );
        }
        self.reply = Some(QueuedReply { dsap, ssap, reply });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mailbox_push_and_consume() {
        let mut mailbox = Mailbox::new();
        assert!(!mailbox.is_pending());

        mailbox.push(b"hello world").unwrap();
        assert!(mailbox.is_pending());
        assert_eq!(mailbox.len(), 11);

        mailbox.consume_front(6);
        assert_eq!(mailbox.as_slice(), b"world");
        assert!(mailbox.is_pending());

        mailbox.consume_front(100);
        assert!(mailbox.is_empty());
        assert!(!mailbox.is_pending());
    }

    #[test]
    fn test_mailbox_rejects_overflow_without_partial_write() {
        let mut mailbox = Mailbox::new();
        mailbox.push(&[0u8; MAILBOX_CAPACITY - 4]).unwrap();

        let result = mailbox.push(&[1u8; 5]);
        assert!(matches!(
            result,
            Err(CoreError::MailboxFull {
                len,
                extra: 5,
                capacity: MAILBOX_CAPACITY
            }) if len == MAILBOX_CAPACITY - 4
        ));
        assert_eq!(mailbox.remaining(), 4);
    }

    #[test]
    fn test_mailbox_drain_into() {
        let mut mailbox = Mailbox::new();
        mailbox.push(b"abcdef").unwrap();

        let mut out = [0u8; 4];
        assert_eq!(mailbox.drain_into(&mut out), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(mailbox.as_slice(), b"ef");

        let mut out = [0u8; 8];
        assert_eq!(mailbox.drain_into(&mut out), 2);
        assert!(!mailbox.is_pending());
    }

    #[test]
    fn test_new_connection_is_zeroed() {
        let connection = Connection::new(0x10, 0x20, 128, 0, 1);
        assert_eq!(connection.send_seq().value(), 0);
        assert_eq!(connection.recv_seq().value(), 0);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(connection.window_open());
    }

    #[test]
    fn test_window_accounting() {
        let mut connection = Connection::new(0x10, 0x10, 128, 0, 2);
        connection.v_s.increment();
        assert!(connection.window_open());
        connection.v_s.increment();
        assert!(!connection.window_open());

        assert!(connection.acknowledge(SeqNum::new(1)));
        assert_eq!(connection.unacknowledged(), 1);
        assert!(connection.window_open());
    }

    #[test]
    fn test_acknowledge_rejects_out_of_range() {
        let mut connection = Connection::new(0x10, 0x10, 128, 0, 4);
        connection.v_s = SeqNum::new(2);
        assert!(!connection.acknowledge(SeqNum::new(5)));
        assert_eq!(connection.send_ack_seq().value(), 0);
        assert!(connection.acknowledge(SeqNum::new(2)));
        assert_eq!(connection.unacknowledged(), 0);
    }

    #[test]
    fn test_bind_remote_resets_sequence() {
        let mut connection = Connection::new(0x10, 0x10, 128, 0, 1);
        connection.v_s = SeqNum::new(3);
        connection.v_r = SeqNum::new(7);
        connection.bind_remote(0x21);
        assert_eq!(connection.remote(), 0x21);
        assert_eq!(connection.send_seq().value(), 0);
        assert_eq!(connection.recv_seq().value(), 0);
    }

    #[test]
    fn test_management_connection() {
        let connection = Connection::management(128);
        assert!(connection.is_management());
        assert!(connection.is_connected());
    }

    proptest! {
        #[test]
        fn prop_windowed_sends_never_exceed_window(window in 1u8..=15, acks in proptest::collection::vec(any::<bool>(), 0..100)) {
            let mut connection = Connection::new(0x10, 0x10, 128, 0, window);
            let mut sent = 0usize;
            for ack in acks {
                if ack {
                    let nr = connection.v_s;
                    prop_assert!(connection.acknowledge(nr));
                } else if connection.window_open() {
                    connection.v_s.increment();
                    sent += 1;
                }
                prop_assert!(connection.unacknowledged() <= window);
            }
            let nr = connection.v_s;
            prop_assert!(connection.acknowledge(nr));
            prop_assert_eq!(connection.send_seq().value() as usize, sent % 16);
            prop_assert_eq!(connection.send_ack_seq(), connection.send_seq());
        }
    }
}
