//! Link session tests
//!
//! Two engines joined by an in-memory link: the initiator drives turns with
//! `tick`, the target answers every frame through `on_frame`.

use std::cell::RefCell;
use std::rc::Rc;

use llcp_core::{
    Connection, ConnectionId, ConnectionState, CoreError, DirectLink, Engine, Intent, LinkError,
    Service, Transceiver, MAILBOX_CAPACITY, MANAGEMENT_ID,
};
use llcp_protocol::{
    write_pdu, DisconnectReason, Header, LocalParameters, Pdu, PduType, ProtocolError, SeqNum,
    Sequence, Version, MAX_FRAME_LEN,
};

const SERVICE: u8 = 0x10;

#[derive(Clone, Default)]
struct Recorder {
    events: Rc<RefCell<Vec<String>>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }
}

impl Service for Recorder {
    fn on_connect(&mut self, _id: ConnectionId, connection: &mut Connection) {
        self.events
            .borrow_mut()
            .push(format!("connect {}", connection.local()));
    }

    fn on_disconnect(&mut self, _id: ConnectionId, connection: &mut Connection) {
        self.events
            .borrow_mut()
            .push(format!("disconnect {}", connection.local()));
    }
}

/// Forwards to the target engine and records both directions.
struct Tap<'a> {
    peer: &'a mut Engine<Recorder>,
    sent: &'a mut Vec<Vec<u8>>,
    replies: &'a mut Vec<Vec<u8>>,
}

impl Transceiver for Tap<'_> {
    fn exchange(&mut self, frame: &[u8], reply: &mut [u8]) -> Result<usize, LinkError> {
        self.sent.push(frame.to_vec());
        let len = DirectLink::new(&mut *self.peer).exchange(frame, reply)?;
        self.replies.push(reply[..len].to_vec());
        Ok(len)
    }
}

/// Link that fails every exchange.
struct DeadLink;

impl Transceiver for DeadLink {
    fn exchange(&mut self, _frame: &[u8], _reply: &mut [u8]) -> Result<usize, LinkError> {
        Err(LinkError::new("field lost"))
    }
}

/// Link whose peer always answers with the same canned frame.
struct CannedLink(Vec<u8>);

impl Transceiver for CannedLink {
    fn exchange(&mut self, _frame: &[u8], reply: &mut [u8]) -> Result<usize, LinkError> {
        reply[..self.0.len()].copy_from_slice(&self.0);
        Ok(self.0.len())
    }
}

struct Pair {
    initiator: Engine<Recorder>,
    target: Engine<Recorder>,
    initiator_events: Recorder,
    target_events: Recorder,
    sent: Vec<Vec<u8>>,
    replies: Vec<Vec<u8>>,
}

impl Pair {
    fn new() -> Self {
        Self::with_parameters(LocalParameters::default(), LocalParameters::default())
    }

    fn with_parameters(initiator: LocalParameters, target: LocalParameters) -> Self {
        let mut pair = Self {
            initiator: Engine::new(initiator),
            target: Engine::new(target),
            initiator_events: Recorder::default(),
            target_events: Recorder::default(),
            sent: Vec::new(),
            replies: Vec::new(),
        };

        let mut block = [0u8; 64];
        let len = pair.target.activation_bytes(&mut block).unwrap();
        pair.initiator.activate(&block[..len]).unwrap();
        let len = pair.initiator.activation_bytes(&mut block).unwrap();
        pair.target.activate(&block[..len]).unwrap();
        pair
    }

    fn register_both(&mut self, address: u8) {
        self.initiator
            .register_service(address, self.initiator_events.clone())
            .unwrap();
        self.target
            .register_service(address, self.target_events.clone())
            .unwrap();
    }

    fn turn(&mut self) -> Result<(), CoreError> {
        let mut tap = Tap {
            peer: &mut self.target,
            sent: &mut self.sent,
            replies: &mut self.replies,
        };
        self.initiator.tick(&mut tap)
    }

    fn turns(&mut self, count: usize) {
        for _ in 0..count {
            self.turn().unwrap();
        }
    }

    /// Registers SERVICE on both sides and completes CONNECT/CC.
    fn connected() -> (Self, ConnectionId, ConnectionId) {
        let mut pair = Self::new();
        pair.register_both(SERVICE);
        let initiator_id = pair.initiator.connect(SERVICE).unwrap();
        pair.turn().unwrap();
        let target_id = pair.target_connection(SERVICE).unwrap();
        pair.sent.clear();
        pair.replies.clear();
        (pair, initiator_id, target_id)
    }

    fn target_connection(&self, local: u8) -> Option<ConnectionId> {
        self.target
            .connections()
            .find(|(_, c)| c.local() == local)
            .map(|(id, _)| id)
    }
}

fn pdu(frame: &[u8]) -> Pdu<'_> {
    Pdu::parse(frame).unwrap()
}

fn frame(header: Header, sequence: Option<Sequence>, body: &[u8]) -> ([u8; MAX_FRAME_LEN], usize) {
    let mut buf = [0u8; MAX_FRAME_LEN];
    let len = write_pdu(&mut buf, header, sequence, body).unwrap();
    (buf, len)
}

#[test]
fn connect_emits_connect_and_completes_on_cc() {
    let mut pair = Pair::new();
    pair.register_both(SERVICE);
    let id = pair.initiator.connect(SERVICE).unwrap();
    assert_eq!(
        pair.initiator.connection(id).unwrap().state(),
        ConnectionState::Connecting
    );

    pair.turn().unwrap();

    let connect = pdu(&pair.sent[0]);
    assert_eq!(connect.header.ptype, PduType::Connect);
    assert_eq!((connect.header.dsap, connect.header.ssap), (SERVICE, SERVICE));
    assert_eq!(pdu(&pair.replies[0]).header.ptype, PduType::Cc);

    let connection = pair.initiator.connection(id).unwrap();
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(connection.intent(), Intent::None);
    assert_eq!(connection.send_seq().value(), 0);
    assert_eq!(connection.recv_seq().value(), 0);

    let target_id = pair.target_connection(SERVICE).unwrap();
    let remote = pair.target.connection(target_id).unwrap();
    assert!(remote.is_connected());
    assert_eq!(remote.remote(), SERVICE);

    assert_eq!(pair.initiator_events.events(), ["connect 16"]);
    assert_eq!(pair.target_events.events(), ["connect 16"]);
}

#[test]
fn three_hundred_bytes_become_three_information_frames() {
    let (mut pair, id, target_id) = Pair::connected();
    pair.initiator.send(id, &[0x5A; 300]).unwrap();

    pair.turns(4);

    let information: Vec<(u8, usize)> = pair
        .sent
        .iter()
        .map(|f| pdu(f))
        .filter(|p| p.header.ptype == PduType::I)
        .map(|p| (p.sequence.unwrap().ns.value(), p.body.len()))
        .collect();
    assert_eq!(information, vec![(0, 128), (1, 128), (2, 44)]);
    assert_eq!(pdu(&pair.sent[3]).header.ptype, PduType::Symm);

    let mut received = [0u8; 400];
    let len = pair.target.receive(target_id, &mut received).unwrap();
    assert_eq!(len, 300);
    assert!(received[..len].iter().all(|b| *b == 0x5A));
}

#[test]
fn acknowledged_frames_keep_counters_in_step() {
    let (mut pair, id, target_id) = Pair::connected();

    for n in 1..=20usize {
        pair.initiator.send(id, &[n as u8; 10]).unwrap();
        pair.turn().unwrap();

        let expected = (n % 16) as u8;
        let sender = pair.initiator.connection(id).unwrap();
        assert_eq!(sender.send_seq().value(), expected);
        assert_eq!(sender.send_ack_seq().value(), expected);

        let receiver = pair.target.connection(target_id).unwrap();
        assert_eq!(receiver.recv_seq().value(), expected);
        assert_eq!(receiver.recv_ack_seq().value(), expected);
    }
    assert_eq!(pair.initiator.stats().info_frames_sent, 20);
    assert_eq!(pair.target.stats().info_bytes_received, 200);
}

#[test]
fn target_data_flows_back_with_acknowledgments() {
    let (mut pair, id, target_id) = Pair::connected();
    pair.target.send(target_id, b"pong").unwrap();

    // SYMM out, I back; then RR out, SYMM back.
    pair.turns(2);
    assert_eq!(pdu(&pair.replies[0]).header.ptype, PduType::I);
    assert_eq!(pdu(&pair.sent[1]).header.ptype, PduType::Rr);

    let mut out = [0u8; 8];
    assert_eq!(pair.initiator.receive(id, &mut out).unwrap(), 4);
    assert_eq!(&out[..4], b"pong");
    assert_eq!(
        pair.target.connection(target_id).unwrap().send_ack_seq().value(),
        1
    );
}

#[test]
fn disc_is_answered_with_dm_and_keeps_remote_connected() {
    let (mut pair, id, target_id) = Pair::connected();
    pair.initiator.disconnect(id).unwrap();

    pair.turn().unwrap();

    assert_eq!(pdu(&pair.sent[0]).header.ptype, PduType::Disc);
    let dm = pdu(&pair.replies[0]);
    assert_eq!(dm.header.ptype, PduType::Dm);
    assert_eq!(
        DisconnectReason::from_byte(dm.body[0]),
        DisconnectReason::DisconnectReceived
    );

    // Initiator tore down on DM.
    assert!(pair.initiator.connection(id).is_err());
    assert_eq!(pair.initiator_events.events(), ["connect 16", "disconnect 16"]);

    // Receiving DISC does not clear the connected flag on the target; the
    // service removes the connection itself.
    let remote = pair.target.connection(target_id).unwrap();
    assert!(remote.is_connected());
    assert!(remote.status().disconnect_received);

    pair.target.remove(target_id);
    assert_eq!(pair.target_events.events(), ["connect 16", "disconnect 16"]);
}

#[test]
fn target_initiated_disconnect() {
    let (mut pair, id, target_id) = Pair::connected();
    pair.target.disconnect(target_id).unwrap();

    // SYMM out, DISC back; DM out.
    pair.turns(2);
    assert_eq!(pdu(&pair.replies[0]).header.ptype, PduType::Disc);
    assert_eq!(pdu(&pair.sent[1]).header.ptype, PduType::Dm);

    assert!(pair.target.connection(target_id).is_err());
    assert!(pair.initiator.connection(id).unwrap().status().disconnect_received);
}

#[test]
fn connect_to_full_table_is_rejected() {
    let mut pair = Pair::new();
    for address in 0x20..0x27 {
        pair.target
            .register_service(address, Recorder::default())
            .unwrap();
        pair.target.connect(address).unwrap();
    }
    pair.register_both(SERVICE);
    let id = pair.initiator.connect(SERVICE).unwrap();

    pair.turn().unwrap();

    let dm = pdu(&pair.replies[0]);
    assert_eq!(dm.header.ptype, PduType::Dm);
    assert_eq!((dm.header.dsap, dm.header.ssap), (SERVICE, SERVICE));
    assert_eq!(
        DisconnectReason::from_byte(dm.body[0]),
        DisconnectReason::ConnectionRejected
    );
    assert!(pair.initiator.connection(id).is_err());
    assert!(pair.target_connection(SERVICE).is_none());
}

#[test]
fn connect_to_unbound_address_gets_no_service_bound() {
    let mut pair = Pair::new();
    pair.initiator
        .register_service(0x21, Recorder::default())
        .unwrap();
    let id = pair.initiator.connect(0x21).unwrap();

    pair.turn().unwrap();

    let dm = pdu(&pair.replies[0]);
    assert_eq!(
        DisconnectReason::from_byte(dm.body[0]),
        DisconnectReason::NoServiceBound
    );
    assert!(pair.initiator.connection(id).is_err());
}

#[test]
fn information_for_unknown_pair_gets_no_active_connection() {
    let mut target = Engine::<Recorder>::new(LocalParameters::default());
    let (mut buf, mut len) = frame(
        Header::new(0x30, PduType::I, 0x31),
        Some(Sequence::default()),
        b"stray",
    );

    target.on_frame(&mut buf, &mut len).unwrap();

    let reply = pdu(&buf[..len]);
    assert_eq!(reply.header.ptype, PduType::Dm);
    assert_eq!((reply.header.dsap, reply.header.ssap), (0x31, 0x30));
    assert_eq!(reply.body, &[0x01]);
}

#[test]
fn unnumbered_information_lands_in_inbound_mailbox() {
    let (mut pair, _, target_id) = Pair::connected();
    let (mut buf, mut len) = frame(Header::new(SERVICE, PduType::Ui, SERVICE), None, b"hello");

    pair.target.on_frame(&mut buf, &mut len).unwrap();

    assert_eq!(pdu(&buf[..len]).header.ptype, PduType::Symm);
    let connection = pair.target.connection(target_id).unwrap();
    assert!(connection.inbound().is_pending());
    assert_eq!(connection.inbound().as_slice(), b"hello");
    // Connectionless: no sequencing.
    assert_eq!(connection.recv_seq().value(), 0);
}

#[test]
fn out_of_sequence_information_is_accepted() {
    let (mut pair, _, target_id) = Pair::connected();
    let (mut buf, mut len) = frame(
        Header::new(SERVICE, PduType::I, SERVICE),
        Some(Sequence::new(SeqNum::new(5), SeqNum::new(0))),
        b"late",
    );

    pair.target.on_frame(&mut buf, &mut len).unwrap();

    let reply = pdu(&buf[..len]);
    assert_eq!(reply.header.ptype, PduType::Rr);
    assert_eq!(reply.sequence.unwrap().nr.value(), 1);
    assert_eq!(
        pair.target.connection(target_id).unwrap().inbound().as_slice(),
        b"late"
    );
}

#[test]
fn full_inbound_mailbox_answers_receive_not_ready() {
    let (mut pair, id, target_id) = Pair::connected();
    pair.target
        .connection_mut(target_id)
        .unwrap()
        .inbound_mut()
        .push(&[0u8; MAILBOX_CAPACITY - 10])
        .unwrap();
    pair.initiator.send(id, &[1u8; 100]).unwrap();

    pair.turn().unwrap();

    let reply = pdu(&pair.replies[0]);
    assert_eq!(reply.header.ptype, PduType::Rnr);
    assert_eq!(reply.sequence.unwrap().nr.value(), 0);

    let receiver = pair.target.connection(target_id).unwrap();
    assert_eq!(receiver.recv_seq().value(), 0);
    assert_eq!(receiver.inbound().len(), MAILBOX_CAPACITY - 10);

    // No retransmission: the refused frame stays unacknowledged.
    let sender = pair.initiator.connection(id).unwrap();
    assert_eq!(sender.send_seq().value(), 1);
    assert_eq!(sender.send_ack_seq().value(), 0);
}

#[test]
fn unknown_pdu_type_is_fatal() {
    let mut target = Engine::<Recorder>::new(LocalParameters::default());
    let mut buf = [0u8; MAX_FRAME_LEN];
    llcp_protocol::encode_header(0, 0x0B, 0, &mut buf).unwrap();
    let mut len = 2;

    let err = target.on_frame(&mut buf, &mut len).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Protocol(ProtocolError::UnknownPduType(0x0B))
    ));
    assert!(err.is_fatal());
    assert_eq!(target.stats().protocol_errors, 1);

    let mut initiator = Engine::<Recorder>::new(LocalParameters::default());
    // Type 0x0B: high bits in byte 0, low bits in byte 1.
    let err = initiator.tick(&mut CannedLink(vec![0x02, 0xC0])).unwrap_err();
    assert_eq!(err.error_code(), "PROTOCOL_VIOLATION");
}

#[test]
fn lost_link_resets_initiator() {
    let (mut pair, id, _) = Pair::connected();

    let err = pair.initiator.tick(&mut DeadLink).unwrap_err();
    assert!(matches!(err, CoreError::LinkLost(_)));
    assert!(err.is_fatal());

    assert!(pair.initiator.connection(id).is_err());
    assert!(pair.initiator.connection(MANAGEMENT_ID).is_ok());
    assert_eq!(pair.initiator.connections().count(), 1);
    assert_eq!(pair.initiator.stats().link_resets, 1);
    assert_eq!(pair.initiator_events.events(), ["connect 16", "disconnect 16"]);
}

#[test]
fn parameter_exchange_updates_remote() {
    let mut pair = Pair::with_parameters(
        LocalParameters {
            miux: 64,
            ..LocalParameters::default()
        },
        LocalParameters {
            miux: 32,
            ..LocalParameters::default()
        },
    );
    assert_eq!(pair.initiator.link_miu(), 128 + 32);
    assert_eq!(pair.target.link_miu(), 128 + 32);

    pair.target.reset();
    assert_eq!(pair.target.link_miu(), 128);

    pair.initiator.exchange_parameters();
    pair.turn().unwrap();
    assert_eq!(pdu(&pair.sent[0]).header.ptype, PduType::Pax);
    assert_eq!(pair.target.remote_parameters().miux, 64);
    assert_eq!(pair.target.link_miu(), 128 + 32);
}

#[test]
fn negotiated_miu_limits_information_frames() {
    let params = LocalParameters {
        miux: 72,
        rw: 4,
        ..LocalParameters::default()
    };
    let mut pair = Pair::with_parameters(params, params);
    pair.register_both(SERVICE);
    let id = pair.initiator.connect(SERVICE).unwrap();
    pair.turn().unwrap();
    assert_eq!(pair.initiator.connection(id).unwrap().miu(), 200);
    assert_eq!(pair.initiator.connection(id).unwrap().window(), 4);

    pair.initiator.send(id, &[7u8; 450]).unwrap();
    pair.turns(3);
    let sizes: Vec<usize> = pair.sent[1..]
        .iter()
        .map(|f| pdu(f).body.len())
        .collect();
    assert_eq!(sizes, vec![200, 200, 50]);
}

#[test]
fn activation_rejects_incompatible_version() {
    let peer = Engine::<Recorder>::new(LocalParameters {
        version: Version::new(2, 0),
        ..LocalParameters::default()
    });
    let mut engine = Engine::<Recorder>::new(LocalParameters::default());

    let mut block = [0u8; 64];
    let len = peer.activation_bytes(&mut block).unwrap();
    let err = engine.activate(&block[..len]).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Protocol(ProtocolError::VersionMismatch { .. })
    ));
    assert!(err.is_fatal());
}

/// Delivers one frame to `engine` in the target role and returns its reply.
fn deliver(
    engine: &mut Engine<Recorder>,
    header: Header,
    sequence: Option<Sequence>,
    body: &[u8],
) -> Result<Vec<u8>, CoreError> {
    let (mut buf, mut len) = frame(header, sequence, body);
    engine.on_frame(&mut buf, &mut len)?;
    Ok(buf[..len].to_vec())
}

#[test]
fn disconnect_requested_while_connect_in_flight_survives_cc() {
    let mut target = Engine::<Recorder>::new(LocalParameters::default());
    target.register_service(SERVICE, Recorder::default()).unwrap();
    let id = target.connect(SERVICE).unwrap();

    let reply = deliver(&mut target, Header::new(0, PduType::Symm, 0), None, &[]).unwrap();
    assert_eq!(pdu(&reply).header.ptype, PduType::Connect);

    target.disconnect(id).unwrap();
    assert_eq!(
        target.connection(id).unwrap().intent(),
        Intent::DisconnectRequested
    );

    let reply = deliver(
        &mut target,
        Header::new(SERVICE, PduType::Cc, SERVICE),
        None,
        &[],
    )
    .unwrap();
    let disc = pdu(&reply);
    assert_eq!(disc.header.ptype, PduType::Disc);
    assert_eq!((disc.header.dsap, disc.header.ssap), (SERVICE, SERVICE));

    let connection = target.connection(id).unwrap();
    assert!(connection.is_connected());
    assert_eq!(connection.intent(), Intent::DisconnectRequested);

    // The peer's DM closes it.
    deliver(
        &mut target,
        Header::new(SERVICE, PduType::Dm, SERVICE),
        None,
        &[DisconnectReason::DisconnectReceived.to_byte()],
    )
    .unwrap();
    assert!(target.connection(id).is_err());
}

#[test]
fn unsupported_pdu_types_are_answered_with_symm() {
    let (mut pair, _, target_id) = Pair::connected();
    let before = pair.target.connections().count();

    for (ptype, body) in [
        (PduType::Agf, &[0x00, 0x02, 0x00, 0x00][..]),
        (PduType::Frmr, &[0x4C, 0x00, 0x00, 0x00][..]),
        (PduType::Snl, &[0x08, 0x01, 0x01][..]),
    ] {
        let reply = deliver(&mut pair.target, Header::new(SERVICE, ptype, SERVICE), None, body)
            .unwrap();
        assert_eq!(pdu(&reply).header.ptype, PduType::Symm, "reply to {}", ptype);
    }

    assert_eq!(pair.target.connections().count(), before);
    assert_eq!(pair.target.stats().protocol_errors, 0);
    let connection = pair.target.connection(target_id).unwrap();
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(connection.intent(), Intent::None);
    assert_eq!(connection.recv_seq().value(), 0);
    assert_eq!(connection.send_seq().value(), 0);
    assert!(!connection.inbound().is_pending());
}

#[test]
fn simultaneous_open_binds_pending_connection() {
    let mut target = Engine::<Recorder>::new(LocalParameters::default());
    let events = Recorder::default();
    target.register_service(SERVICE, events.clone()).unwrap();
    let id = target.connect(SERVICE).unwrap();

    let reply = deliver(
        &mut target,
        Header::new(SERVICE, PduType::Connect, 0x20),
        None,
        &[],
    )
    .unwrap();

    let cc = pdu(&reply);
    assert_eq!(cc.header.ptype, PduType::Cc);
    assert_eq!((cc.header.dsap, cc.header.ssap), (0x20, SERVICE));

    let connection = target.connection(id).unwrap();
    assert!(connection.is_connected());
    assert_eq!(connection.remote(), 0x20);
    assert_eq!(connection.intent(), Intent::None);
    // Bound in place: no second connection, no second callback.
    assert_eq!(target.connections().count(), 2);
    assert_eq!(events.events(), ["connect 16"]);
}

#[test]
fn connect_to_busy_address_is_rejected() {
    let (mut pair, _, target_id) = Pair::connected();

    let reply = deliver(
        &mut pair.target,
        Header::new(SERVICE, PduType::Connect, 0x20),
        None,
        &[],
    )
    .unwrap();

    let dm = pdu(&reply);
    assert_eq!(dm.header.ptype, PduType::Dm);
    assert_eq!((dm.header.dsap, dm.header.ssap), (0x20, SERVICE));
    assert_eq!(
        DisconnectReason::from_byte(dm.body[0]),
        DisconnectReason::ConnectionRejected
    );

    let connection = pair.target.connection(target_id).unwrap();
    assert!(connection.is_connected());
    assert_eq!(connection.remote(), SERVICE);
}

#[test]
fn malformed_simultaneous_open_leaves_connection_unbound() {
    let mut target = Engine::<Recorder>::new(LocalParameters::default());
    target.register_service(SERVICE, Recorder::default()).unwrap();
    let id = target.connect(SERVICE).unwrap();

    // MIUX with a one-byte value.
    let err = deliver(
        &mut target,
        Header::new(SERVICE, PduType::Connect, 0x20),
        None,
        &[0x02, 0x01, 0x00],
    )
    .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Protocol(ProtocolError::MalformedParameter { tag: 0x02, len: 1 })
    ));

    let connection = target.connection(id).unwrap();
    assert_eq!(connection.remote(), SERVICE);
    assert!(!connection.is_connected());
    assert_eq!(connection.intent(), Intent::ConnectRequested);
}

#[test]
fn removed_connection_still_sends_its_acknowledgment() {
    let (mut pair, id, target_id) = Pair::connected();
    pair.target.send(target_id, b"pong").unwrap();

    // SYMM out, I back: the initiator now owes an RR.
    pair.turn().unwrap();
    assert_eq!(pdu(&pair.replies[0]).header.ptype, PduType::I);

    pair.initiator.remove(id);
    assert!(pair.initiator.connection(id).is_err());

    pair.turn().unwrap();
    let rr = pdu(&pair.sent[1]);
    assert_eq!(rr.header.ptype, PduType::Rr);
    assert_eq!((rr.header.dsap, rr.header.ssap), (SERVICE, SERVICE));
    assert_eq!(rr.sequence.unwrap().nr.value(), 1);
    assert_eq!(
        pair.target.connection(target_id).unwrap().send_ack_seq().value(),
        1
    );
}
