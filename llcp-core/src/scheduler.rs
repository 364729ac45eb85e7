//! Send scheduler.
//!
//! Every link turn produces exactly one frame, picked in priority order:
//! 1. a reply queued by the dispatcher (CC, DM, RR, RNR), first in slot order;
//! 2. a pending PAX on the management connection;
//! 3. the first connection with a pending CONNECT/DISC intent or with
//!    outbound data and an open window (one I PDU of at most MIU bytes);
//! 4. SYMM on the management connection.

use crate::connection::{Intent, Reply};
use crate::engine::Engine;
use crate::error::CoreError;
use crate::service::Service;
use crate::stats::LinkStats;
use crate::table::MANAGEMENT_ID;
use llcp_protocol::{
    write_pdu, Header, PduType, Sequence, MAX_TLV_LEN, SAP_LINK_MANAGEMENT,
};

impl<S: Service> Engine<S> {
    /// Encodes the next frame into `out` and returns its length.
    pub(crate) fn build_next_frame(&mut self, out: &mut [u8]) -> Result<usize, CoreError> {
        if let Some(len) = self.build_reply(out)? {
            return Ok(len);
        }

        if self.pax_pending {
            self.pax_pending = false;
            let mut body = [0u8; MAX_TLV_LEN];
            let body_len = self.negotiation.encode_link(&mut body)?;
            let header = Header::new(SAP_LINK_MANAGEMENT, PduType::Pax, SAP_LINK_MANAGEMENT);
            return emit(&mut self.stats, out, header, None, &body[..body_len]);
        }

        if let Some(len) = self.build_connection_frame(out)? {
            return Ok(len);
        }

        let header = Header::new(SAP_LINK_MANAGEMENT, PduType::Symm, SAP_LINK_MANAGEMENT);
        emit(&mut self.stats, out, header, None, &[])
    }

    fn build_reply(&mut self, out: &mut [u8]) -> Result<Option<usize>, CoreError> {
        let Some(id) = self
            .connections
            .iter()
            .find(|(_, connection)| connection.reply.is_some())
            .map(|(id, _)| id)
        else {
            return Ok(None);
        };
        let Some(connection) = self.connections.get_mut(id) else {
            return Ok(None);
        };
        let Some(queued) = connection.reply.take() else {
            return Ok(None);
        };

        let mut body = [0u8; MAX_TLV_LEN];
        let (ptype, sequence, body_len) = match queued.reply {
            Reply::ConnectionComplete => {
                let len = self.negotiation.encode_connection(&mut body)?;
                (PduType::Cc, None, len)
            }
            Reply::DisconnectedMode(reason) => {
                body[0] = reason.to_byte();
                (PduType::Dm, None, 1)
            }
            Reply::ReceiveReady(nr) => {
                connection.v_ra = nr;
                (PduType::Rr, Some(Sequence::ack(nr)), 0)
            }
            Reply::ReceiveNotReady(nr) => {
                connection.v_ra = nr;
                (PduType::Rnr, Some(Sequence::ack(nr)), 0)
            }
        };

        let header = Header::new(queued.dsap, ptype, queued.ssap);
        emit(&mut self.stats, out, header, sequence, &body[..body_len]).map(Some)
    }

    fn build_connection_frame(&mut self, out: &mut [u8]) -> Result<Option<usize>, CoreError> {
        for id in self.connections.ids() {
            if id == MANAGEMENT_ID {
                continue;
            }
            let Some(connection) = self.connections.get_mut(id) else {
                continue;
            };
            let status = connection.status;

            match connection.intent {
                Intent::ConnectRequested if !status.connect_asked => {
                    connection.status.connect_asked = true;
                    let mut body = [0u8; MAX_TLV_LEN];
                    let body_len = self.negotiation.encode_connection(&mut body)?;
                    let header =
                        Header::new(connection.remote(), PduType::Connect, connection.local());
                    tracing::info!("Connection {} sending CONNECT", id);
                    return emit(&mut self.stats, out, header, None, &body[..body_len]).map(Some);
                }
                Intent::DisconnectRequested if !status.disconnect_asked => {
                    connection.status.disconnect_asked = true;
                    let header =
                        Header::new(connection.remote(), PduType::Disc, connection.local());
                    tracing::info!("Connection {} sending DISC", id);
                    return emit(&mut self.stats, out, header, None, &[]).map(Some);
                }
                _ => {}
            }

            let can_send = status.connected
                && !status.disconnect_received
                && connection.intent == Intent::None
                && connection.outbound().is_pending()
                && connection.window_open();
            if !can_send {
                continue;
            }

            let chunk = connection.outbound().len().min(connection.miu());
            let header = Header::new(connection.remote(), PduType::I, connection.local());
            let sequence = Sequence::new(connection.v_s, connection.v_r);
            let len = emit(
                &mut self.stats,
                out,
                header,
                Some(sequence),
                &connection.outbound().as_slice()[..chunk],
            )?;
            connection.v_s.increment();
            connection.v_ra = connection.v_r;
            connection.outbound_mut().consume_front(chunk);
            return Ok(Some(len));
        }
        Ok(None)
    }
}

fn emit(
    stats: &mut LinkStats,
    out: &mut [u8],
    header: Header,
    sequence: Option<Sequence>,
    body: &[u8],
) -> Result<usize, CoreError> {
    let len = write_pdu(out, header, sequence, body)?;
    stats.record_sent(header.ptype, body.len());
    tracing::debug!(
        "Sending {} {}->{} ({} bytes)",
        header.ptype,
        header.ssap,
        header.dsap,
        body.len()
    );
    Ok(len)
}

#[cfg(test)]
mod tests {
    use crate::connection::{Connection, ConnectionId, Reply};
    use crate::engine::Engine;
    use crate::service::Service;
    use crate::table::MANAGEMENT_ID;
    use llcp_protocol::{DisconnectReason, LocalParameters, Pdu, PduType, SeqNum, MAX_FRAME_LEN};

    struct Nop;

    impl Service for Nop {
        fn on_connect(&mut self, _: ConnectionId, _: &mut Connection) {}
        fn on_disconnect(&mut self, _: ConnectionId, _: &mut Connection) {}
    }

    fn next_type(engine: &mut Engine<Nop>) -> PduType {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = engine.build_next_frame(&mut buf).unwrap();
        Pdu::parse(&buf[..len]).unwrap().header.ptype
    }

    fn connected(engine: &mut Engine<Nop>, address: u8) -> ConnectionId {
        engine.register_service(address, Nop).unwrap();
        let id = engine.connect(address).unwrap();
        let connection = engine.connection_mut(id).unwrap();
        connection.status.connected = true;
        connection.intent = crate::connection::Intent::None;
        id
    }

    #[test]
    fn test_idle_link_sends_symm() {
        let mut engine = Engine::<Nop>::new(LocalParameters::default());
        assert_eq!(next_type(&mut engine), PduType::Symm);
        assert_eq!(engine.stats().keepalives_sent, 1);
    }

    #[test]
    fn test_connect_intent_sent_once() {
        let mut engine = Engine::<Nop>::new(LocalParameters::default());
        engine.register_service(0x10, Nop).unwrap();
        engine.connect(0x10).unwrap();

        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = engine.build_next_frame(&mut buf).unwrap();
        let pdu = Pdu::parse(&buf[..len]).unwrap();
        assert_eq!(pdu.header.ptype, PduType::Connect);
        assert_eq!((pdu.header.dsap, pdu.header.ssap), (0x10, 0x10));
        assert!(!pdu.body.is_empty());

        assert_eq!(next_type(&mut engine), PduType::Symm);
    }

    #[test]
    fn test_reply_takes_priority() {
        let mut engine = Engine::<Nop>::new(LocalParameters::default());
        let id = connected(&mut engine, 0x10);
        engine.send(id, b"data").unwrap();
        engine
            .connection_mut(id)
            .unwrap()
            .queue_reply(Reply::ReceiveReady(SeqNum::new(3)));

        assert_eq!(next_type(&mut engine), PduType::Rr);
        assert_eq!(engine.connection(id).unwrap().recv_ack_seq().value(), 3);
        assert_eq!(next_type(&mut engine), PduType::I);
    }

    #[test]
    fn test_pax_before_data() {
        let mut engine = Engine::<Nop>::new(LocalParameters::default());
        let id = connected(&mut engine, 0x10);
        engine.send(id, b"data").unwrap();
        engine.exchange_parameters();

        assert_eq!(next_type(&mut engine), PduType::Pax);
        assert_eq!(next_type(&mut engine), PduType::I);
    }

    #[test]
    fn test_segments_by_miu() {
        let mut engine = Engine::<Nop>::new(LocalParameters::default());
        let id = connected(&mut engine, 0x10);
        engine.connection_mut(id).unwrap().window = 15;
        engine.send(id, &[0xAB; 300]).unwrap();

        let mut sizes = Vec::new();
        let mut buf = [0u8; MAX_FRAME_LEN];
        for expected_ns in 0..3u8 {
            let len = engine.build_next_frame(&mut buf).unwrap();
            let pdu = Pdu::parse(&buf[..len]).unwrap();
            assert_eq!(pdu.header.ptype, PduType::I);
            assert_eq!(pdu.sequence.unwrap().ns.value(), expected_ns);
            sizes.push(pdu.body.len());
        }
        assert_eq!(sizes, vec![128, 128, 44]);
        assert_eq!(engine.connection(id).unwrap().send_seq().value(), 3);
        assert!(!engine.connection(id).unwrap().outbound().is_pending());
        assert_eq!(next_type(&mut engine), PduType::Symm);
    }

    #[test]
    fn test_closed_window_blocks_information() {
        let mut engine = Engine::<Nop>::new(LocalParameters::default());
        let id = connected(&mut engine, 0x10);
        engine.send(id, &[0u8; 200]).unwrap();

        assert_eq!(next_type(&mut engine), PduType::I);
        // Window of one, nothing acknowledged yet.
        assert_eq!(next_type(&mut engine), PduType::Symm);
        assert_eq!(engine.connection(id).unwrap().outbound().len(), 72);
    }

    #[test]
    fn test_management_reply_addresses() {
        let mut engine = Engine::<Nop>::new(LocalParameters::default());
        engine
            .connection_mut(MANAGEMENT_ID)
            .unwrap()
            .queue_reply_to(
                0x21,
                0x04,
                Reply::DisconnectedMode(DisconnectReason::NoServiceBound),
            );

        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = engine.build_next_frame(&mut buf).unwrap();
        let pdu = Pdu::parse(&buf[..len]).unwrap();
        assert_eq!(pdu.header.ptype, PduType::Dm);
        assert_eq!((pdu.header.dsap, pdu.header.ssap), (0x21, 0x04));
        assert_eq!(pdu.body, &[0x02]);
    }
}
