//! Receive dispatcher.
//!
//! Parses one inbound frame, resolves it to a connection and applies the
//! state transition for its PDU type. Replies are not written here: they
//! are queued as scalars on the connection and encoded by the scheduler on
//! the next turn, after the inbound buffer is no longer borrowed.

use crate::connection::{Connection, ConnectionId, Intent, Reply};
use crate::engine::Engine;
use crate::error::CoreError;
use crate::negotiation::DEFAULT_RW;
use crate::service::Service;
use crate::table::MANAGEMENT_ID;
use llcp_protocol::{DisconnectReason, Pdu, PduType, SeqNum};

impl<S: Service> Engine<S> {
    /// Dispatches one received frame.
    pub(crate) fn dispatch(&mut self, frame: &[u8]) -> Result<(), CoreError> {
        let pdu = match Pdu::parse(frame) {
            Ok(pdu) => pdu,
            Err(e) => {
                self.stats.protocol_errors += 1;
                tracing::error!("Rejecting inbound frame: {}", e);
                return Err(e.into());
            }
        };

        let header = pdu.header;
        self.stats.record_received(header.ptype, pdu.body.len());
        tracing::debug!(
            "Received {} {}->{} ({} bytes)",
            header.ptype,
            header.ssap,
            header.dsap,
            pdu.body.len()
        );

        let result = match header.ptype {
            PduType::Symm => Ok(()),
            PduType::Pax => self.handle_pax(&pdu),
            PduType::Agf => {
                tracing::warn!("AGF not supported, ignoring aggregated frame");
                Ok(())
            }
            PduType::Ui => {
                self.handle_ui(&pdu);
                Ok(())
            }
            PduType::Connect => self.handle_connect(&pdu),
            PduType::Disc => {
                self.handle_disc(&pdu);
                Ok(())
            }
            PduType::Cc => self.handle_cc(&pdu),
            PduType::Dm => {
                self.handle_dm(&pdu);
                Ok(())
            }
            PduType::Frmr => {
                tracing::warn!(
                    "FRMR from {} to {}, no recovery attempted",
                    header.ssap,
                    header.dsap
                );
                Ok(())
            }
            PduType::Snl => {
                tracing::debug!("SNL not supported, ignoring");
                Ok(())
            }
            PduType::I => {
                self.handle_information(&pdu);
                Ok(())
            }
            PduType::Rr | PduType::Rnr => {
                self.handle_receive_status(&pdu);
                Ok(())
            }
        };

        if let Err(e) = &result {
            self.stats.protocol_errors += 1;
            tracing::error!("{} from {} to {}: {}", header.ptype, header.ssap, header.dsap, e);
        }
        result
    }

    fn handle_pax(&mut self, pdu: &Pdu<'_>) -> Result<(), CoreError> {
        // Established connections keep the MIU negotiated at CONNECT/CC time.
        Ok(self.negotiation.merge_link(pdu.body)?)
    }

    fn handle_ui(&mut self, pdu: &Pdu<'_>) {
        let header = pdu.header;
        let Some(connection) = self
            .connections
            .find_by_address_pair(header.dsap, header.ssap)
            .and_then(|id| self.connections.get_mut(id))
        else {
            tracing::debug!(
                "Dropping UI from {} to {}: no connection",
                header.ssap,
                header.dsap
            );
            return;
        };
        if let Err(e) = connection.inbound_mut().push(pdu.body) {
            tracing::warn!("Dropping UI from {}: {}", header.ssap, e);
        }
    }

    fn handle_connect(&mut self, pdu: &Pdu<'_>) -> Result<(), CoreError> {
        let header = pdu.header;

        // Simultaneous open: a local connection is already bound to this
        // service address.
        if let Some(id) = self.connections.find_by_bound_local_service(header.dsap) {
            let Some(connection) = self.connections.get_mut(id) else {
                return Ok(());
            };
            if connection.is_connected() {
                tracing::warn!(
                    "CONNECT from {} to {}: address busy, rejecting",
                    header.ssap,
                    header.dsap
                );
                connection.queue_reply_to(
                    header.ssap,
                    header.dsap,
                    Reply::DisconnectedMode(DisconnectReason::ConnectionRejected),
                );
                return Ok(());
            }
            // A malformed parameter stream leaves the connection as it was.
            self.negotiation.merge_connection(connection, pdu.body)?;
            connection.bind_remote(header.ssap);
            mark_connected(connection);
            connection.queue_reply(Reply::ConnectionComplete);
            tracing::info!("Connection {} bound to remote {}", id, header.ssap);
            return Ok(());
        }

        if !self.services.contains(header.dsap) {
            tracing::warn!(
                "CONNECT from {} to {}: no service bound",
                header.ssap,
                header.dsap
            );
            self.queue_management_reply(header.ssap, header.dsap, DisconnectReason::NoServiceBound);
            return Ok(());
        }

        if self.connections.is_full() {
            tracing::warn!(
                "CONNECT from {} to {}: connection table full, rejecting",
                header.ssap,
                header.dsap
            );
            self.queue_management_reply(
                header.ssap,
                header.dsap,
                DisconnectReason::ConnectionRejected,
            );
            return Ok(());
        }

        let mut connection = Connection::new(
            header.dsap,
            header.ssap,
            self.negotiation.link_miu(),
            0,
            DEFAULT_RW,
        );
        self.negotiation.merge_connection(&mut connection, pdu.body)?;
        mark_connected(&mut connection);
        connection.queue_reply(Reply::ConnectionComplete);
        let id = self.connections.insert(connection)?;

        if let (Ok(service), Some(connection)) = (
            self.services.lookup_mut(header.dsap),
            self.connections.get_mut(id),
        ) {
            service.handler.on_connect(id, connection);
        }
        tracing::info!(
            "Connection {} accepted: {} from remote {}",
            id,
            header.dsap,
            header.ssap
        );
        Ok(())
    }

    fn handle_disc(&mut self, pdu: &Pdu<'_>) {
        let header = pdu.header;
        let Some(id) = self.resolve(header.dsap, header.ssap) else {
            self.queue_management_reply(
                header.ssap,
                header.dsap,
                DisconnectReason::NoActiveConnection,
            );
            return;
        };
        let Some(connection) = self.connections.get_mut(id) else {
            return;
        };
        // The connected flag stays set until the service removes the
        // connection.
        connection.status.disconnect_received = true;
        connection.queue_reply(Reply::DisconnectedMode(DisconnectReason::DisconnectReceived));
        tracing::info!("Connection {} disconnected by peer", id);
    }

    fn handle_cc(&mut self, pdu: &Pdu<'_>) -> Result<(), CoreError> {
        let header = pdu.header;
        let Some(id) = self.resolve(header.dsap, header.ssap) else {
            tracing::warn!("CC from {} to {}: no connection", header.ssap, header.dsap);
            return Ok(());
        };
        let Some(connection) = self.connections.get_mut(id) else {
            return Ok(());
        };
        self.negotiation.merge_connection(connection, pdu.body)?;
        mark_connected(connection);
        tracing::info!(
            "Connection {} established (MIU {}, window {})",
            id,
            connection.miu(),
            connection.window()
        );
        Ok(())
    }

    fn handle_dm(&mut self, pdu: &Pdu<'_>) {
        let header = pdu.header;
        let reason = DisconnectReason::from_byte(pdu.body.first().copied().unwrap_or(0));
        let Some(id) = self.resolve(header.dsap, header.ssap) else {
            tracing::debug!(
                "DM ({}) from {} to {}: no connection",
                reason,
                header.ssap,
                header.dsap
            );
            return;
        };
        if let Some(connection) = self.connections.get_mut(id) {
            connection.status.connected = false;
            connection.status.connect_asked = false;
            connection.status.disconnect_asked = false;
            connection.intent = Intent::None;
        }
        tracing::info!("Connection {} closed by DM: {}", id, reason);
        self.remove(id);
    }

    fn handle_information(&mut self, pdu: &Pdu<'_>) {
        let header = pdu.header;
        let sequence = pdu.sequence.unwrap_or_default();

        let connection = self
            .resolve(header.dsap, header.ssap)
            .and_then(|id| self.connections.get_mut(id))
            .filter(|connection| connection.is_connected());
        let Some(connection) = connection else {
            tracing::debug!("I from {} to {}: no active connection", header.ssap, header.dsap);
            self.queue_management_reply(
                header.ssap,
                header.dsap,
                DisconnectReason::NoActiveConnection,
            );
            return;
        };

        apply_ack(connection, sequence.nr);
        if sequence.ns != connection.v_r {
            tracing::warn!(
                "Sequence error on {}<->{}: N(S) {} expected {}",
                connection.local(),
                connection.remote(),
                sequence.ns,
                connection.v_r
            );
        }

        match connection.inbound_mut().push(pdu.body) {
            Ok(()) => {
                connection.v_r.increment();
                let nr = connection.v_r;
                connection.queue_reply(Reply::ReceiveReady(nr));
            }
            Err(e) => {
                tracing::warn!(
                    "Refusing I on {}<->{}: {}",
                    connection.local(),
                    connection.remote(),
                    e
                );
                let nr = connection.v_r;
                connection.queue_reply(Reply::ReceiveNotReady(nr));
            }
        }
    }

    fn handle_receive_status(&mut self, pdu: &Pdu<'_>) {
        let header = pdu.header;
        let nr = pdu.sequence.unwrap_or_default().nr;
        let Some(connection) = self
            .resolve(header.dsap, header.ssap)
            .and_then(|id| self.connections.get_mut(id))
        else {
            tracing::debug!("{} from {} to {}: no connection", header.ptype, header.ssap, header.dsap);
            return;
        };
        apply_ack(connection, nr);
        if header.ptype == PduType::Rnr {
            // Unacknowledged I PDUs are not retransmitted.
            tracing::debug!(
                "Peer busy on {}<->{} at N(R) {}",
                connection.local(),
                connection.remote(),
                nr
            );
        }
    }

    /// Address-pair lookup for everything but CONNECT. The management pair
    /// never resolves.
    fn resolve(&self, dsap: u8, ssap: u8) -> Option<ConnectionId> {
        self.connections
            .find_by_address_pair(dsap, ssap)
            .filter(|id| *id != MANAGEMENT_ID)
    }

    fn queue_management_reply(&mut self, dsap: u8, ssap: u8, reason: DisconnectReason) {
        if let Some(management) = self.connections.get_mut(MANAGEMENT_ID) {
            management.queue_reply_to(dsap, ssap, Reply::DisconnectedMode(reason));
        }
    }
}

/// Only a pending connect is settled here; a disconnect requested while the
/// CONNECT was in flight still goes out.
fn mark_connected(connection: &mut Connection) {
    connection.status.connected = true;
    connection.status.connect_asked = false;
    if connection.intent == Intent::ConnectRequested {
        connection.intent = Intent::None;
    }
}

fn apply_ack(connection: &mut Connection, nr: SeqNum) {
    if !connection.acknowledge(nr) {
        tracing::warn!(
            "Ignoring N(R) {} on {}<->{}: V(S) {} V(SA) {}",
            nr,
            connection.local(),
            connection.remote(),
            connection.v_s,
            connection.v_sa
        );
    }
}
