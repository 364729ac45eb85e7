//! Link engine - owns the service registry, the connection table and the
//! negotiated parameters, and drives one link turn at a time.

use crate::connection::{Connection, ConnectionId, Intent};
use crate::error::CoreError;
use crate::link::Transceiver;
use crate::negotiation::{Negotiation, DEFAULT_RW};
use crate::service::{Service, ServiceRegistry};
use crate::stats::LinkStats;
use crate::table::{ConnectionTable, MANAGEMENT_ID};
use llcp_protocol::params::{activation_tlvs, encode_activation_block};
use llcp_protocol::{LocalParameters, RemoteParameters, MAX_FRAME_LEN};

/// The logical link engine.
///
/// Single-threaded and allocation-free. The initiator drives it with
/// [`Engine::tick`]; on the target the lower layer calls
/// [`Engine::on_frame`] for every frame it receives.
pub struct Engine<S> {
    pub(crate) services: ServiceRegistry<S>,
    pub(crate) connections: ConnectionTable,
    pub(crate) negotiation: Negotiation,
    pub(crate) stats: LinkStats,
    /// A PAX PDU is waiting to go out on the management connection.
    pub(crate) pax_pending: bool,
}

impl<S: Service> Engine<S> {
    /// Creates an engine advertising `local` parameters.
    pub fn new(local: LocalParameters) -> Self {
        let negotiation = Negotiation::new(local);
        let mut connections = ConnectionTable::new();
        install_management(&mut connections, negotiation.link_miu());
        Self {
            services: ServiceRegistry::new(),
            connections,
            negotiation,
            stats: LinkStats::default(),
            pax_pending: false,
        }
    }

    /// Binds `handler` to the local service address `address`.
    pub fn register_service(&mut self, address: u8, handler: S) -> Result<(), CoreError> {
        self.services.register(address, handler)?;
        self.negotiation
            .set_well_known(self.services.well_known_bitmap());
        tracing::debug!("Registered service at address {}", address);
        Ok(())
    }

    /// Removes the service bound to `address`. Existing connections keep
    /// running but get no disconnect callback.
    pub fn unregister_service(&mut self, address: u8) -> Option<S> {
        let handler = self.services.unregister(address)?;
        self.negotiation
            .set_well_known(self.services.well_known_bitmap());
        Some(handler)
    }

    pub fn services(&self) -> &ServiceRegistry<S> {
        &self.services
    }

    /// Opens a connection from the local service at `address` to the peer's
    /// service at the same address. The CONNECT goes out on a later turn.
    pub fn connect(&mut self, address: u8) -> Result<ConnectionId, CoreError> {
        if !self.services.contains(address) {
            return Err(CoreError::ServiceNotFound { sap: address });
        }
        if self
            .connections
            .find_by_bound_local_service(address)
            .is_some()
        {
            return Err(CoreError::AlreadyRequested { sap: address });
        }

        let mut connection = Connection::new(
            address,
            address,
            self.negotiation.link_miu(),
            0,
            DEFAULT_RW,
        );
        connection.intent = Intent::ConnectRequested;
        let id = self.connections.insert(connection)?;

        if let (Ok(service), Some(connection)) = (
            self.services.lookup_mut(address),
            self.connections.get_mut(id),
        ) {
            service.handler.on_connect(id, connection);
        }
        tracing::info!("Connection {} requested to address {}", id, address);
        Ok(id)
    }

    /// Requests an orderly disconnect; the DISC goes out on a later turn.
    ///
    /// A connection the peer never heard of, or one the peer already
    /// disconnected, is removed immediately.
    pub fn disconnect(&mut self, id: ConnectionId) -> Result<(), CoreError> {
        if id == MANAGEMENT_ID {
            return Err(CoreError::ConnectionNotFound(id));
        }
        let connection = self
            .connections
            .get_mut(id)
            .ok_or(CoreError::ConnectionNotFound(id))?;

        if connection.intent == Intent::DisconnectRequested {
            return Err(CoreError::AlreadyRequested {
                sap: connection.local(),
            });
        }
        let status = connection.status;
        if status.disconnect_received || (!status.connected && !status.connect_asked) {
            self.remove(id);
            return Ok(());
        }

        connection.intent = Intent::DisconnectRequested;
        connection.status.disconnect_asked = false;
        tracing::info!("Connection {} disconnect requested", id);
        Ok(())
    }

    /// Destroys a connection and runs its service's disconnect callback.
    ///
    /// An empty slot (or the management connection) is left alone. A reply
    /// still queued on the connection is handed to the management connection
    /// so the peer gets it anyway.
    pub fn remove(&mut self, id: ConnectionId) {
        if id == MANAGEMENT_ID {
            return;
        }
        let Some(mut connection) = self.connections.remove(id) else {
            return;
        };

        if let Some(reply) = connection.reply.take() {
            match self.connections.get_mut(MANAGEMENT_ID) {
                Some(management) if management.reply.is_none() => {
                    management.reply = Some(reply);
                }
                _ => tracing::warn!(
                    "Connection {}: dropping unsent reply {:?}, management connection busy",
                    id,
                    reply.reply
                ),
            }
        }

        if let Ok(service) = self.services.lookup_mut(connection.local()) {
            service.handler.on_disconnect(id, &mut connection);
        }
        tracing::info!(
            "Connection {} ({}<->{}) removed",
            id,
            connection.local(),
            connection.remote()
        );
    }

    /// Abrupt whole-engine reset: every connection is dropped without any
    /// handshake, services get their disconnect callback, and everything
    /// learned from the peer is forgotten.
    pub fn reset(&mut self) {
        for id in self.connections.ids() {
            if id == MANAGEMENT_ID {
                continue;
            }
            if let Some(mut connection) = self.connections.remove(id) {
                if let Ok(service) = self.services.lookup_mut(connection.local()) {
                    service.handler.on_disconnect(id, &mut connection);
                }
            }
        }
        self.connections.clear();
        self.negotiation.reset_remote();
        install_management(&mut self.connections, self.negotiation.link_miu());
        self.pax_pending = false;
        self.stats.link_resets += 1;
        tracing::info!("Link engine reset");
    }

    /// Queues `data` on the connection's outbound mailbox.
    pub fn send(&mut self, id: ConnectionId, data: &[u8]) -> Result<(), CoreError> {
        self.connection_mut(id)?.outbound_mut().push(data)
    }

    /// Moves received data from the connection's inbound mailbox into `out`.
    pub fn receive(&mut self, id: ConnectionId, out: &mut [u8]) -> Result<usize, CoreError> {
        Ok(self.connection_mut(id)?.inbound_mut().drain_into(out))
    }

    pub fn connection(&self, id: ConnectionId) -> Result<&Connection, CoreError> {
        self.connections
            .get(id)
            .ok_or(CoreError::ConnectionNotFound(id))
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Result<&mut Connection, CoreError> {
        self.connections
            .get_mut(id)
            .ok_or(CoreError::ConnectionNotFound(id))
    }

    /// Active connections, management connection included, in slot order.
    pub fn connections(&self) -> impl Iterator<Item = (ConnectionId, &Connection)> {
        self.connections.iter()
    }

    pub fn local_parameters(&self) -> &LocalParameters {
        self.negotiation.local()
    }

    pub fn remote_parameters(&self) -> &RemoteParameters {
        self.negotiation.remote()
    }

    /// Effective payload limit of the link.
    pub fn link_miu(&self) -> usize {
        self.negotiation.link_miu()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Writes the activation block handed to the activation layer.
    pub fn activation_bytes(&self, out: &mut [u8]) -> Result<usize, CoreError> {
        Ok(encode_activation_block(self.negotiation.local(), out)?)
    }

    /// Consumes the peer's activation block. Must succeed before the first
    /// frame is exchanged.
    pub fn activate(&mut self, peer_block: &[u8]) -> Result<(), CoreError> {
        let merged = activation_tlvs(peer_block).and_then(|tlvs| self.negotiation.merge_link(tlvs));
        if let Err(e) = merged {
            self.stats.protocol_errors += 1;
            tracing::error!("Link activation failed: {}", e);
            return Err(e.into());
        }
        tracing::info!(
            "Link activated: peer version {}, link MIU {}",
            self.negotiation.remote().version,
            self.negotiation.link_miu()
        );
        Ok(())
    }

    /// Schedules a PAX PDU carrying the local link parameters.
    pub fn exchange_parameters(&mut self) {
        self.pax_pending = true;
    }

    /// Initiator turn: builds one frame, exchanges it for exactly one reply
    /// and dispatches the reply.
    ///
    /// A lost link resets the engine before the error is returned. A protocol
    /// violation is returned as is; the caller is expected to reset.
    pub fn tick<T: Transceiver + ?Sized>(&mut self, link: &mut T) -> Result<(), CoreError> {
        let mut frame = [0u8; MAX_FRAME_LEN];
        let len = self.build_next_frame(&mut frame)?;

        let mut reply = [0u8; MAX_FRAME_LEN];
        let reply_len = match link.exchange(&frame[..len], &mut reply) {
            Ok(reply_len) => reply_len.min(reply.len()),
            Err(e) => {
                tracing::error!("{}, resetting", e);
                self.reset();
                return Err(e.into());
            }
        };
        self.dispatch(&reply[..reply_len])
    }

    /// Target turn: dispatches the frame in `buf[..*len]`, then writes the
    /// reply into the same buffer and stores its length in `len`.
    ///
    /// The inbound frame is fully consumed before the reply is written.
    pub fn on_frame(&mut self, buf: &mut [u8], len: &mut usize) -> Result<(), CoreError> {
        let received = (*len).min(buf.len());
        self.dispatch(&buf[..received])?;
        *len = self.build_next_frame(buf)?;
        Ok(())
    }
}

fn install_management(connections: &mut ConnectionTable, miu: usize) {
    // The table is empty here, so the management connection lands in slot 0.
    if connections.insert(Connection::management(miu)).is_err() {
        tracing::error!("Connection table has no room for the management connection");
    }
}
