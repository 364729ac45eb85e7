//! Service registry.
//!
//! A fixed-capacity table mapping a local address to the handler of the
//! service bound there. The engine consults it when a connection is opened
//! (locally or by a peer CONNECT) and when one is torn down.

use crate::connection::{Connection, ConnectionId};
use crate::error::CoreError;
use heapless::Vec;
use llcp_protocol::{MAX_SAP, SAP_LINK_MANAGEMENT};

/// Maximum number of registered services.
pub const MAX_SERVICES: usize = 8;

/// Callbacks of a service bound to a local address.
///
/// Handlers run synchronously inside the engine and may read or fill the
/// connection's mailboxes.
pub trait Service {
    /// The connection now exists; `connection.remote()` is known for
    /// peer-initiated connections.
    fn on_connect(&mut self, id: ConnectionId, connection: &mut Connection);

    /// The connection is being destroyed.
    fn on_disconnect(&mut self, id: ConnectionId, connection: &mut Connection);
}

impl<T: Service + ?Sized> Service for Box<T> {
    fn on_connect(&mut self, id: ConnectionId, connection: &mut Connection) {
        (**self).on_connect(id, connection);
    }

    fn on_disconnect(&mut self, id: ConnectionId, connection: &mut Connection) {
        (**self).on_disconnect(id, connection);
    }
}

/// A registered service.
#[derive(Debug)]
pub struct ServiceDescriptor<S> {
    pub address: u8,
    pub handler: S,
}

/// Fixed-capacity table of registered services.
#[derive(Debug)]
pub struct ServiceRegistry<S> {
    entries: Vec<ServiceDescriptor<S>, MAX_SERVICES>,
}

impl<S> ServiceRegistry<S> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Binds `handler` to `address`.
    pub fn register(&mut self, address: u8, handler: S) -> Result<(), CoreError> {
        if address == SAP_LINK_MANAGEMENT || address > MAX_SAP {
            return Err(CoreError::InvalidAddress { sap: address });
        }
        if self.position(address).is_some() {
            return Err(CoreError::AddressInUse { sap: address });
        }
        self.entries
            .push(ServiceDescriptor { address, handler })
            .map_err(|_| CoreError::CapacityExceeded {
                capacity: MAX_SERVICES,
            })
    }

    /// Removes the service at `address`, moving the last entry into its place.
    pub fn unregister(&mut self, address: u8) -> Option<S> {
        let index = self.position(address)?;
        Some(self.entries.swap_remove(index).handler)
    }

    pub fn lookup(&self, address: u8) -> Result<&ServiceDescriptor<S>, CoreError> {
        self.entries
            .iter()
            .find(|entry| entry.address == address)
            .ok_or(CoreError::ServiceNotFound { sap: address })
    }

    pub fn lookup_mut(&mut self, address: u8) -> Result<&mut ServiceDescriptor<S>, CoreError> {
        self.entries
            .iter_mut()
            .find(|entry| entry.address == address)
            .ok_or(CoreError::ServiceNotFound { sap: address })
    }

    pub fn contains(&self, address: u8) -> bool {
        self.position(address).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Well-known service bitmap of the registered addresses below 16.
    pub fn well_known_bitmap(&self) -> u16 {
        self.entries
            .iter()
            .filter(|entry| entry.address < 16)
            .fold(1u16, |bits, entry| bits | (1 << entry.address))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor<S>> {
        self.entries.iter()
    }

    fn position(&self, address: u8) -> Option<usize> {
        self.entries.iter().position(|entry| entry.address == address)
    }
}

impl<S> Default for ServiceRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
