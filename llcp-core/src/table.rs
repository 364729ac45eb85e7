//! Connection table.
//!
//! A fixed-capacity slot map: every connection lives in a slot whose index
//! is its [`ConnectionId`]. Freed slots go on a free list and are handed out
//! again by later inserts, so ids stay stable for the lifetime of the
//! connection and removal is O(1).

use crate::connection::{Connection, ConnectionId};
use crate::error::CoreError;
use heapless::Vec;
use llcp_protocol::SAP_LINK_MANAGEMENT;

/// Maximum number of connections, including the link management connection.
pub const MAX_CONNECTIONS: usize = 8;

/// Slot index of the link management connection.
pub const MANAGEMENT_ID: ConnectionId = ConnectionId(0);

#[derive(Debug)]
pub struct ConnectionTable {
    slots: [Option<Connection>; MAX_CONNECTIONS],
    free: Vec<u8, MAX_CONNECTIONS>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        let mut free = Vec::new();
        // Popped from the back, so slot 0 is handed out first.
        for index in (0..MAX_CONNECTIONS as u8).rev() {
            // Cannot fail: the list has exactly MAX_CONNECTIONS entries.
            let _ = free.push(index);
        }
        Self {
            slots: core::array::from_fn(|_| None),
            free,
        }
    }

    /// Stores `connection` in a free slot.
    pub fn insert(&mut self, connection: Connection) -> Result<ConnectionId, CoreError> {
        let index = self.free.pop().ok_or(CoreError::ResourceExhausted {
            capacity: MAX_CONNECTIONS,
        })?;
        self.slots[index as usize] = Some(connection);
        Ok(ConnectionId(index))
    }

    /// Empties the slot of `id`. Returns `None` if it was already empty.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.slots.get_mut(id.index())?.take()?;
        // The slot was occupied, so its index is not on the free list.
        let _ = self.free.push(id.0);
        Some(connection)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.slots.get(id.index())?.as_ref()
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    /// Resolves an inbound PDU by its full address pair. `local` is the
    /// PDU's DSAP, `remote` its SSAP.
    pub fn find_by_address_pair(&self, local: u8, remote: u8) -> Option<ConnectionId> {
        self.iter()
            .find(|(_, c)| c.local() == local && c.remote() == remote)
            .map(|(id, _)| id)
    }

    /// Resolves an inbound CONNECT, whose source is not yet bound, by the
    /// local service address alone. Never matches the management connection.
    pub fn find_by_bound_local_service(&self, local: u8) -> Option<ConnectionId> {
        if local == SAP_LINK_MANAGEMENT {
            return None;
        }
        self.iter()
            .find(|(_, c)| c.local() == local)
            .map(|(id, _)| id)
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &Connection)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|c| (ConnectionId(index as u8), c)))
    }

    /// Ids of the occupied slots in index order.
    pub fn ids(&self) -> Vec<ConnectionId, MAX_CONNECTIONS> {
        let mut ids = Vec::new();
        for (id, _) in self.iter() {
            let _ = ids.push(id);
        }
        ids
    }

    pub fn len(&self) -> usize {
        MAX_CONNECTIONS - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Drops every connection without running any callback.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}
