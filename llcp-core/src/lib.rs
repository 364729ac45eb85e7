//! # llcp-core
//!
//! Logical link engine for llcp.
//!
//! This crate provides:
//! - Service registry and the service callback trait
//! - Fixed-capacity connection table with stable connection ids
//! - Parameter negotiation
//! - Receive dispatch and send scheduling, one frame per link turn
//! - The boundary to the link activation layer
//!
//! All storage is fixed-capacity; nothing allocates after construction.

pub mod connection;
mod dispatch;
pub mod engine;
pub mod error;
pub mod link;
pub mod negotiation;
mod scheduler;
pub mod service;
pub mod stats;
pub mod table;

pub use connection::{
    Connection, ConnectionId, ConnectionState, Intent, Mailbox, Status, MAILBOX_CAPACITY,
};
pub use engine::Engine;
pub use error::CoreError;
pub use link::{DirectLink, LinkError, Transceiver};
pub use negotiation::{effective_miu, Negotiation};
pub use service::{Service, ServiceDescriptor, ServiceRegistry, MAX_SERVICES};
pub use stats::LinkStats;
pub use table::{ConnectionTable, MANAGEMENT_ID, MAX_CONNECTIONS};
