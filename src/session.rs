//! Two-peer demo session.
//!
//! Runs an initiator and a target engine over an in-memory link: activation,
//! connect, a payload echoed back by the target, disconnect.

use crate::config::Config;
use llcp_core::{
    Connection, ConnectionId, CoreError, DirectLink, Engine, LinkStats, Service, MAILBOX_CAPACITY,
};
use llcp_protocol::MAX_FRAME_LEN;
use serde::Serialize;
use std::cell::Cell;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{phase} did not finish within {ticks} link turns")]
    Timeout { phase: &'static str, ticks: usize },

    #[error("target never accepted the connection")]
    NotAccepted,
}

/// Service bound on both peers; counts its callbacks.
#[derive(Debug, Clone)]
pub struct SessionService {
    role: &'static str,
    connects: Rc<Cell<u32>>,
    disconnects: Rc<Cell<u32>>,
}

impl SessionService {
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            connects: Rc::new(Cell::new(0)),
            disconnects: Rc::new(Cell::new(0)),
        }
    }
}

impl Service for SessionService {
    fn on_connect(&mut self, id: ConnectionId, connection: &mut Connection) {
        self.connects.set(self.connects.get() + 1);
        tracing::info!(
            "[{}] service {} connected on {} (remote {})",
            self.role,
            connection.local(),
            id,
            connection.remote()
        );
    }

    fn on_disconnect(&mut self, id: ConnectionId, connection: &mut Connection) {
        self.disconnects.set(self.disconnects.get() + 1);
        tracing::info!(
            "[{}] service {} disconnected from {}",
            self.role,
            connection.local(),
            id
        );
    }
}

/// Per-peer part of the report.
#[derive(Debug, Clone, Serialize)]
pub struct PeerReport {
    pub connects: u32,
    pub disconnects: u32,
    pub stats: LinkStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub service_sap: u8,
    pub link_miu: usize,
    pub connection_miu: usize,
    pub window: u8,
    pub ticks: usize,
    pub bytes_sent: usize,
    pub bytes_echoed: usize,
    pub echo_matches: bool,
    pub initiator: PeerReport,
    pub target: PeerReport,
}

struct Link {
    initiator: Engine<SessionService>,
    target: Engine<SessionService>,
    ticks: usize,
    max_ticks: usize,
}

impl Link {
    fn tick(&mut self) -> Result<(), CoreError> {
        self.ticks += 1;
        self.initiator
            .tick(&mut DirectLink::new(&mut self.target))
    }

    /// Turns the link until `step` reports completion. `step` also runs
    /// before the first turn.
    fn until<F>(&mut self, phase: &'static str, mut step: F) -> Result<(), SessionError>
    where
        F: FnMut(&mut Self) -> Result<bool, SessionError>,
    {
        let start = self.ticks;
        loop {
            if step(self)? {
                tracing::debug!("{} finished after {} turns", phase, self.ticks - start);
                return Ok(());
            }
            if self.ticks >= self.max_ticks {
                return Err(SessionError::Timeout {
                    phase,
                    ticks: self.ticks,
                });
            }
            self.tick()?;
        }
    }
}

/// Runs the whole session described by `config`.
pub fn run(config: &Config) -> Result<SessionReport, SessionError> {
    let params = config.local.parameters();
    let sap = config.session.service_sap;

    let initiator_service = SessionService::new("initiator");
    let target_service = SessionService::new("target");
    let mut link = Link {
        initiator: Engine::new(params),
        target: Engine::new(params),
        ticks: 0,
        max_ticks: config.session.max_ticks,
    };
    link.initiator
        .register_service(sap, initiator_service.clone())?;
    link.target.register_service(sap, target_service.clone())?;

    let mut block = [0u8; MAX_FRAME_LEN];
    let len = link.target.activation_bytes(&mut block)?;
    link.initiator.activate(&block[..len])?;
    let len = link.initiator.activation_bytes(&mut block)?;
    link.target.activate(&block[..len])?;
    tracing::info!("Link up, MIU {}", link.initiator.link_miu());

    let id = link.initiator.connect(sap)?;
    link.until("connect", |link| {
        Ok(link.initiator.connection(id)?.is_connected())
    })?;
    let target_id = link
        .target
        .connections()
        .find(|(_, c)| c.local() == sap)
        .map(|(id, _)| id)
        .ok_or(SessionError::NotAccepted)?;
    let connection = link.initiator.connection(id)?;
    let (connection_miu, window) = (connection.miu(), connection.window());

    let payload: Vec<u8> = (0..config.session.payload_bytes)
        .map(|i| (i % 251) as u8)
        .collect();
    link.initiator.send(id, &payload)?;

    let mut echoed = Vec::with_capacity(payload.len());
    let mut scratch = [0u8; MAILBOX_CAPACITY];
    link.until("echo", |link| {
        let n = link.target.receive(target_id, &mut scratch)?;
        if n > 0 {
            link.target.send(target_id, &scratch[..n])?;
        }
        let n = link.initiator.receive(id, &mut scratch)?;
        echoed.extend_from_slice(&scratch[..n]);
        Ok(echoed.len() >= payload.len())
    })?;

    link.initiator.disconnect(id)?;
    link.until("disconnect", |link| {
        Ok(link.initiator.connection(id).is_err())
    })?;
    if link
        .target
        .connection(target_id)
        .map(|c| c.status().disconnect_received)
        .unwrap_or(false)
    {
        link.target.remove(target_id);
    }

    Ok(SessionReport {
        service_sap: sap,
        link_miu: link.initiator.link_miu(),
        connection_miu,
        window,
        ticks: link.ticks,
        bytes_sent: payload.len(),
        bytes_echoed: echoed.len(),
        echo_matches: echoed == payload,
        initiator: PeerReport {
            connects: initiator_service.connects.get(),
            disconnects: initiator_service.disconnects.get(),
            stats: *link.initiator.stats(),
        },
        target: PeerReport {
            connects: target_service.connects.get(),
            disconnects: target_service.disconnects.get(),
            stats: *link.target.stats(),
        },
    })
}
