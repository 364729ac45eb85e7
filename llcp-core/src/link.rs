//! Boundary to the link activation layer.
//!
//! The activation layer detects the peer and moves raw frames. The engine
//! sees it through two contracts:
//! - initiator role: [`Transceiver::exchange`] sends one frame and returns
//!   exactly one reply;
//! - target role: the lower layer calls [`Engine::on_frame`] with the
//!   received frame and transmits whatever the engine left in the buffer.
//!
//! [`DirectLink`] joins an initiator to a target engine in memory.

use crate::engine::Engine;
use crate::service::Service;
use thiserror::Error;

/// The physical link went away; every connection is gone with it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("link lost: {reason}")]
pub struct LinkError {
    reason: String,
}

impl LinkError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Synchronous half-duplex frame exchange, initiator side.
pub trait Transceiver {
    /// Transmits `frame` and blocks until the peer's reply has been written
    /// into `reply`. Returns the reply length.
    fn exchange(&mut self, frame: &[u8], reply: &mut [u8]) -> Result<usize, LinkError>;
}

impl<T: Transceiver + ?Sized> Transceiver for &mut T {
    fn exchange(&mut self, frame: &[u8], reply: &mut [u8]) -> Result<usize, LinkError> {
        (**self).exchange(frame, reply)
    }
}

/// In-memory link delivering every frame straight to a target engine.
///
/// Any error the target raises, a protocol violation included, surfaces on
/// the initiator as a [`LinkError`], so the initiator resets as if the field
/// were lost. The target's error code is kept in the reason.
pub struct DirectLink<'a, S: Service> {
    peer: &'a mut Engine<S>,
}

impl<'a, S: Service> DirectLink<'a, S> {
    pub fn new(peer: &'a mut Engine<S>) -> Self {
        Self { peer }
    }

    pub fn peer(&mut self) -> &mut Engine<S> {
        self.peer
    }
}

impl<S: Service> Transceiver for DirectLink<'_, S> {
    fn exchange(&mut self, frame: &[u8], reply: &mut [u8]) -> Result<usize, LinkError> {
        if frame.len() > reply.len() {
            return Err(LinkError::new(format!(
                "frame of {} bytes exceeds link buffer of {}",
                frame.len(),
                reply.len()
            )));
        }

        reply[..frame.len()].copy_from_slice(frame);
        let mut len = frame.len();
        self.peer
            .on_frame(reply, &mut len)
            .map_err(|e| {
                LinkError::new(format!("peer failed ({}): {}", e.error_code(), e))
            })?;
        Ok(len)
    }
}
