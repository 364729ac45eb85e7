//! Per-link counters.

use llcp_protocol::PduType;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub keepalives_sent: u64,
    pub keepalives_received: u64,
    pub info_frames_sent: u64,
    pub info_frames_received: u64,
    pub info_bytes_sent: u64,
    pub info_bytes_received: u64,
    pub protocol_errors: u64,
    pub link_resets: u64,
}

impl LinkStats {
    pub(crate) fn record_sent(&mut self, ptype: PduType, payload: usize) {
        self.frames_sent += 1;
        match ptype {
            PduType::Symm => self.keepalives_sent += 1,
            PduType::I => {
                self.info_frames_sent += 1;
                self.info_bytes_sent += payload as u64;
            }
            PduType::Ui => self.info_bytes_sent += payload as u64,
            _ => {}
        }
    }

    pub(crate) fn record_received(&mut self, ptype: PduType, payload: usize) {
        self.frames_received += 1;
        match ptype {
            PduType::Symm => self.keepalives_received += 1,
            PduType::I => {
                self.info_frames_received += 1;
                self.info_bytes_received += payload as u64;
            }
            PduType::Ui => self.info_bytes_received += payload as u64,
            _ => {}
        }
    }
}
