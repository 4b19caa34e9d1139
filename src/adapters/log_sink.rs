//! Log-based sink adapter.
//!
//! Writes one structured line per update state, tag notification or
//! raw-data payload through the `log` facade. Handy as a default observer
//! while a UI or telemetry adapter is not attached.

use log::{debug, info, warn};

use crate::app::ports::{NotificationSink, RawDataSink, UpdateSink};
use crate::dfu::update::UpdateState;
use crate::protocol::message::Notification;

/// Adapter that logs every event it observes.
#[derive(Debug, Default)]
pub struct LogSink {
    label: &'static str,
}

impl LogSink {
    pub fn new(label: &'static str) -> Self {
        Self { label }
    }
}

impl UpdateSink for LogSink {
    fn on_update_state(&mut self, state: &UpdateState) {
        match state {
            UpdateState::Transferring(p) => {
                debug!("DFU   | {} | transferring {:.1}%", self.label, p);
            }
            UpdateState::Error(e) => warn!("DFU   | {} | failed: {}", self.label, e),
            other => info!("DFU   | {} | {:?}", self.label, other),
        }
    }
}

impl NotificationSink for LogSink {
    fn on_notification(&mut self, n: &Notification) {
        info!(
            "NOTIF | {} | {:?}/{:?} | {} bytes",
            self.label,
            n.domain,
            n.opcode,
            n.payload.len()
        );
    }
}

impl RawDataSink for LogSink {
    fn on_raw_data(&mut self, sequence: u8, payload: &[u8]) {
        debug!("RAW   | {} | seq={} | {} bytes", self.label, sequence, payload.len());
    }
}
