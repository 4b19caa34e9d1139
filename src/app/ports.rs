//! Port traits: the boundary between the link core and the outside world.
//!
//! ```text
//!   BLE stack ──▶ Peripheral ──▶ TagSession ──▶ sinks (app / UI / logs)
//! ```
//!
//! Driving adapters (the platform BLE stack) implement [`Peripheral`].
//! Driven adapters (application code, logging) implement the sink traits.
//! The state machines themselves only see [`TransportPort`], [`CommandPort`]
//! and [`DfuPort`], which the session implements, so every engine is
//! testable with a recording mock.

use core::time::Duration;

use crate::dfu::update::UpdateState;
use crate::error::LinkError;
use crate::protocol::message::{Notification, Request};
use crate::transport::{Characteristic, WriteMode};

// ───────────────────────────────────────────────────────────────
// BLE boundary (consumed)
// ───────────────────────────────────────────────────────────────

/// A connected, service-discovered tag handed in by the BLE collaborator.
///
/// Inbound traffic (characteristic updates, RSSI, connection state) is
/// pushed into the session as [`LinkEvent`](super::events::LinkEvent)s.
pub trait Peripheral {
    /// Write one chunk to a characteristic.
    fn write_value(
        &mut self,
        data: &[u8],
        characteristic: Characteristic,
        mode: WriteMode,
    ) -> Result<(), LinkError>;

    /// Ask the stack for a fresh RSSI reading; the result arrives later as
    /// a `RssiUpdate` event.
    fn read_rssi(&mut self) -> Result<(), LinkError>;
}

// ───────────────────────────────────────────────────────────────
// Engine-facing ports (implemented by the session)
// ───────────────────────────────────────────────────────────────

/// Identifies one armed command timeout; stale firings are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken(pub u32);

/// What the transport engine needs from its host.
pub trait TransportPort {
    fn write_value(
        &mut self,
        data: &[u8],
        characteristic: Characteristic,
        mode: WriteMode,
    ) -> Result<(), LinkError>;

    /// Arm the single command timeout, replacing any previous one.
    fn arm_timeout(&mut self, token: TimerToken, after: Duration);

    fn cancel_timeout(&mut self);
}

/// Queue a command; its result is fed back to the issuer later, in FIFO order.
pub trait CommandPort {
    fn send_command(&mut self, request: Request);
}

/// What the update orchestration needs from its host.
pub trait DfuPort: CommandPort {
    fn arm_execution_timer(&mut self, after: Duration);

    fn cancel_execution_timer(&mut self);

    /// Called on every state change of the update run.
    fn publish(&mut self, state: &UpdateState);
}

// ───────────────────────────────────────────────────────────────
// Sinks (driven adapters)
// ───────────────────────────────────────────────────────────────

/// Receives tag notifications, including any cached backlog.
pub trait NotificationSink {
    fn on_notification(&mut self, notification: &Notification);
}

/// Receives raw-data payloads; acknowledgement is handled by the engine.
pub trait RawDataSink {
    fn on_raw_data(&mut self, sequence: u8, payload: &[u8]);
}

/// Observes an update run.
pub trait UpdateSink {
    fn on_update_state(&mut self, state: &UpdateState);
}
