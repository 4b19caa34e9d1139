//! Packet transport over the tag's four characteristics.
//!
//! ```text
//! ┌───────────┐  Request   ┌──────────────────┐  chunks  ┌─────────────────┐
//! │  caller   │──────────▶│ TransportEngine  │────────▶│ Command (write) │
//! │           │◀──────────│ (FIFO, 1 in      │          └─────────────────┘
//! └───────────┘ Completion │  flight, timer)  │◀── Response (notify)
//!                          │                  │◀── Notification (notify)
//!   NotificationSink ◀─────│ NotificationHub  │◀─▶ RawData (notify + ack)
//!                          └──────────────────┘
//! ```

pub mod engine;
pub mod fragmenter;
pub mod notifications;

use serde::{Deserialize, Serialize};

/// The four logically distinct byte streams exposed by the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Host → tag commands (write-only).
    Command,
    /// Tag → host command responses (notify).
    Response,
    /// Tag → host unsolicited events (notify).
    Notification,
    /// Tag → host bulk data (notify), acknowledged by host writes.
    RawData,
}

/// ATT write flavour for characteristic writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}
