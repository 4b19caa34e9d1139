//! Firmware update over the transport engine.
//!
//! ```text
//!   UpdateOrchestrator ──▶ ImageWriter (one at a time) ──▶ CommandPort
//!          ▲                        ▲                          │
//!          └──── notifications, connection status, results ◀───┘
//! ```
//!
//! - [`plan`]: what to update and in which order.
//! - [`writer`]: transfers one image to one component, resuming where the
//!   device left off.
//! - [`update`]: sequences writers, gates on battery and connection, and
//!   drives execution.

pub mod plan;
pub mod update;
pub mod writer;
