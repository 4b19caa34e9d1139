//! TagLink: packet transport and firmware-update core for BLE wearable tags.
//!
//! ```text
//!  UpdateOrchestrator ─▶ ImageWriter ─▶ TransportEngine ─▶ Fragmenter ─▶ BLE
//!          ▲                  ▲               │
//!          └──────────────────┴── responses, notifications, raw data
//! ```
//!
//! The engines are sans-IO state machines; [`app::session::TagSession`]
//! drives them from a single async task fed by the platform BLE stack.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod codec;
pub mod config;
pub mod dfu;
pub mod protocol;
pub mod transport;

mod error;

pub use error::{
    DecodeError, EncodeError, Error, LinkError, Result, TransportError, UpdateError, WriterError,
};
