//! Binary protocol spoken over the tag's command, response and
//! notification characteristics.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────┐   ┌───────────────────┐
//! │ dfu payloads │──▶│ Request / Response / │──▶│ field-tagged wire │
//! │ (typed)      │   │ Notification         │   │ (varint keys)     │
//! └──────────────┘   └──────────────────────┘   └───────────────────┘
//! ```
//!
//! The envelope layer only interprets `domain`, `opcode`, `id` and `status`.
//! Everything else travels as an opaque payload that the [`dfu`] module
//! knows how to read for the firmware-update flow.

pub mod dfu;
pub mod message;
pub mod wire;
