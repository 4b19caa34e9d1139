//! Application layer: the boundary traits and the session that drives the
//! sans-IO engines.
//!
//! The transport engine, image writer and update orchestrator never touch
//! BLE or timers directly. They talk to the outside world through the
//! **port traits** in [`ports`], which [`session::TagSession`] implements on
//! top of a platform [`ports::Peripheral`].

pub mod events;
pub mod ports;
pub mod session;
