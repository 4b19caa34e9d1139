//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter    | Implements                                     | Connects to |
//! |------------|------------------------------------------------|-------------|
//! | `log_sink` | UpdateSink, NotificationSink, RawDataSink      | `log` facade |
//!
//! The BLE [`Peripheral`](crate::app::ports::Peripheral) is supplied by the
//! host platform.

pub mod log_sink;
