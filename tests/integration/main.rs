//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one layer of the stack
//! against the scripted tag in `mock_device`. Everything runs on the host
//! with no BLE hardware.

mod mock_device;
mod session_tests;
mod transport_tests;
mod update_flow_tests;
