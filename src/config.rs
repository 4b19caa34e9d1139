//! Link and firmware-update configuration.
//!
//! All tunable parameters for a tag session. Values can be persisted by the
//! host application with [`SdkConfig::to_bytes`] and restored with
//! [`SdkConfig::from_bytes`].

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::WriteMode;
use crate::transport::fragmenter::{MAX_MTU, MIN_MTU};

/// Largest payload a single DFU write request may carry.
pub const MAX_WRITE_CHUNK: usize = 128;

/// Protocol generation negotiated with the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Legacy or not yet identified.
    Unknown,
    V2,
}

impl ProtocolVersion {
    /// Characteristic write size used for fragmentation.
    pub fn mtu(self) -> usize {
        match self {
            Self::Unknown => 23,
            Self::V2 => 64,
        }
    }
}

/// Transport-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub protocol: ProtocolVersion,
    /// Per-command response timeout (milliseconds), re-armed on every send.
    pub command_timeout_ms: u32,
    /// Resends allowed after a local serialization/write failure.
    pub command_retries: u8,
    pub command_write_mode: WriteMode,
}

impl LinkConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.command_timeout_ms))
    }

    pub fn mtu(&self) -> usize {
        self.protocol.mtu()
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolVersion::V2,
            command_timeout_ms: 8_000,
            command_retries: 2,
            command_write_mode: WriteMode::WithResponse,
        }
    }
}

/// Firmware-update settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DfuConfig {
    /// Battery must be strictly above this level (percent).
    pub min_battery_percent: u8,
    /// Time allowed for an executed image to confirm (seconds).
    pub execution_timeout_secs: u16,
    /// Bytes per DFU write request.
    pub max_write_chunk: usize,
    /// Start execution as soon as every image is transferred.
    pub auto_execute: bool,
}

impl DfuConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.execution_timeout_secs))
    }
}

impl Default for DfuConfig {
    fn default() -> Self {
        Self {
            min_battery_percent: 10,
            execution_timeout_secs: 60,
            max_write_chunk: MAX_WRITE_CHUNK,
            auto_execute: false,
        }
    }
}

/// Complete session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SdkConfig {
    pub link: LinkConfig,
    pub dfu: DfuConfig,
}

impl SdkConfig {
    /// Reject values that would stall or corrupt a session.
    pub fn validate(&self) -> Result<()> {
        if self.link.command_timeout_ms == 0 {
            return Err(Error::Config("command_timeout_ms must be non-zero"));
        }
        if !(MIN_MTU..=MAX_MTU).contains(&self.link.mtu()) {
            return Err(Error::Config("protocol MTU out of range"));
        }
        if self.dfu.max_write_chunk == 0 || self.dfu.max_write_chunk > MAX_WRITE_CHUNK {
            return Err(Error::Config("max_write_chunk must be 1..=128"));
        }
        if self.dfu.min_battery_percent > 100 {
            return Err(Error::Config("min_battery_percent must be <= 100"));
        }
        if self.dfu.execution_timeout_secs == 0 {
            return Err(Error::Config("execution_timeout_secs must be non-zero"));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|_| Error::Config("serialization failed"))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let config: Self =
            postcard::from_bytes(bytes).map_err(|_| Error::Config("stored config corrupted"))?;
        config.validate()?;
        Ok(config)
    }
}
