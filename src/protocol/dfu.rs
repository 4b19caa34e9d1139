//! Typed payloads for the firmware-update and housekeeping commands.
//!
//! Each payload knows its field layout and how to wrap itself in a
//! [`Request`]. Missing scalar fields decode as zero.

use crate::error::DecodeError;

use super::message::{Domain, Notification, Opcode, Request, Status};
use super::wire::{FieldReader, FieldWriter};

// ── DFU status ───────────────────────────────────────────────

/// Ask the tag how much of a component's image it already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuStatusRequest {
    pub vendor_id: u32,
    pub product_id: u32,
    pub component_id: u32,
}

impl DfuStatusRequest {
    pub fn into_request(self) -> Request {
        let payload = FieldWriter::new()
            .varint(1, self.vendor_id.into())
            .varint(2, self.product_id.into())
            .varint(3, self.component_id.into())
            .finish();
        Request::new(Domain::Dfu, Opcode::DfuStatus, payload)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self {
            vendor_id: 0,
            product_id: 0,
            component_id: 0,
        };
        for field in FieldReader::new(payload) {
            match field? {
                (1, v) => out.vendor_id = v.as_u32("vendor_id")?,
                (2, v) => out.product_id = v.as_u32("product_id")?,
                (3, v) => out.component_id = v.as_u32("component_id")?,
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Device-reported transfer progress for one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DfuStatusResponse {
    pub current_size: u32,
    pub current_crc: u32,
    pub final_size: u32,
    pub final_crc: u32,
}

impl DfuStatusResponse {
    pub fn encode(&self) -> Vec<u8> {
        FieldWriter::new()
            .varint(1, self.current_size.into())
            .varint(2, self.current_crc.into())
            .varint(3, self.final_size.into())
            .varint(4, self.final_crc.into())
            .finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        for field in FieldReader::new(payload) {
            match field? {
                (1, v) => out.current_size = v.as_u32("current_size")?,
                (2, v) => out.current_crc = v.as_u32("current_crc")?,
                (3, v) => out.final_size = v.as_u32("final_size")?,
                (4, v) => out.final_crc = v.as_u32("final_crc")?,
                _ => {}
            }
        }
        Ok(out)
    }
}

// ── DFU prepare ──────────────────────────────────────────────

/// Start a fresh transfer for a component, discarding partial data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuPrepareRequest {
    pub vendor_id: u32,
    pub product_id: u32,
    pub component_id: u32,
    pub final_size: u32,
    pub final_crc: u32,
}

impl DfuPrepareRequest {
    pub fn into_request(self) -> Request {
        let payload = FieldWriter::new()
            .varint(1, self.vendor_id.into())
            .varint(2, self.product_id.into())
            .varint(3, self.component_id.into())
            .varint(4, self.final_size.into())
            .varint(5, self.final_crc.into())
            .finish();
        Request::new(Domain::Dfu, Opcode::DfuPrepare, payload)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self {
            vendor_id: 0,
            product_id: 0,
            component_id: 0,
            final_size: 0,
            final_crc: 0,
        };
        for field in FieldReader::new(payload) {
            match field? {
                (1, v) => out.vendor_id = v.as_u32("vendor_id")?,
                (2, v) => out.product_id = v.as_u32("product_id")?,
                (3, v) => out.component_id = v.as_u32("component_id")?,
                (4, v) => out.final_size = v.as_u32("final_size")?,
                (5, v) => out.final_crc = v.as_u32("final_crc")?,
                _ => {}
            }
        }
        Ok(out)
    }
}

// ── DFU write ────────────────────────────────────────────────

/// One image chunk at a byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfuWriteRequest {
    pub offset: u32,
    pub data: Vec<u8>,
}

impl DfuWriteRequest {
    pub fn into_request(self) -> Request {
        let payload = FieldWriter::new()
            .bytes(1, &self.data)
            .varint(2, self.offset.into())
            .finish();
        Request::new(Domain::Dfu, Opcode::DfuWrite, payload)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self {
            offset: 0,
            data: Vec::new(),
        };
        for field in FieldReader::new(payload) {
            match field? {
                (1, v) => out.data = v.as_bytes("data")?.to_vec(),
                (2, v) => out.offset = v.as_u32("offset")?,
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Write acknowledgement: the device's new offset and running CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DfuWriteResponse {
    pub offset: u32,
    pub crc: u32,
}

impl DfuWriteResponse {
    pub fn encode(&self) -> Vec<u8> {
        FieldWriter::new()
            .varint(1, self.offset.into())
            .varint(2, self.crc.into())
            .finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        for field in FieldReader::new(payload) {
            match field? {
                (1, v) => out.offset = v.as_u32("offset")?,
                (2, v) => out.crc = v.as_u32("crc")?,
                _ => {}
            }
        }
        Ok(out)
    }
}

// ── DFU execute ──────────────────────────────────────────────

/// Apply a fully transferred image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuExecuteRequest {
    pub vendor_id: u32,
    pub product_id: u32,
}

impl DfuExecuteRequest {
    pub fn into_request(self) -> Request {
        let payload = FieldWriter::new()
            .varint(1, self.vendor_id.into())
            .varint(2, self.product_id.into())
            .finish();
        Request::new(Domain::Dfu, Opcode::DfuExecute, payload)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self {
            vendor_id: 0,
            product_id: 0,
        };
        for field in FieldReader::new(payload) {
            match field? {
                (1, v) => out.vendor_id = v.as_u32("vendor_id")?,
                (2, v) => out.product_id = v.as_u32("product_id")?,
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Pushed by the tag once an attached component has applied its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuExecuteNotification {
    pub vendor_id: u32,
    pub product_id: u32,
    pub status: Status,
}

impl DfuExecuteNotification {
    pub fn into_notification(self) -> Notification {
        let payload = FieldWriter::new()
            .varint(1, self.vendor_id.into())
            .varint(2, self.product_id.into())
            .varint(3, self.status.code().into())
            .finish();
        Notification::new(Domain::Dfu, Opcode::DfuExecuteNotification, payload)
    }

    /// `None` when `notification` is some other event.
    pub fn from_notification(notification: &Notification) -> Option<Result<Self, DecodeError>> {
        if !notification.is(Domain::Dfu, Opcode::DfuExecuteNotification) {
            return None;
        }
        Some(Self::decode(&notification.payload))
    }

    fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self {
            vendor_id: 0,
            product_id: 0,
            status: Status::Ok,
        };
        for field in FieldReader::new(payload) {
            match field? {
                (1, v) => out.vendor_id = v.as_u32("vendor_id")?,
                (2, v) => out.product_id = v.as_u32("product_id")?,
                (3, v) => out.status = Status::from_code(v.as_u32("status")?),
                _ => {}
            }
        }
        Ok(out)
    }
}

// ── Battery ──────────────────────────────────────────────────

pub fn battery_status_request() -> Request {
    Request::bare(Domain::Base, Opcode::BatteryStatus)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatteryStatusResponse {
    /// Charge in percent, 0–100.
    pub battery_level: u8,
    pub charging: bool,
}

impl BatteryStatusResponse {
    pub fn encode(&self) -> Vec<u8> {
        FieldWriter::new()
            .varint(1, self.battery_level.into())
            .bool(2, self.charging)
            .finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self::default();
        for field in FieldReader::new(payload) {
            match field? {
                (1, v) => {
                    let level = v.as_u32("battery_level")?;
                    if level > 100 {
                        return Err(DecodeError::InvalidValue("battery_level"));
                    }
                    out.battery_level = level as u8;
                }
                (2, v) => out.charging = v.as_bool("charging")?,
                _ => {}
            }
        }
        Ok(out)
    }
}

// ── Loadable modules ─────────────────────────────────────────

pub fn list_modules_request() -> Request {
    Request::bare(Domain::Base, Opcode::ListModules)
}

/// A loadable module as reported by the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub vendor_id: u32,
    pub product_id: u32,
    pub module_id: u32,
    pub is_enabled: bool,
}

impl ModuleDescriptor {
    fn encode(&self) -> Vec<u8> {
        FieldWriter::new()
            .varint(1, self.vendor_id.into())
            .varint(2, self.product_id.into())
            .varint(3, self.module_id.into())
            .bool(4, self.is_enabled)
            .finish()
    }

    fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self {
            vendor_id: 0,
            product_id: 0,
            module_id: 0,
            is_enabled: false,
        };
        for field in FieldReader::new(payload) {
            match field? {
                (1, v) => out.vendor_id = v.as_u32("vendor_id")?,
                (2, v) => out.product_id = v.as_u32("product_id")?,
                (3, v) => out.module_id = v.as_u32("module_id")?,
                (4, v) => out.is_enabled = v.as_bool("is_enabled")?,
                _ => {}
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListModulesResponse {
    pub modules: Vec<ModuleDescriptor>,
}

impl ListModulesResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        for module in &self.modules {
            w.bytes(1, &module.encode());
        }
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut modules = Vec::new();
        for field in FieldReader::new(payload) {
            if let (1, v) = field? {
                modules.push(ModuleDescriptor::decode(v.as_bytes("modules")?)?);
            }
        }
        Ok(Self { modules })
    }
}

/// Activate or deactivate one loadable module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleRequest {
    pub vendor_id: u32,
    pub product_id: u32,
    pub module_id: u32,
}

impl ModuleRequest {
    pub fn deactivate(self) -> Request {
        Request::new(Domain::Base, Opcode::DeactivateModule, self.encode())
    }

    pub fn activate(self) -> Request {
        Request::new(Domain::Base, Opcode::ActivateModule, self.encode())
    }

    fn encode(self) -> Vec<u8> {
        FieldWriter::new()
            .varint(1, self.vendor_id.into())
            .varint(2, self.product_id.into())
            .varint(3, self.module_id.into())
            .finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut out = Self {
            vendor_id: 0,
            product_id: 0,
            module_id: 0,
        };
        for field in FieldReader::new(payload) {
            match field? {
                (1, v) => out.vendor_id = v.as_u32("vendor_id")?,
                (2, v) => out.product_id = v.as_u32("product_id")?,
                (3, v) => out.module_id = v.as_u32("module_id")?,
                _ => {}
            }
        }
        Ok(out)
    }
}
