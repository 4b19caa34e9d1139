//! Request / response / notification envelope.
//!
//! ```text
//! Request       { domain(1), opcode(2), id(3), payload(4) }
//! Response      { id(1), status(2), payload(3) }
//! Notification  { domain(1), opcode(2), payload(3) }
//! ```
//!
//! The request id is assigned when the request is actually written, not when
//! it is queued, so [`Request`] itself carries no id.

use crate::error::{DecodeError, EncodeError};

use super::wire::{FieldReader, FieldWriter};

/// Largest encoded request the tag accepts.
pub const MAX_REQUEST_SIZE: usize = 512;

// ── Domain / opcode / status ─────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Base,
    Gear,
    Ble,
    Dfu,
    Other(u32),
}

impl Domain {
    pub fn code(self) -> u32 {
        match self {
            Self::Base => 0,
            Self::Gear => 1,
            Self::Ble => 2,
            Self::Dfu => 3,
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Base,
            1 => Self::Gear,
            2 => Self::Ble,
            3 => Self::Dfu,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    BatteryStatus,
    ListModules,
    ActivateModule,
    DeactivateModule,
    DfuStatus,
    DfuPrepare,
    DfuWrite,
    DfuExecute,
    DfuExecuteNotification,
    Other(u32),
}

impl Opcode {
    pub fn code(self) -> u32 {
        match self {
            Self::BatteryStatus => 1,
            Self::ListModules => 2,
            Self::ActivateModule => 3,
            Self::DeactivateModule => 4,
            Self::DfuStatus => 10,
            Self::DfuPrepare => 11,
            Self::DfuWrite => 12,
            Self::DfuExecute => 13,
            Self::DfuExecuteNotification => 14,
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::BatteryStatus,
            2 => Self::ListModules,
            3 => Self::ActivateModule,
            4 => Self::DeactivateModule,
            10 => Self::DfuStatus,
            11 => Self::DfuPrepare,
            12 => Self::DfuWrite,
            13 => Self::DfuExecute,
            14 => Self::DfuExecuteNotification,
            other => Self::Other(other),
        }
    }
}

/// Device-reported outcome code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Unsupported,
    BadParam,
    Battery,
    Hardware,
    Auth,
    DeviceType,
    InvalidState,
    FlashAccess,
    Checksum,
    Busy,
    AppTimeout,
    AppUnknown,
    Unknown,
    Other(u32),
}

impl Status {
    pub fn code(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::Unsupported => 1,
            Self::BadParam => 2,
            Self::Battery => 3,
            Self::Hardware => 4,
            Self::Auth => 5,
            Self::DeviceType => 6,
            Self::InvalidState => 7,
            Self::FlashAccess => 8,
            Self::Checksum => 9,
            Self::Busy => 10,
            Self::AppTimeout => 253,
            Self::AppUnknown => 254,
            Self::Unknown => 255,
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Unsupported,
            2 => Self::BadParam,
            3 => Self::Battery,
            4 => Self::Hardware,
            5 => Self::Auth,
            6 => Self::DeviceType,
            7 => Self::InvalidState,
            8 => Self::FlashAccess,
            9 => Self::Checksum,
            10 => Self::Busy,
            253 => Self::AppTimeout,
            254 => Self::AppUnknown,
            255 => Self::Unknown,
            other => Self::Other(other),
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

// ── Request id ───────────────────────────────────────────────

/// One-byte request id in `[1, 254]`; 0 is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u8);

impl RequestId {
    pub const FIRST: Self = Self(1);
    pub const LAST: Self = Self(254);

    /// The id following this one, wrapping from 254 back to 1.
    pub fn next(self) -> Self {
        if self.0 >= Self::LAST.0 {
            Self::FIRST
        } else {
            Self(self.0 + 1)
        }
    }
}

// ── Request ──────────────────────────────────────────────────

/// A command addressed to the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub domain: Domain,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(domain: Domain, opcode: Opcode, payload: Vec<u8>) -> Self {
        Self {
            domain,
            opcode,
            payload,
        }
    }

    /// Request with no payload.
    pub fn bare(domain: Domain, opcode: Opcode) -> Self {
        Self::new(domain, opcode, Vec::new())
    }

    /// Serialize with the id chosen at send time.
    pub fn encode(&self, id: RequestId) -> Result<Vec<u8>, EncodeError> {
        let mut w = FieldWriter::new();
        w.varint(1, u64::from(self.domain.code()))
            .varint(2, u64::from(self.opcode.code()))
            .varint(3, u64::from(id.0));
        if !self.payload.is_empty() {
            w.bytes(4, &self.payload);
        }
        let bytes = w.finish();
        if bytes.len() > MAX_REQUEST_SIZE {
            return Err(EncodeError::PayloadTooLarge);
        }
        Ok(bytes)
    }

    /// Parse a request as the tag would see it.
    pub fn decode(bytes: &[u8]) -> Result<(RequestId, Self), DecodeError> {
        let mut domain = None;
        let mut opcode = None;
        let mut id = None;
        let mut payload = Vec::new();
        for field in FieldReader::new(bytes) {
            match field? {
                (1, v) => domain = Some(Domain::from_code(v.as_u32("domain")?)),
                (2, v) => opcode = Some(Opcode::from_code(v.as_u32("opcode")?)),
                (3, v) => {
                    let raw = u8::try_from(v.as_u32("id")?)
                        .map_err(|_| DecodeError::InvalidValue("id"))?;
                    id = Some(RequestId(raw));
                }
                (4, v) => payload = v.as_bytes("payload")?.to_vec(),
                _ => {}
            }
        }
        let request = Self {
            domain: domain.ok_or(DecodeError::MissingField("domain"))?,
            opcode: opcode.ok_or(DecodeError::MissingField("opcode"))?,
            payload,
        };
        Ok((id.ok_or(DecodeError::MissingField("id"))?, request))
    }
}

// ── Response ─────────────────────────────────────────────────

/// The tag's reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: RequestId,
    pub status: Status,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn ok(id: RequestId, payload: Vec<u8>) -> Self {
        Self {
            id,
            status: Status::Ok,
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        w.varint(1, u64::from(self.id.0))
            .varint(2, u64::from(self.status.code()));
        if !self.payload.is_empty() {
            w.bytes(3, &self.payload);
        }
        w.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut id = None;
        let mut status = Status::Ok;
        let mut payload = Vec::new();
        for field in FieldReader::new(bytes) {
            match field? {
                (1, v) => {
                    let raw = u8::try_from(v.as_u32("id")?)
                        .map_err(|_| DecodeError::InvalidValue("id"))?;
                    id = Some(RequestId(raw));
                }
                (2, v) => status = Status::from_code(v.as_u32("status")?),
                (3, v) => payload = v.as_bytes("payload")?.to_vec(),
                _ => {}
            }
        }
        Ok(Self {
            id: id.ok_or(DecodeError::MissingField("id"))?,
            status,
            payload,
        })
    }
}

// ── Notification ─────────────────────────────────────────────

/// An unsolicited event pushed by the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub domain: Domain,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Notification {
    pub fn new(domain: Domain, opcode: Opcode, payload: Vec<u8>) -> Self {
        Self {
            domain,
            opcode,
            payload,
        }
    }

    pub fn is(&self, domain: Domain, opcode: Opcode) -> bool {
        self.domain == domain && self.opcode == opcode
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        w.varint(1, u64::from(self.domain.code()))
            .varint(2, u64::from(self.opcode.code()));
        if !self.payload.is_empty() {
            w.bytes(3, &self.payload);
        }
        w.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut domain = None;
        let mut opcode = None;
        let mut payload = Vec::new();
        for field in FieldReader::new(bytes) {
            match field? {
                (1, v) => domain = Some(Domain::from_code(v.as_u32("domain")?)),
                (2, v) => opcode = Some(Opcode::from_code(v.as_u32("opcode")?)),
                (3, v) => payload = v.as_bytes("payload")?.to_vec(),
                _ => {}
            }
        }
        Ok(Self {
            domain: domain.ok_or(DecodeError::MissingField("domain"))?,
            opcode: opcode.ok_or(DecodeError::MissingField("opcode"))?,
            payload,
        })
    }
}
