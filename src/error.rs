//! Unified error types for the tag link.
//!
//! Every subsystem has its own small `Copy` error enum; all of them convert
//! into the top-level [`Error`] so callers that do not care about the layer
//! can use a single `Result` alias.

use core::fmt;

use crate::protocol::message::Status;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A device frame could not be decoded.
    Decode(DecodeError),
    /// A host frame could not be encoded.
    Encode(EncodeError),
    /// The BLE collaborator reported a failure.
    Link(LinkError),
    /// A command did not complete.
    Transport(TransportError),
    /// A single image transfer failed.
    Writer(WriterError),
    /// A multi-image update failed.
    Update(UpdateError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::Encode(e) => write!(f, "encode: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Writer(e) => write!(f, "writer: {e}"),
            Self::Update(e) => write!(f, "update: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended in the middle of a value.
    Truncated,
    /// A varint ran past 64 bits.
    VarintOverflow,
    /// Field key carried a wire type the envelope does not use.
    UnsupportedWireType(u8),
    /// A mandatory field was absent.
    MissingField(&'static str),
    /// A field was present but out of range.
    InvalidValue(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "input truncated"),
            Self::VarintOverflow => write!(f, "varint overflows 64 bits"),
            Self::UnsupportedWireType(t) => write!(f, "unsupported wire type {t}"),
            Self::MissingField(name) => write!(f, "missing field `{name}`"),
            Self::InvalidValue(name) => write!(f, "invalid value for `{name}`"),
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// Encoded request exceeds the protocol's maximum request size.
    PayloadTooLarge,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadTooLarge => write!(f, "payload too large"),
        }
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

// ---------------------------------------------------------------------------
// Link errors (reported by the BLE collaborator)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    NotConnected,
    WriteFailed,
    CharacteristicUnavailable,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "peripheral not connected"),
            Self::WriteFailed => write!(f, "characteristic write failed"),
            Self::CharacteristicUnavailable => write!(f, "characteristic unavailable"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Outcome of a command that did not produce an OK response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No response arrived before the command timeout.
    Timeout,
    /// The request could not be serialized (retries exhausted).
    Encode(EncodeError),
    /// The fragments could not be written (retries exhausted).
    Link(LinkError),
    /// The device answered with a non-OK status.
    Device(Status),
    /// The response payload could not be decoded.
    Decode(DecodeError),
    /// The link dropped while the request was queued.
    Disconnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "command timed out"),
            Self::Encode(e) => write!(f, "serialization failed: {e}"),
            Self::Link(e) => write!(f, "write failed: {e}"),
            Self::Device(status) => write!(f, "device returned {status:?}"),
            Self::Decode(e) => write!(f, "bad response: {e}"),
            Self::Disconnected => write!(f, "link disconnected"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<DecodeError> for TransportError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

// ---------------------------------------------------------------------------
// Firmware update errors
// ---------------------------------------------------------------------------

/// Terminal failure of a single image transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterError {
    /// A write acknowledgement reported a CRC that does not match the image.
    CrcMismatch,
    /// The device acknowledged an offset past the end of the image.
    DataCorruption,
    /// The writer was driven in a way its state does not allow.
    InternalError(&'static str),
    /// A DFU command failed underneath the writer.
    Transport(TransportError),
}

impl fmt::Display for WriterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CrcMismatch => write!(f, "CRC mismatch"),
            Self::DataCorruption => write!(f, "data corruption"),
            Self::InternalError(msg) => write!(f, "internal error: {msg}"),
            Self::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl From<WriterError> for Error {
    fn from(e: WriterError) -> Self {
        Self::Writer(e)
    }
}

impl From<TransportError> for WriterError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Terminal failure of a whole update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    TagDisconnected,
    LowBattery,
    DataUnavailable,
    InvalidState(&'static str),
    InternalError(&'static str),
    /// An image transfer failed.
    Transfer(WriterError),
    /// A battery, module or execute command failed.
    Execution(TransportError),
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TagDisconnected => write!(f, "tag disconnected"),
            Self::LowBattery => write!(f, "battery too low"),
            Self::DataUnavailable => write!(f, "firmware image unavailable"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::InternalError(msg) => write!(f, "internal error: {msg}"),
            Self::Transfer(e) => write!(f, "transfer failed: {e}"),
            Self::Execution(e) => write!(f, "execution failed: {e}"),
        }
    }
}

impl From<UpdateError> for Error {
    fn from(e: UpdateError) -> Self {
        Self::Update(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
