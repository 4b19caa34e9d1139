//! Leaf codecs shared by the transport and firmware-update layers.
//!
//! - [`varint`]: 7-bit continuation integers used by the wire envelope and
//!   the fragment header.
//! - [`crc16`]: seeded 16-bit checksum used to verify image transfers.

pub mod crc16;
pub mod varint;
