//! Variable-length unsigned integers.
//!
//! ```text
//! 300 = 0b1_0010_1100
//!   byte 0: 1 0101100   (low 7 bits, continuation set)
//!   byte 1: 0 0000010   (next 7 bits, continuation clear)
//! ```
//!
//! Little-endian groups of seven bits; the MSB of each byte says another
//! byte follows. Decoding stops at the first byte with the MSB clear.

use crate::error::DecodeError;

/// Longest encoding of a `u64` (ceil(64 / 7)).
pub const MAX_VARINT_LEN: usize = 10;

const CONTINUATION: u8 = 0x80;
const PAYLOAD_MASK: u8 = 0x7F;

/// Number of bytes [`encode`] will produce for `value`.
pub fn encoded_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= u64::from(CONTINUATION) {
        value >>= 7;
        len += 1;
    }
    len
}

/// Append the varint encoding of `value` to `out`.
pub fn encode(mut value: u64, out: &mut Vec<u8>) {
    while value >= u64::from(CONTINUATION) {
        out.push((value as u8 & PAYLOAD_MASK) | CONTINUATION);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Decode one varint from the front of `input`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode(input: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut value: u64 = 0;
    for (i, &byte) in input.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(DecodeError::VarintOverflow);
        }
        let bits = u64::from(byte & PAYLOAD_MASK);
        let shift = 7 * i as u32;
        // Tenth byte may only contribute the single remaining bit.
        if i == MAX_VARINT_LEN - 1 && bits > 1 {
            return Err(DecodeError::VarintOverflow);
        }
        value |= bits << shift;
        if byte & CONTINUATION == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(DecodeError::Truncated)
}

/// Decode a varint that must fit in 32 bits.
pub fn decode_u32(input: &[u8]) -> Result<(u32, usize), DecodeError> {
    let (value, used) = decode(input)?;
    let value = u32::try_from(value).map_err(|_| DecodeError::VarintOverflow)?;
    Ok((value, used))
}
