//! MTU fragmentation and reassembly for one logical byte stream.
//!
//! ```text
//! first:  ┌────────┬──────────────────┬──────────────────────┐
//!         │ header │ varint total len │ payload part 1       │
//!         └────────┴──────────────────┴──────────────────────┘
//! others: ┌────────┬─────────────────────────────────────────┐
//!         │ header │ payload part N                          │
//!         └────────┴─────────────────────────────────────────┘
//!
//! header: bit 7 = first fragment, bit 6 = last fragment,
//!         bits 0-5 = fragment index within the packet (mod 64)
//! ```
//!
//! Each characteristic stream (response, notification) owns its own
//! [`Fragmenter`]; partial buffers are never shared.

use log::{debug, warn};

use crate::codec::varint;

/// Fragment flag: first fragment of a packet.
pub const FRAG_FIRST: u8 = 0x80;
/// Fragment flag: last fragment of a packet.
pub const FRAG_LAST: u8 = 0x40;
const INDEX_MASK: u8 = 0x3F;
const FRAG_HEADER_SIZE: usize = 1;

/// Smallest usable MTU: header plus the longest length prefix plus one byte.
pub const MIN_MTU: usize = FRAG_HEADER_SIZE + 5 + 1;
/// Largest ATT payload with data length extension.
pub const MAX_MTU: usize = 244;

/// One outbound chunk, ready for a characteristic write.
pub type Fragment = heapless::Vec<u8, MAX_MTU>;

/// Per-stream fragmenter and reassembler.
pub struct Fragmenter {
    mtu: usize,
    buffer: Vec<u8>,
    expected_len: usize,
    next_index: u8,
    active: bool,
}

impl Fragmenter {
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu: mtu.clamp(MIN_MTU, MAX_MTU),
            buffer: Vec::new(),
            expected_len: 0,
            next_index: 0,
            active: false,
        }
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Split `packet` into chunks of at most `mtu` bytes.
    ///
    /// A zero-length packet still yields exactly one chunk.
    pub fn fragments(&self, packet: &[u8]) -> Vec<Fragment> {
        let mut out = Vec::new();
        let mut prefix = Vec::with_capacity(varint::MAX_VARINT_LEN);
        varint::encode(packet.len() as u64, &mut prefix);

        let first_room = self.mtu - FRAG_HEADER_SIZE - prefix.len();
        let rest_room = self.mtu - FRAG_HEADER_SIZE;

        let split = first_room.min(packet.len());
        let (head, mut tail) = packet.split_at(split);

        let mut index: u8 = 0;
        let mut header = FRAG_FIRST;
        if tail.is_empty() {
            header |= FRAG_LAST;
        }
        out.push(Self::build(header, &prefix, head));

        while !tail.is_empty() {
            index = index.wrapping_add(1);
            let take = rest_room.min(tail.len());
            let (part, remainder) = tail.split_at(take);
            tail = remainder;
            let mut header = index & INDEX_MASK;
            if tail.is_empty() {
                header |= FRAG_LAST;
            }
            out.push(Self::build(header, &[], part));
        }
        out
    }

    fn build(header: u8, prefix: &[u8], part: &[u8]) -> Fragment {
        let mut frag = Fragment::new();
        // Capacity is guaranteed by the mtu clamp in `new`.
        let _ = frag.push(header);
        let _ = frag.extend_from_slice(prefix);
        let _ = frag.extend_from_slice(part);
        frag
    }

    /// Feed one received chunk, in arrival order.
    ///
    /// Returns `Some(packet)` exactly once, when the last fragment of a
    /// complete, gap-free sequence arrives.
    pub fn packet(&mut self, fragment: &[u8]) -> Option<Vec<u8>> {
        let (&header, body) = fragment.split_first()?;
        let index = header & INDEX_MASK;

        let body = if header & FRAG_FIRST != 0 {
            if self.active {
                debug!("fragment: new packet started, dropping {} partial bytes", self.buffer.len());
            }
            self.reset();
            let Ok((len, used)) = varint::decode(body) else {
                warn!("fragment: bad length prefix");
                return None;
            };
            self.expected_len = len as usize;
            self.active = true;
            self.next_index = 0;
            &body[used..]
        } else {
            if !self.active {
                debug!("fragment: continuation {} without a first fragment", index);
                return None;
            }
            body
        };

        if index != self.next_index & INDEX_MASK {
            warn!(
                "fragment: expected index {}, got {}; dropping packet",
                self.next_index & INDEX_MASK,
                index
            );
            self.reset();
            return None;
        }

        if self.buffer.len() + body.len() > self.expected_len {
            warn!("fragment: packet overruns declared length {}", self.expected_len);
            self.reset();
            return None;
        }

        self.buffer.extend_from_slice(body);
        self.next_index = self.next_index.wrapping_add(1);

        if header & FRAG_LAST == 0 {
            return None;
        }

        let complete = core::mem::take(&mut self.buffer);
        let expected = self.expected_len;
        self.reset();
        if complete.len() != expected {
            warn!("fragment: packet ended at {} of {} bytes", complete.len(), expected);
            return None;
        }
        Some(complete)
    }

    /// Discard any partial packet (e.g. after a reconnect).
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_len = 0;
        self.next_index = 0;
        self.active = false;
    }

    /// Whether a packet is partially assembled.
    pub fn is_active(&self) -> bool {
        self.active
    }
}

// ── Tests ────────────────────────────────────────────────────
