//! Seeded 16-bit checksum (CCITT polynomial 0x1021, byte-wise form).
//!
//! Both sides of every comparison in the firmware-update flow run this exact
//! routine with seed 0, so only self-consistency matters. The shift/xor
//! sequence below is the table-free byte-at-a-time variant and must be kept
//! bit-for-bit.

/// Seed used for all image and transfer-progress checksums.
pub const IMAGE_SEED: u16 = 0;

/// Fold one byte into a running checksum.
#[inline]
pub fn update(crc: u16, byte: u8) -> u16 {
    let mut crc = crc.rotate_left(8);
    crc ^= u16::from(byte);
    crc ^= (crc & 0xFF) >> 4;
    crc ^= crc << 12;
    crc ^= (crc & 0xFF) << 5;
    crc
}

/// Checksum `data` starting from `seed`.
pub fn compute(data: &[u8], seed: u16) -> u16 {
    data.iter().fold(seed, |crc, &byte| update(crc, byte))
}

/// Incremental checksum over a stream of slices.
#[derive(Debug, Clone, Copy)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    pub fn new(seed: u16) -> Self {
        Self { value: seed }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.value = compute(data, self.value);
    }

    pub fn value(&self) -> u16 {
        self.value
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new(IMAGE_SEED)
    }
}
