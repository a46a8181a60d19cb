//! Incremental CRC-16 used for every frame on the bus.
//!
//! This is the reflected CCITT polynomial (0x8408, i.e. 0x1021 bit-reversed)
//! with a 0xFFFF start value and no final XOR. The register is fed one byte at
//! a time as the frame is sent or parsed, and transmitted high byte first.

const POLY: u16 = 0x8408;
const INIT: u16 = 0xFFFF;

/// Running CRC register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Crc16(u16);

impl Crc16 {
    pub const fn new() -> Self {
        Self(INIT)
    }

    /// Fold one byte into the register.
    pub fn update(&mut self, byte: u8) {
        let mut crc = self.0 ^ u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 0x0001 != 0 {
                (crc >> 1) ^ POLY
            } else {
                crc >> 1
            };
        }
        self.0 = crc;
    }

    pub fn update_slice(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.update(*byte);
        }
    }

    pub fn reset(&mut self) {
        self.0 = INIT;
    }

    pub const fn value(self) -> u16 {
        self.0
    }

    /// The two check bytes in wire order.
    pub const fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub const fn high(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn low(self) -> u8 {
        self.0 as u8
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC of a complete byte slice.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update_slice(bytes);
    crc.value()
}
