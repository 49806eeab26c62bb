//! Integrity: 16-bit frame checksum. Trust boundary between the line and the router.

use crc::{Crc, CRC_16_IBM_3740};

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no final xor.
const CCITT_FALSE: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Pure 16-bit checksum over a byte region. Sender and receiver must agree bit-for-bit.
pub trait Checksum {
    fn checksum16(&self, bytes: &[u8]) -> u16;
}

/// Default bus checksum.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc16;

impl Checksum for Crc16 {
    fn checksum16(&self, bytes: &[u8]) -> u16 {
        CCITT_FALSE.checksum(bytes)
    }
}

impl<F: Fn(&[u8]) -> u16> Checksum for F {
    fn checksum16(&self, bytes: &[u8]) -> u16 {
        self(bytes)
    }
}

/// Verify `covered` against a little-endian trailer.
pub fn verify<C: Checksum + ?Sized>(checksum: &C, covered: &[u8], trailer: [u8; 2]) -> bool {
    checksum.checksum16(covered) == u16::from_le_bytes(trailer)
}
