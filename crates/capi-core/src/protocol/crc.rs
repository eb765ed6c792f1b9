//! CRC16 checksum used by every command and reply.
//!
//! The device frames ASCII traffic with a 16-bit CRC over the polynomial
//! X^16 + X^15 + X^2 + 1, processed least-significant-bit first with a zero
//! initial value. The same checksum guards the binary reply header and
//! payload. The table below is the reflected form of that polynomial
//! (0xA001), built once at compile time.

/// Reflected polynomial for X^16 + X^15 + X^2 + 1.
const POLYNOMIAL: u16 = 0xA001;

const CRC_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Computes the CRC16 of `data` as the device does.
///
/// # Examples
///
/// ```
/// use capi_core::protocol::crc::crc16;
///
/// // Reset banner: the device answers a serial break with "RESET" + "BE6F".
/// assert_eq!(crc16(b"RESET"), 0xBE6F);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &byte in data {
        crc = CRC_TABLE[((crc ^ u16::from(byte)) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc
}
