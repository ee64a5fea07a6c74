//! # CRC-16/MODBUS Implementation
//!
//! CRC-16/MODBUS checksum calculation for the dTouch protocol.
//!
//! **Polynomial**: 0xA001 (reflected 0x8005)
//! **Initial Value**: 0xFFFF
//!
//! The checksum is transmitted low byte first.

/// CRC-16/MODBUS reflected polynomial
const CRC16_POLY: u16 = 0xA001;

/// Seed for a fresh CRC computation
pub const CRC16_INIT: u16 = 0xFFFF;

/// Precomputed CRC16 lookup table for fast calculation
const CRC16_TABLE: [u16; 256] = generate_crc16_table();

/// Generate CRC16 lookup table at compile time
const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Continue a CRC-16/MODBUS computation over another span of bytes
///
/// Lets a frame be checksummed piecewise (header, then length/command, then
/// payload) while it is being written.
///
/// # Arguments
///
/// * `data` - Next span of bytes
/// * `crc` - Running value so far ([`CRC16_INIT`] for a fresh computation)
///
/// # Examples
///
/// ```
/// use dtouch_link::dtouch::crc::{crc16_modbus, crc16_modbus_update, CRC16_INIT};
///
/// let partial = crc16_modbus_update(b"1234", CRC16_INIT);
/// assert_eq!(crc16_modbus_update(b"56789", partial), crc16_modbus(b"123456789"));
/// ```
pub fn crc16_modbus_update(data: &[u8], crc: u16) -> u16 {
    data.iter().fold(crc, |crc, &byte| {
        (crc >> 8) ^ CRC16_TABLE[((crc ^ byte as u16) & 0xFF) as usize]
    })
}

/// Calculate CRC-16/MODBUS checksum of a contiguous buffer
pub fn crc16_modbus(data: &[u8]) -> u16 {
    crc16_modbus_update(data, CRC16_INIT)
}

/// Split a frame into its computed and transmitted checksums
///
/// Returns `None` if the frame is too short to carry a checksum.
/// The frame is valid iff both values are equal.
pub fn frame_checksums(frame: &[u8]) -> Option<(u16, u16)> {
    if frame.len() < 2 {
        return None;
    }

    let (body, trailer) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);

    Some((crc16_modbus(body), received))
}

/// Calculate CRC-16/MODBUS using the bitwise algorithm (slow, for verification)
#[allow(dead_code)]
fn crc16_modbus_slow(data: &[u8], seed: u16) -> u16 {
    let mut crc = seed;

    for &byte in data {
        crc ^= byte as u16;

        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc >>= 1;
                crc ^= CRC16_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}
