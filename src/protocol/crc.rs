//! # CRC-16 Implementation
//!
//! Reflected CRC-16 checksum used by the SEM710 protocol.
//!
//! **Polynomial**: 0xA001 (0x8005 reflected, processed LSB first)
//! **Initial Value**: 0xFFFF
//! **Coverage**: Command + Length + Payload (never the start or end marker)

use std::ops::{Bound, RangeBounds};

/// Reflected CRC-16 polynomial
pub const CRC16_POLY: u16 = 0xA001;

/// CRC accumulator initial value
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

/// Incremental CRC-16 accumulator
///
/// Lets the decoder checksum a frame from its separately recorded parts
/// without first copying them into one contiguous buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    pub fn new() -> Self {
        Self { value: CRC16_INIT }
    }

    /// Fold more bytes into the checksum
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        for &byte in data {
            let index = ((self.value ^ byte as u16) & 0x00FF) as usize;
            self.value = (self.value >> 8) ^ CRC16_TABLE[index];
        }
        self
    }

    pub fn finish(&self) -> u16 {
        self.value
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// Calculate the CRC-16 of a whole slice using the lookup table
///
/// # Examples
///
/// ```
/// use tempmon::protocol::crc::crc16;
///
/// assert_eq!(crc16(b"123456789"), 0x4B37);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    Crc16::new().update(data).finish()
}

/// Calculate the CRC-16 over a sub-range of `bytes`
///
/// The range follows normal Rust range syntax, so the inclusive
/// `[start_index, end_index]` form is written `start..=end`. An empty range
/// returns [`CRC16_INIT`] unchanged.
///
/// # Arguments
///
/// * `bytes` - Buffer holding the frame
/// * `range` - Indices to checksum (e.g. `1..=3` skips the start marker)
///
/// # Panics
///
/// Panics if `range` lies outside `bytes`, like slice indexing does.
///
/// # Examples
///
/// ```
/// use tempmon::protocol::crc::compute_crc;
///
/// let request = [0x55, 0x02, 0x00, 0x00];
/// assert_eq!(compute_crc(&request, 1..=3), 0x00D0);
/// assert_eq!(compute_crc(&request, 0..0), 0xFFFF);
/// ```
pub fn compute_crc<R: RangeBounds<usize>>(bytes: &[u8], range: R) -> u16 {
    let bounds: (Bound<usize>, Bound<usize>) =
        (range.start_bound().cloned(), range.end_bound().cloned());
    crc16(&bytes[bounds])
}

/// Calculate CRC-16 bit by bit (slow, for verification)
///
/// Mirrors the instrument documentation step for step and is used to check
/// the lookup table.
#[allow(dead_code)]
fn crc16_bitwise(data: &[u8]) -> u16 {
    let mut crc: u16 = CRC16_INIT;

    for &byte in data {
        crc ^= byte as u16;

        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_empty_is_initial_value() {
        assert_eq!(crc16(&[]), CRC16_INIT);
        assert_eq!(compute_crc(&[0x55, 0x02], 0..0), 0xFFFF);
        assert_eq!(compute_crc(&[0x55, 0x02], 1..1), 0xFFFF);
    }

    #[test]
    fn test_crc16_check_value() {
        // Standard check string for the reflected 0xA001 / 0xFFFF variant
        assert_eq!(crc16(b"123456789"), 0x4B37);
        assert_eq!(crc16_bitwise(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_crc16_reference_frame() {
        // Well-known reference message, CRC transmitted as C5 CD
        let data = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        let crc = crc16(&data);
        assert_eq!(crc, 0xCDC5);
        assert_eq!(crc.to_le_bytes(), [0xC5, 0xCD]);
    }

    #[test]
    fn test_crc16_read_process_request() {
        // Command + two-byte length of the read-process request
        assert_eq!(crc16(&[0x02, 0x00, 0x00]), 0x00D0);
    }

    #[test]
    fn test_compute_crc_inclusive_range_skips_markers() {
        let frame = [0x55, 0x02, 0x00, 0x00, 0xD0, 0x00, 0xAA];
        assert_eq!(compute_crc(&frame, 1..=3), 0x00D0);
        assert_eq!(compute_crc(&frame, 1..4), compute_crc(&frame, 1..=3));
    }

    #[test]
    #[should_panic]
    fn test_compute_crc_out_of_range_panics() {
        compute_crc(&[0x01, 0x02], 1..=5);
    }

    #[test]
    fn test_crc16_lookup_table_matches_bitwise() {
        let test_data = [
            vec![0x01, 0x02, 0x03],
            vec![0xFF, 0xFE, 0xFD],
            vec![0x02, 0x05, 0x00, 0x00, 0x00, 0xAC, 0x41, 0x00],
            vec![0x00; 24],
            vec![0xFF; 10],
            (0..=255u8).collect::<Vec<_>>(),
        ];

        for data in test_data.iter() {
            assert_eq!(
                crc16(data),
                crc16_bitwise(data),
                "CRC mismatch for data: {:02X?}",
                data
            );
        }
    }

    #[test]
    fn test_crc16_is_deterministic() {
        let data: Vec<u8> = (0..64u8).map(|b| b.wrapping_mul(37)).collect();
        assert_eq!(crc16(&data), crc16(&data));
        assert_eq!(compute_crc(&data, 3..=40), compute_crc(&data, 3..=40));
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data = [0x02, 0x05, 0x00, 0x00, 0x00, 0xAC, 0x41, 0x00];
        let mut crc = Crc16::new();
        crc.update(&data[..1]).update(&data[1..3]).update(&data[3..]);
        assert_eq!(crc.finish(), crc16(&data));
        assert_eq!(crc.finish(), 0xA364);
    }

    #[test]
    fn test_crc16_changes_with_data() {
        let crc1 = crc16(&[0x02, 0x00, 0x00]);
        let crc2 = crc16(&[0x02, 0x00, 0x01]);
        assert_ne!(crc1, crc2, "CRC should change when data changes");
    }
}
