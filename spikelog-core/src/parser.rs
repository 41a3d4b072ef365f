#![allow(clippy::unusual_byte_groupings)]
//! Bit-level field extraction for the packed camera formats.
//!
//! The byte decoder hands out whole primitive fields; the functions here split
//! the packed ones into coordinates, polarity and timestamp bits.

// ============================================================================
// AEDAT 3.1 polarity event, data word (u32)
// Bits: [31:30] unused | [29:17] x | [16:15] unused | [14:2] y | [1] polarity | [0] valid
// ============================================================================

/// Extracts the validity bit from an AEDAT polarity data word.
#[inline]
pub fn aedat_is_valid(data: u32) -> bool {
    data & 0x1 != 0
}

/// Extracts the polarity bit from an AEDAT polarity data word.
#[inline]
pub fn aedat_get_polarity(data: u32) -> bool {
    (data >> 1) & 0x1 != 0
}

/// Extracts the 13-bit Y address from an AEDAT polarity data word.
#[inline]
pub fn aedat_get_y(data: u32) -> u16 {
    ((data >> 2) & 0x1FFF) as u16
}

/// Extracts the 13-bit X address from an AEDAT polarity data word.
#[inline]
pub fn aedat_get_x(data: u32) -> u16 {
    ((data >> 17) & 0x1FFF) as u16
}

/// Widens a 32-bit AEDAT timestamp with its segment's overflow counter.
#[inline]
pub fn aedat_timestamp(ts_overflow: u32, timestamp: u32) -> i64 {
    ((ts_overflow as i64) << 31) | timestamp as i64
}

// ============================================================================
// N-MNIST record, byte 2 and bytes 3-4 (big-endian u16)
// Bits: byte2 [7] polarity | [6:0] timestamp bits 22:16
// ============================================================================

/// Extracts the polarity bit from the N-MNIST high timestamp byte.
#[inline]
pub fn nmnist_get_polarity(high: u8) -> bool {
    high & 0x80 != 0
}

/// Assembles the 23-bit N-MNIST timestamp.
#[inline]
pub fn nmnist_timestamp(high: u8, low: u16) -> i64 {
    (((high & 0x7F) as i64) << 16) | low as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aedat_data_word() {
        // x=100, y=50, polarity=1, valid=1
        let data: u32 = (100 << 17) | (50 << 2) | 0b1_1;
        assert!(aedat_is_valid(data));
        assert!(aedat_get_polarity(data));
        assert_eq!(aedat_get_x(data), 100);
        assert_eq!(aedat_get_y(data), 50);

        let invalid: u32 = (3 << 17) | (4 << 2) | 0b1_0;
        assert!(!aedat_is_valid(invalid));
        assert!(aedat_get_polarity(invalid));
    }

    #[test]
    fn test_aedat_address_masks() {
        let data: u32 = 0xFFFF_FFFF;
        assert_eq!(aedat_get_x(data), 0x1FFF);
        assert_eq!(aedat_get_y(data), 0x1FFF);
    }

    #[test]
    fn test_aedat_timestamp_overflow() {
        assert_eq!(aedat_timestamp(0, 1234), 1234);
        assert_eq!(aedat_timestamp(1, 5), (1i64 << 31) + 5);
    }

    #[test]
    fn test_nmnist_bits() {
        // polarity=1, high bits = 0b0000011
        let high: u8 = 0b1_0000011;
        assert!(nmnist_get_polarity(high));
        assert_eq!(nmnist_timestamp(high, 0x0102), (3 << 16) | 0x0102);
        assert!(!nmnist_get_polarity(0x7F));
    }
}
