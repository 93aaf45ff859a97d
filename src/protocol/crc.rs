//! CRC-16 frame checksum.
//!
//! Polynomial 0x1021, MSB first, running value inverted on entry and exit.
//! Chaining two `update` calls gives the same value as one call over the
//! concatenated input, which is how the device computes it: first over
//! `[sequence, data_len]`, then over the plaintext data.

const POLY: u16 = 0x1021;

/// Continue a checksum from `crc` over `bytes`.
pub fn update(crc: u16, bytes: &[u8]) -> u16 {
    let mut crc = !crc;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    !crc
}

/// Checksum over the header fields and plaintext data of one frame.
pub fn frame_checksum(sequence: u8, data_len: u8, data: &[u8]) -> u16 {
    update(update(0, &[sequence, data_len]), data)
}
