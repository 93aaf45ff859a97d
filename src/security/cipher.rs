//! AES-128-CFB128 frame cipher.
//!
//! Key is `MD5(shared_secret)` over the minimal big-endian encoding of the
//! secret, without leading zero bytes. Every frame is encrypted on its own with a
//! fresh IV whose first byte is the frame sequence and the rest zero, so
//! each sequence number must only ever be used once per key.

use aes::Aes128;
use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use md5::{Digest, Md5};
use zeroize::{Zeroize, ZeroizeOnDrop};

type Encryptor = cfb_mode::Encryptor<Aes128>;
type Decryptor = cfb_mode::Decryptor<Aes128>;

pub const KEY_LEN: usize = 16;

#[derive(Zeroize, ZeroizeOnDrop)]
pub struct FrameCipher {
    key: [u8; KEY_LEN],
}

impl FrameCipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Derive the frame key from a DH shared secret.
    pub fn from_shared_secret(secret: &[u8]) -> Self {
        let start = secret.iter().position(|&b| b != 0).unwrap_or(secret.len());
        Self::new(Md5::digest(&secret[start..]).into())
    }

    fn iv(sequence: u8) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[0] = sequence;
        iv
    }

    pub fn encrypt(&self, sequence: u8, buf: &mut [u8]) {
        Encryptor::new(&self.key.into(), &Self::iv(sequence).into()).encrypt(buf);
    }

    pub fn decrypt(&self, sequence: u8, buf: &mut [u8]) {
        Decryptor::new(&self.key.into(), &Self::iv(sequence).into()).decrypt(buf);
    }
}

impl core::fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("FrameCipher(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_key_derivation() {
        // MD5("") = d41d8cd98f00b204e9800998ecf8427e
        let c = FrameCipher::from_shared_secret(&[]);
        assert_eq!(
            c.key,
            [
                0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec, 0xf8,
                0x42, 0x7e
            ]
        );
    }

    #[test]
    fn leading_zero_bytes_are_not_hashed() {
        // MD5("abc") = 900150983cd24fb0d6963f7d28e17f72
        let expected = [
            0x90, 0x01, 0x50, 0x98, 0x3c, 0xd2, 0x4f, 0xb0, 0xd6, 0x96, 0x3f, 0x7d, 0x28, 0xe1,
            0x7f, 0x72,
        ];
        assert_eq!(FrameCipher::from_shared_secret(b"abc").key, expected);
        assert_eq!(FrameCipher::from_shared_secret(b"\0\0abc").key, expected);
    }

    #[test]
    fn round_trip_any_length() {
        let c = FrameCipher::new([0x11; 16]);
        for len in [0, 1, 15, 16, 17, 100] {
            let plain: Vec<u8> = (0..len as u8).collect();
            let mut buf = plain.clone();
            c.encrypt(9, &mut buf);
            if len > 0 {
                assert_ne!(buf, plain);
            }
            c.decrypt(9, &mut buf);
            assert_eq!(buf, plain);
        }
    }

    #[test]
    fn sequence_changes_keystream() {
        let c = FrameCipher::new([0x22; 16]);
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        c.encrypt(0, &mut a);
        c.encrypt(1, &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_sequence_does_not_decrypt() {
        let c = FrameCipher::new([0x33; 16]);
        let mut buf = *b"lab-net password";
        c.encrypt(4, &mut buf);
        c.decrypt(5, &mut buf);
        assert_ne!(&buf, b"lab-net password");
    }

    #[test]
    fn fips197_first_block_matches_ecb() {
        // With a zero IV, the first CFB block is plaintext XOR AES_k(0).
        // AES-128 with key 000102..0f on input 0 starts with c6 a1 3b 37.
        let key: [u8; 16] = core::array::from_fn(|i| i as u8);
        let c = FrameCipher::new(key);
        let mut buf = [0u8; 4];
        c.encrypt(0, &mut buf);
        assert_eq!(buf, [0xc6, 0xa1, 0x3b, 0x37]);
    }
}
