//! BluFi wire protocol: frame layout, fragmentation and checksum.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Frame Codec                             │
//! │                                                              │
//! │  payload ──▶ FrameEncoder ──▶ [frame]…[frame] ──▶ Transport  │
//! │              (split, crc,                                    │
//! │               encrypt)                                       │
//! │                                                              │
//! │  Transport ──▶ FrameDecoder ──▶ Reassembler ──▶ Frame        │
//! │  (notify)      (seq, decrypt,   (fragment                    │
//! │                 crc)             groups)                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! One frame on the wire:
//!
//! ```text
//! ┌──────┬────┬─────┬─────┬──────────────────────┬──────────────┐
//! │ Type │ FC │ Seq │ Len │ Data (Len bytes)     │ CRC16 (opt.) │
//! │  1B  │ 1B │ 1B  │ 1B  │ [total_len 2B LE]... │ 2B LE        │
//! └──────┴────┴─────┴─────┴──────────────────────┴──────────────┘
//! ```
//!
//! Type byte: bits 0-1 frame kind, bits 2-7 subtype.

pub mod crc;
pub mod fragment;
pub mod frame;

pub use frame::{Decoded, Frame, FrameControl, FrameDecoder, FrameEncoder, FrameOptions};

/// Fixed frame header: type, frame control, sequence, data length.
pub const HEADER_LEN: usize = 4;

/// Trailing checksum length when the checksum flag is set.
pub const CHECKSUM_LEN: usize = 2;

/// Remaining-total-length prefix carried by every non-final fragment.
pub const FRAG_LEN_PREFIX: usize = 2;

/// The data length field is a single byte.
pub const MAX_DATA_LEN: usize = 255;

/// Default bytes per GATT write (ATT MTU 23 minus 3 bytes of ATT header).
pub const DEFAULT_PACKAGE_LENGTH: usize = 20;

/// Smallest usable package: header, fragment prefix, checksum, one data byte.
pub const MIN_PACKAGE_LENGTH: usize = HEADER_LEN + FRAG_LEN_PREFIX + CHECKSUM_LEN + 1;

/// Largest package that still fits the 1-byte length field.
pub const MAX_PACKAGE_LENGTH: usize = HEADER_LEN + MAX_DATA_LEN + CHECKSUM_LEN;

// ── Frame kind ───────────────────────────────────────────────

/// The two BluFi frame families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Control = 0,
    Data = 1,
}

impl FrameKind {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0b11 {
            0 => Some(Self::Control),
            1 => Some(Self::Data),
            _ => None,
        }
    }
}

/// Build the type byte from kind and 6-bit subtype.
pub const fn type_byte(kind: FrameKind, subtype: u8) -> u8 {
    (subtype << 2) | kind as u8
}

/// Which side of the link produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client (phone) to device.
    Outbound,
    /// Device to client.
    Inbound,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Self::Outbound => Self::Inbound,
            Self::Inbound => Self::Outbound,
        }
    }
}

// ── Subtypes ─────────────────────────────────────────────────

/// Control frame subtypes.
pub mod ctrl {
    pub const ACK: u8 = 0x00;
    pub const SET_SEC_MODE: u8 = 0x01;
    pub const SET_OP_MODE: u8 = 0x02;
    pub const CONNECT_WIFI: u8 = 0x03;
    pub const DISCONNECT_WIFI: u8 = 0x04;
    pub const GET_WIFI_STATUS: u8 = 0x05;
    pub const DEAUTHENTICATE: u8 = 0x06;
    pub const GET_VERSION: u8 = 0x07;
    pub const CLOSE_CONNECTION: u8 = 0x08;
    pub const GET_WIFI_LIST: u8 = 0x09;
}

/// Data frame subtypes.
pub mod data {
    pub const NEGOTIATE: u8 = 0x00;
    pub const STA_BSSID: u8 = 0x01;
    pub const STA_SSID: u8 = 0x02;
    pub const STA_PASSWORD: u8 = 0x03;
    pub const SOFTAP_SSID: u8 = 0x04;
    pub const SOFTAP_PASSWORD: u8 = 0x05;
    pub const SOFTAP_MAX_CONNECTIONS: u8 = 0x06;
    pub const SOFTAP_AUTH_MODE: u8 = 0x07;
    pub const SOFTAP_CHANNEL: u8 = 0x08;
    pub const USERNAME: u8 = 0x09;
    pub const CA_CERTIFICATION: u8 = 0x0a;
    pub const CLIENT_CERTIFICATION: u8 = 0x0b;
    pub const SERVER_CERTIFICATION: u8 = 0x0c;
    pub const CLIENT_PRIVATE_KEY: u8 = 0x0d;
    pub const SERVER_PRIVATE_KEY: u8 = 0x0e;
    pub const WIFI_CONNECTION_STATE: u8 = 0x0f;
    pub const VERSION: u8 = 0x10;
    pub const WIFI_LIST: u8 = 0x11;
    pub const ERROR: u8 = 0x12;
    pub const CUSTOM_DATA: u8 = 0x13;
    pub const STA_MAX_CONN_RETRY: u8 = 0x14;
    pub const STA_CONN_END_REASON: u8 = 0x15;
    pub const STA_CONN_RSSI: u8 = 0x16;
}

/// Payload cipher hook used by the codec.
///
/// Implemented by the security engine; the codec never sees keys.
pub trait PayloadCipher {
    /// Encrypt `buf` in place with the keystream for `sequence`.
    fn encrypt(&self, sequence: u8, buf: &mut [u8]) -> bool;

    /// Decrypt `buf` in place with the keystream for `sequence`.
    fn decrypt(&self, sequence: u8, buf: &mut [u8]) -> bool;
}

/// A cipher that has no key; every operation fails.
pub struct NoCipher;

impl PayloadCipher for NoCipher {
    fn encrypt(&self, _sequence: u8, _buf: &mut [u8]) -> bool {
        false
    }

    fn decrypt(&self, _sequence: u8, _buf: &mut [u8]) -> bool {
        false
    }
}
