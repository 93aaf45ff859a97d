//! Security engine: DH negotiation, key derivation and frame encryption.
//!
//! ```text
//! Uninitialized ──begin_negotiation──▶ NegotiationRequested
//!       ▲                                     │ compute_shared_secret
//!       │ reset                               ▼
//!       │                              KeysExchanged
//!       │                                     │ confirm(ack of SetSecurityMode)
//!       │                                     ▼
//!       └──────────────────────────────  Established
//!
//! any negotiating state ──fail──▶ Failed ──begin_negotiation──▶ …
//! ```
//!
//! The engine owns all key material. Private key, shared secret and
//! derived keys are zeroized when the context is dropped, reset or failed.

pub mod cipher;
pub mod dh;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub use cipher::FrameCipher;
pub use dh::{DhGroup, DhKeyPair};

use crate::error::SecurityError;
use crate::protocol::{FrameKind, FrameOptions, PayloadCipher};

/// Domain separation label for the checksum/fingerprint key.
pub(crate) const CHECKSUM_KEY_LABEL: &[u8] = b"blufi-checksum";

/// First byte of the negotiation length announcement.
pub const NEG_SET_LENGTH: u8 = 0x00;
/// First byte of the negotiation parameter message.
pub const NEG_SET_ALL_DATA: u8 = 0x01;

// ── State ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityState {
    Uninitialized,
    NegotiationRequested,
    KeysExchanged,
    Established,
    Failed,
}

// ── Security mode ────────────────────────────────────────────

/// Which frame families get a checksum and which get encrypted once
/// negotiation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityMode {
    pub data_checksum: bool,
    pub data_encrypt: bool,
    pub control_checksum: bool,
    pub control_encrypt: bool,
}

impl SecurityMode {
    const DATA_CHECKSUM: u8 = 0x01;
    const DATA_ENCRYPT: u8 = 0x02;
    const CONTROL_CHECKSUM: u8 = 0x10;
    const CONTROL_ENCRYPT: u8 = 0x20;

    pub fn to_byte(self) -> u8 {
        let mut b = 0;
        if self.data_checksum {
            b |= Self::DATA_CHECKSUM;
        }
        if self.data_encrypt {
            b |= Self::DATA_ENCRYPT;
        }
        if self.control_checksum {
            b |= Self::CONTROL_CHECKSUM;
        }
        if self.control_encrypt {
            b |= Self::CONTROL_ENCRYPT;
        }
        b
    }

    pub fn from_byte(b: u8) -> Self {
        Self {
            data_checksum: b & Self::DATA_CHECKSUM != 0,
            data_encrypt: b & Self::DATA_ENCRYPT != 0,
            control_checksum: b & Self::CONTROL_CHECKSUM != 0,
            control_encrypt: b & Self::CONTROL_ENCRYPT != 0,
        }
    }

    /// Framing options for `kind` under this mode.
    pub fn options_for(self, kind: FrameKind) -> FrameOptions {
        match kind {
            FrameKind::Control => FrameOptions {
                encrypt: self.control_encrypt,
                checksum: self.control_checksum,
                require_ack: false,
            },
            FrameKind::Data => FrameOptions {
                encrypt: self.data_encrypt,
                checksum: self.data_checksum,
                require_ack: false,
            },
        }
    }
}

impl Default for SecurityMode {
    /// Checksummed and encrypted data frames, plain control frames.
    fn default() -> Self {
        Self {
            data_checksum: true,
            data_encrypt: true,
            control_checksum: false,
            control_encrypt: false,
        }
    }
}

// ── Negotiation messages ─────────────────────────────────────

/// The two client messages that open a negotiation, both sent on
/// Data/Negotiate without encryption or checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationPayloads {
    /// `[0x00, len_hi, len_lo]`: length of `parameters` after its first byte.
    pub length_announcement: Vec<u8>,
    /// `[0x01, p_len, p, g_len, g, k_len, k]`, lengths big-endian.
    pub parameters: Vec<u8>,
}

// ── Engine ───────────────────────────────────────────────────

struct Keys {
    cipher: FrameCipher,
    checksum_key: Zeroizing<[u8; 32]>,
}

/// Owns one connection's security context.
pub struct SecurityEngine {
    group: DhGroup,
    mode: SecurityMode,
    state: SecurityState,
    key_pair: Option<DhKeyPair>,
    keys: Option<Keys>,
    confirm_sequence: Option<u8>,
}

impl SecurityEngine {
    pub fn new(group: DhGroup, mode: SecurityMode) -> Self {
        Self {
            group,
            mode,
            state: SecurityState::Uninitialized,
            key_pair: None,
            keys: None,
            confirm_sequence: None,
        }
    }

    pub fn state(&self) -> SecurityState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == SecurityState::Established
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    pub fn group(&self) -> &DhGroup {
        &self.group
    }

    /// Generate an ephemeral key pair and build the opening messages.
    pub fn begin_negotiation(&mut self) -> Result<NegotiationPayloads, SecurityError> {
        if !matches!(
            self.state,
            SecurityState::Uninitialized | SecurityState::Failed
        ) {
            warn!("security: begin_negotiation in state {:?}", self.state);
            return Err(SecurityError::NotNegotiating);
        }

        self.destroy_context();
        let key_pair = self.group.generate_key_pair();

        let p = self.group.prime_bytes();
        let g = self.group.generator_bytes();
        let k = key_pair.public_key();

        let mut parameters = Vec::with_capacity(1 + 6 + p.len() + g.len() + k.len());
        parameters.push(NEG_SET_ALL_DATA);
        for part in [p.as_slice(), g.as_slice(), k] {
            parameters.extend_from_slice(&(part.len() as u16).to_be_bytes());
            parameters.extend_from_slice(part);
        }

        let announced = (parameters.len() - 1) as u16;
        let length_announcement = vec![
            NEG_SET_LENGTH,
            (announced >> 8) as u8,
            announced as u8,
        ];

        self.key_pair = Some(key_pair);
        self.state = SecurityState::NegotiationRequested;
        info!("security: negotiation requested ({}-byte group)", p.len());

        Ok(NegotiationPayloads {
            length_announcement,
            parameters,
        })
    }

    /// Derive keys from the device's public value.
    ///
    /// Fails the negotiation on an invalid key.
    pub fn compute_shared_secret(&mut self, peer_public: &[u8]) -> Result<(), SecurityError> {
        if self.state != SecurityState::NegotiationRequested {
            return Err(SecurityError::NotNegotiating);
        }
        let Some(key_pair) = self.key_pair.as_ref() else {
            return Err(SecurityError::NotNegotiating);
        };

        let secret = match key_pair.compute_shared_secret(&self.group, peer_public) {
            Ok(secret) => secret,
            Err(e) => {
                self.fail(e);
                return Err(e);
            }
        };

        let cipher = FrameCipher::from_shared_secret(&secret);
        let checksum_key = Zeroizing::new(hmac_sha256::HMAC::mac(CHECKSUM_KEY_LABEL, &*secret));
        self.keys = Some(Keys {
            cipher,
            checksum_key,
        });
        // The private exponent is no longer needed.
        self.key_pair = None;
        self.state = SecurityState::KeysExchanged;
        info!("security: keys exchanged");
        Ok(())
    }

    /// Control/SetSecurityMode payload.
    pub fn security_mode_payload(&self) -> [u8; 1] {
        [self.mode.to_byte()]
    }

    /// Remember which sequence carried SetSecurityMode.
    pub fn expect_confirmation(&mut self, sequence: u8) {
        self.confirm_sequence = Some(sequence);
    }

    /// Complete negotiation on the device's ack of SetSecurityMode.
    pub fn confirm(&mut self, acked_sequence: u8) -> Result<(), SecurityError> {
        if self.state != SecurityState::KeysExchanged {
            return Err(SecurityError::NotNegotiating);
        }
        match self.confirm_sequence {
            Some(expected) if expected == acked_sequence => {
                self.confirm_sequence = None;
                self.state = SecurityState::Established;
                info!("security: established");
                Ok(())
            }
            Some(expected) => Err(SecurityError::AckMismatch {
                expected,
                got: acked_sequence,
            }),
            None => Err(SecurityError::NotNegotiating),
        }
    }

    /// Abort the negotiation and destroy the context.
    pub fn fail(&mut self, reason: SecurityError) {
        warn!("security: negotiation failed: {reason}");
        self.destroy_context();
        self.state = SecurityState::Failed;
    }

    /// Back to `Uninitialized`, context destroyed.
    pub fn reset(&mut self) {
        self.destroy_context();
        self.state = SecurityState::Uninitialized;
    }

    fn destroy_context(&mut self) {
        self.key_pair = None;
        self.keys = None;
        self.confirm_sequence = None;
    }

    /// First 8 bytes of the checksum key, for out-of-band comparison.
    pub fn fingerprint(&self) -> Option<[u8; 8]> {
        let keys = self.keys.as_ref()?;
        let mut out = [0u8; 8];
        out.copy_from_slice(&keys.checksum_key[..8]);
        Some(out)
    }

    /// Framing options for an outbound message of `kind`.
    ///
    /// Plain until established, then as configured by the security mode.
    pub fn frame_options(&self, kind: FrameKind) -> FrameOptions {
        if self.is_established() {
            self.mode.options_for(kind)
        } else {
            FrameOptions::PLAIN
        }
    }
}

impl PayloadCipher for SecurityEngine {
    fn encrypt(&self, sequence: u8, buf: &mut [u8]) -> bool {
        match &self.keys {
            Some(keys) => {
                keys.cipher.encrypt(sequence, buf);
                true
            }
            None => false,
        }
    }

    fn decrypt(&self, sequence: u8, buf: &mut [u8]) -> bool {
        match &self.keys {
            Some(keys) => {
                keys.cipher.decrypt(sequence, buf);
                true
            }
            None => false,
        }
    }
}

/// Parse the client's negotiation parameter message (device side).
///
/// Returns `(prime, generator, public_key)` slices.
pub fn parse_negotiation_parameters(msg: &[u8]) -> Result<(&[u8], &[u8], &[u8]), SecurityError> {
    let Some((&NEG_SET_ALL_DATA, mut rest)) = msg.split_first() else {
        return Err(SecurityError::InvalidGroup);
    };
    let p = take_field(&mut rest)?;
    let g = take_field(&mut rest)?;
    let k = take_field(&mut rest)?;
    Ok((p, g, k))
}

fn take_field<'a>(rest: &mut &'a [u8]) -> Result<&'a [u8], SecurityError> {
    if rest.len() < 2 {
        return Err(SecurityError::InvalidGroup);
    }
    let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
    if rest.len() < 2 + len {
        return Err(SecurityError::InvalidGroup);
    }
    let (field, tail) = rest[2..].split_at(len);
    *rest = tail;
    Ok(field)
}

// ── Tests ────────────────────────────────────────────────────
