//! Frame encoder and streaming decoder.
//!
//! The encoder owns the outbound sequence counter and the decoder owns the
//! inbound one; both restart at 0 on a new connection. Per outbound frame
//! the checksum is taken over the plaintext, then the data (fragment
//! prefix included) is encrypted. The decoder undoes this in reverse:
//! decrypt, verify, reassemble.

extern crate alloc;
use alloc::vec::Vec;

use log::{debug, warn};

use super::fragment::{self, Reassembler};
use super::{
    CHECKSUM_LEN, Direction, FrameKind, HEADER_LEN, MAX_DATA_LEN,
    MAX_PACKAGE_LENGTH, MIN_PACKAGE_LENGTH, PayloadCipher, crc, type_byte,
};
use crate::error::{CodecError, Error, MalformedReason, SecurityError};

// ── Frame control ────────────────────────────────────────────

/// Frame-control bitfield (byte 1 of every frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameControl(pub u8);

impl FrameControl {
    pub const ENCRYPTED: u8 = 0x01;
    pub const CHECKSUM: u8 = 0x02;
    pub const DIRECTION: u8 = 0x04;
    pub const REQUIRE_ACK: u8 = 0x08;
    pub const FRAGMENT: u8 = 0x10;

    pub fn new(
        options: FrameOptions,
        direction: Direction,
        has_fragment: bool,
    ) -> Self {
        let mut bits = 0;
        if options.encrypt {
            bits |= Self::ENCRYPTED;
        }
        if options.checksum {
            bits |= Self::CHECKSUM;
        }
        if direction == Direction::Inbound {
            bits |= Self::DIRECTION;
        }
        if options.require_ack {
            bits |= Self::REQUIRE_ACK;
        }
        if has_fragment {
            bits |= Self::FRAGMENT;
        }
        Self(bits)
    }

    pub fn is_encrypted(self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }

    pub fn has_checksum(self) -> bool {
        self.0 & Self::CHECKSUM != 0
    }

    pub fn direction(self) -> Direction {
        if self.0 & Self::DIRECTION != 0 {
            Direction::Inbound
        } else {
            Direction::Outbound
        }
    }

    pub fn requires_ack(self) -> bool {
        self.0 & Self::REQUIRE_ACK != 0
    }

    pub fn has_fragment(self) -> bool {
        self.0 & Self::FRAGMENT != 0
    }
}

/// Per-message framing options chosen by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameOptions {
    pub encrypt: bool,
    pub checksum: bool,
    /// Set on the final frame of the message only.
    pub require_ack: bool,
}

impl FrameOptions {
    pub const PLAIN: Self = Self {
        encrypt: false,
        checksum: false,
        require_ack: false,
    };

    pub fn with_ack(mut self, require_ack: bool) -> Self {
        self.require_ack = require_ack;
        self
    }
}

// ── Decoded frame ────────────────────────────────────────────

/// A complete logical message, reassembled if it was fragmented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub subtype: u8,
    /// Control bits of the final frame of the message.
    pub control: FrameControl,
    /// Sequence of the final frame of the message.
    pub sequence: u8,
    pub payload: Vec<u8>,
    /// Checksum carried by the final frame, if any.
    pub checksum: Option<u16>,
}

/// Result of feeding one notification into the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    /// A fragment was accepted; more are expected.
    Incomplete,
}

// ── Encoder ──────────────────────────────────────────────────

/// Splits messages into wire frames and numbers them.
pub struct FrameEncoder {
    direction: Direction,
    next_sequence: u8,
    last_sequence: Option<u8>,
    package_limit: usize,
}

impl FrameEncoder {
    pub fn new(direction: Direction, package_limit: usize) -> Self {
        Self {
            direction,
            next_sequence: 0,
            last_sequence: None,
            package_limit: clamp_package_limit(package_limit),
        }
    }

    pub fn set_package_limit(&mut self, limit: usize) {
        self.package_limit = clamp_package_limit(limit);
    }

    pub fn package_limit(&self) -> usize {
        self.package_limit
    }

    /// Sequence the next frame will carry.
    pub fn next_sequence(&self) -> u8 {
        self.next_sequence
    }

    /// Sequence of the most recently encoded frame.
    pub fn last_sequence(&self) -> Option<u8> {
        self.last_sequence
    }

    /// Encode one logical message into one or more frames.
    pub fn encode<C: PayloadCipher + ?Sized>(
        &mut self,
        kind: FrameKind,
        subtype: u8,
        options: FrameOptions,
        payload: &[u8],
        cipher: &C,
    ) -> Result<Vec<Vec<u8>>, Error> {
        if payload.len() > u16::MAX as usize {
            return Err(CodecError::MalformedFrame(MalformedReason::Oversized).into());
        }

        let checksum_len = if options.checksum { CHECKSUM_LEN } else { 0 };
        let max_data = (self.package_limit - HEADER_LEN - checksum_len).min(MAX_DATA_LEN);
        let chunks = fragment::split(payload, max_data);
        let ty = type_byte(kind, subtype);

        let start = self.next_sequence;
        let mut frames = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let is_last = i + 1 == chunks.len();
            let frame_options = options.with_ack(options.require_ack && is_last);
            let control = FrameControl::new(frame_options, self.direction, chunk.remaining.is_some());
            let sequence = self.next_sequence;

            let mut data = chunk.to_data();
            let data_len = data.len() as u8;
            let checksum = options
                .checksum
                .then(|| crc::frame_checksum(sequence, data_len, &data));

            if options.encrypt && !cipher.encrypt(sequence, &mut data) {
                self.next_sequence = start;
                return Err(SecurityError::KeyUnavailable.into());
            }

            let mut frame = Vec::with_capacity(HEADER_LEN + data.len() + checksum_len);
            frame.extend_from_slice(&[ty, control.0, sequence, data_len]);
            frame.extend_from_slice(&data);
            if let Some(sum) = checksum {
                frame.extend_from_slice(&sum.to_le_bytes());
            }
            frames.push(frame);

            self.last_sequence = Some(sequence);
            self.next_sequence = sequence.wrapping_add(1);
        }

        debug!(
            "encoded type {:#04x} into {} frame(s), seq {}..={}",
            ty,
            frames.len(),
            start,
            self.next_sequence.wrapping_sub(1)
        );
        Ok(frames)
    }

    /// Restart numbering at 0 (new connection).
    pub fn reset(&mut self) {
        self.next_sequence = 0;
        self.last_sequence = None;
    }
}

/// Clamp a package length limit into the range the wire format supports.
pub fn clamp_package_limit(limit: usize) -> usize {
    limit.clamp(MIN_PACKAGE_LENGTH, MAX_PACKAGE_LENGTH)
}

// ── Decoder ──────────────────────────────────────────────────

/// Validates inbound frames and reassembles fragment groups.
pub struct FrameDecoder {
    expected_direction: Direction,
    next_sequence: u8,
    reassembler: Reassembler,
}

impl FrameDecoder {
    /// `expected_direction` is the direction bit the peer writes.
    pub fn new(expected_direction: Direction) -> Self {
        Self {
            expected_direction,
            next_sequence: 0,
            reassembler: Reassembler::new(),
        }
    }

    /// Sequence the next inbound frame must carry.
    pub fn expected_sequence(&self) -> u8 {
        self.next_sequence
    }

    /// Whether a fragment group is partially received.
    pub fn in_fragment_group(&self) -> bool {
        self.reassembler.is_active()
    }

    /// Feed one notification (exactly one frame).
    pub fn feed<C: PayloadCipher + ?Sized>(
        &mut self,
        chunk: &[u8],
        cipher: &C,
    ) -> Result<Decoded, CodecError> {
        let result = self.feed_inner(chunk, cipher);
        if let Err(e) = &result {
            if self.reassembler.is_active() {
                warn!("discarding partial fragment group: {e}");
            }
            self.reassembler.reset();
        }
        result
    }

    fn feed_inner<C: PayloadCipher + ?Sized>(
        &mut self,
        chunk: &[u8],
        cipher: &C,
    ) -> Result<Decoded, CodecError> {
        let malformed = CodecError::MalformedFrame;

        if chunk.len() < HEADER_LEN {
            return Err(malformed(MalformedReason::Truncated));
        }
        let kind = FrameKind::from_bits(chunk[0])
            .ok_or(malformed(MalformedReason::UnexpectedType))?;
        let subtype = chunk[0] >> 2;
        let control = FrameControl(chunk[1]);
        let sequence = chunk[2];
        let data_len = chunk[3] as usize;

        let checksum_len = if control.has_checksum() { CHECKSUM_LEN } else { 0 };
        let expected_len = HEADER_LEN + data_len + checksum_len;
        if chunk.len() < expected_len {
            return Err(malformed(MalformedReason::Truncated));
        }
        if chunk.len() > expected_len {
            return Err(malformed(MalformedReason::LengthMismatch));
        }

        if control.direction() != self.expected_direction {
            return Err(malformed(MalformedReason::Direction));
        }

        if sequence != self.next_sequence {
            let expected = self.next_sequence;
            self.next_sequence = sequence.wrapping_add(1);
            return Err(CodecError::SequenceGap {
                expected,
                got: sequence,
            });
        }
        self.next_sequence = sequence.wrapping_add(1);

        let mut data = chunk[HEADER_LEN..HEADER_LEN + data_len].to_vec();
        if control.is_encrypted() && !cipher.decrypt(sequence, &mut data) {
            return Err(malformed(MalformedReason::Undecryptable));
        }

        let checksum = if control.has_checksum() {
            let at = HEADER_LEN + data_len;
            let carried = u16::from_le_bytes([chunk[at], chunk[at + 1]]);
            let actual = crc::frame_checksum(sequence, data_len as u8, &data);
            if carried != actual {
                return Err(malformed(MalformedReason::ChecksumMismatch {
                    expected: carried,
                    actual,
                }));
            }
            Some(carried)
        } else {
            None
        };

        match self
            .reassembler
            .push(kind, subtype, control.has_fragment(), &data)
            .map_err(malformed)?
        {
            Some(payload) => Ok(Decoded::Frame(Frame {
                kind,
                subtype,
                control,
                sequence,
                payload,
                checksum,
            })),
            None => Ok(Decoded::Incomplete),
        }
    }

    /// Drop any partial group and restart numbering at 0.
    pub fn reset(&mut self) {
        self.next_sequence = 0;
        self.reassembler.reset();
    }
}

// ── Tests ────────────────────────────────────────────────────
