//! Unified error types for the BluFi client engine.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! session's error handling uniform. Codec and security errors are `Copy`
//! so they can be reported through events without allocation.
//!
//! | Variant                  | Fatal to the session?                      |
//! |--------------------------|--------------------------------------------|
//! | `Transport`              | yes, session moves to `Error`              |
//! | `Codec`                  | no, partial message discarded and reported |
//! | `Security`               | only during negotiation                    |
//! | `SecurityNotEstablished` | no, retry after negotiation                |
//! | `Timeout` / `Busy`       | no, retryable by the caller                |

use core::fmt;

use crate::session::ExchangeKind;
use crate::session::state::SessionState;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible session operation funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The transport failed to connect, write or disconnect.
    Transport(String),
    /// An inbound notification could not be decoded.
    Codec(CodecError),
    /// The security handshake failed or a key was unavailable.
    Security(SecurityError),
    /// A command was issued before the handshake completed.
    SecurityNotEstablished,
    /// A pending request expired before its response arrived.
    Timeout(ExchangeKind),
    /// A request of the same kind is already in flight.
    Busy(ExchangeKind),
    /// No link to a device.
    NotConnected,
    /// The operation is not allowed in the current session state.
    InvalidState(SessionState),
    /// Provisioning parameters failed validation.
    InvalidParams(&'static str),
    /// Session configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::Security(e) => write!(f, "security: {e}"),
            Self::SecurityNotEstablished => write!(f, "security not established"),
            Self::Timeout(kind) => write!(f, "{kind:?} request timed out"),
            Self::Busy(kind) => write!(f, "{kind:?} request already pending"),
            Self::NotConnected => write!(f, "not connected"),
            Self::InvalidState(state) => write!(f, "not allowed in state {state:?}"),
            Self::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

/// Frame-level decode failures. The partial fragment group is always
/// discarded when one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Header, length or checksum is inconsistent.
    MalformedFrame(MalformedReason),
    /// Sequence number is not the one expected for this direction.
    SequenceGap { expected: u8, got: u8 },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedFrame(reason) => write!(f, "malformed frame: {reason}"),
            Self::SequenceGap { expected, got } => {
                write!(f, "sequence gap (expected {expected}, got {got})")
            }
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// Fewer bytes than the fixed header (or declared checksum).
    Truncated,
    /// Data length byte disagrees with the chunk size.
    LengthMismatch,
    /// CRC16 over sequence, length and data did not match.
    ChecksumMismatch { expected: u16, actual: u16 },
    /// Fragment total-length prefix disagrees with received data.
    FragmentLength,
    /// Frame kind or subtype changed in the middle of a fragment group.
    UnexpectedType,
    /// Direction bit does not match the expected sender.
    Direction,
    /// Encrypted frame arrived without a usable key.
    Undecryptable,
    /// Reassembled message exceeds the reassembly limit.
    Oversized,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated"),
            Self::LengthMismatch => write!(f, "length mismatch"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch (expected {expected:#06x}, got {actual:#06x})")
            }
            Self::FragmentLength => write!(f, "fragment length mismatch"),
            Self::UnexpectedType => write!(f, "type changed mid-group"),
            Self::Direction => write!(f, "wrong direction"),
            Self::Undecryptable => write!(f, "encrypted without key"),
            Self::Oversized => write!(f, "message too large"),
        }
    }
}

// ---------------------------------------------------------------------------
// Security errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityError {
    /// Operation called outside the negotiation state that allows it.
    NotNegotiating,
    /// Peer public value is outside `(1, p - 1)` or has the wrong size.
    InvalidPeerKey,
    /// Private exponent outside `[2, p - 2]`.
    InvalidPrivateKey,
    /// DH prime/generator could not be parsed or is unusable.
    InvalidGroup,
    /// Encrypt/decrypt requested before keys were derived.
    KeyUnavailable,
    /// The device acknowledged a different sequence than the security-mode frame.
    AckMismatch { expected: u8, got: u8 },
    /// The device reported an error code during negotiation.
    DeviceRejected(u8),
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotNegotiating => write!(f, "no negotiation in progress"),
            Self::InvalidPeerKey => write!(f, "invalid peer public key"),
            Self::InvalidPrivateKey => write!(f, "invalid private exponent"),
            Self::InvalidGroup => write!(f, "invalid DH group"),
            Self::KeyUnavailable => write!(f, "key not derived"),
            Self::AckMismatch { expected, got } => {
                write!(f, "ack for sequence {got}, expected {expected}")
            }
            Self::DeviceRejected(code) => write!(f, "device rejected negotiation (code {code})"),
        }
    }
}

impl From<SecurityError> for Error {
    fn from(e: SecurityError) -> Self {
        Self::Security(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
