//! Fragmentation of logical messages across package-sized frames.
//!
//! Every frame except the last of a group carries the fragment flag and
//! starts its data with the number of message bytes still to come,
//! counted from (and including) this fragment:
//!
//! ```text
//! message: 40 bytes, 14 data bytes per frame
//!
//! frame 1: FRAG  [40, 0] bytes  0..12
//! frame 2: FRAG  [28, 0] bytes 12..24
//! frame 3: FRAG  [16, 0] bytes 24..36
//! frame 4:               bytes 36..40
//! ```
//!
//! A tail of at most two bytes is folded into the previous fragment rather
//! than sent on its own.

extern crate alloc;
use alloc::vec::Vec;

use super::{FRAG_LEN_PREFIX, FrameKind};
use crate::error::MalformedReason;

/// Upper bound for a reassembled message.
pub const MAX_MESSAGE_LEN: usize = 8192;

/// Largest tail that is folded into the preceding fragment.
const FOLD_THRESHOLD: usize = 2;

/// One piece of a split message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub body: &'a [u8],
    /// Remaining-total-length prefix; `Some` when more fragments follow.
    pub remaining: Option<u16>,
}

impl Chunk<'_> {
    /// Frame data for this chunk, including the length prefix if any.
    pub fn to_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + FRAG_LEN_PREFIX);
        if let Some(remaining) = self.remaining {
            out.extend_from_slice(&remaining.to_le_bytes());
        }
        out.extend_from_slice(self.body);
        out
    }
}

/// Split `payload` so that no frame carries more than `max_data` bytes of
/// data, prefix included.
///
/// An empty payload yields a single empty chunk. `max_data` must leave room
/// for the prefix plus at least one byte.
pub fn split(payload: &[u8], max_data: usize) -> Vec<Chunk<'_>> {
    debug_assert!(max_data > FRAG_LEN_PREFIX);

    if payload.len() <= max_data {
        return alloc::vec![Chunk { body: payload, remaining: None }];
    }

    let step = max_data - FRAG_LEN_PREFIX;
    let mut chunks = Vec::with_capacity(payload.len() / step + 1);
    let mut offset = 0;

    while offset < payload.len() {
        let left = payload.len() - offset;
        let mut take = step.min(left);
        let tail = left - take;
        if tail > 0 && tail <= FOLD_THRESHOLD && take + tail <= max_data {
            take += tail;
        }

        let more = offset + take < payload.len();
        let remaining = more.then_some(left as u16);
        chunks.push(Chunk {
            body: &payload[offset..offset + take],
            remaining,
        });
        offset += take;
    }

    chunks
}

// ── Reassembly ───────────────────────────────────────────────

struct Group {
    kind: FrameKind,
    subtype: u8,
    total: usize,
    buf: Vec<u8>,
}

/// Collects fragment groups back into whole messages.
///
/// Any inconsistency discards the partial group and is returned to the
/// caller; the next frame starts from a clean slate.
pub struct Reassembler {
    group: Option<Group>,
    limit: usize,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_limit(MAX_MESSAGE_LEN)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self { group: None, limit }
    }

    /// Push one frame's (decrypted, verified) data.
    ///
    /// Returns `Some(message)` when the frame completes a message.
    pub fn push(
        &mut self,
        kind: FrameKind,
        subtype: u8,
        has_fragment: bool,
        data: &[u8],
    ) -> Result<Option<Vec<u8>>, MalformedReason> {
        let result = self.push_inner(kind, subtype, has_fragment, data);
        if result.is_err() {
            self.group = None;
        }
        result
    }

    fn push_inner(
        &mut self,
        kind: FrameKind,
        subtype: u8,
        has_fragment: bool,
        data: &[u8],
    ) -> Result<Option<Vec<u8>>, MalformedReason> {
        if let Some(group) = &self.group {
            if group.kind != kind || group.subtype != subtype {
                return Err(MalformedReason::UnexpectedType);
            }
        }

        if !has_fragment {
            return match self.group.take() {
                None => Ok(Some(data.to_vec())),
                Some(mut group) => {
                    if group.buf.len() + data.len() != group.total {
                        return Err(MalformedReason::FragmentLength);
                    }
                    group.buf.extend_from_slice(data);
                    Ok(Some(group.buf))
                }
            };
        }

        if data.len() < FRAG_LEN_PREFIX {
            return Err(MalformedReason::FragmentLength);
        }
        let remaining = u16::from_le_bytes([data[0], data[1]]) as usize;
        let body = &data[FRAG_LEN_PREFIX..];

        // A fragment with more to follow never carries the whole remainder.
        if body.len() >= remaining {
            return Err(MalformedReason::FragmentLength);
        }

        match &mut self.group {
            None => {
                if remaining > self.limit {
                    return Err(MalformedReason::Oversized);
                }
                let mut buf = Vec::with_capacity(remaining);
                buf.extend_from_slice(body);
                self.group = Some(Group {
                    kind,
                    subtype,
                    total: remaining,
                    buf,
                });
            }
            Some(group) => {
                if group.total - group.buf.len() != remaining {
                    return Err(MalformedReason::FragmentLength);
                }
                group.buf.extend_from_slice(body);
            }
        }
        Ok(None)
    }

    /// Discard any partial group.
    pub fn reset(&mut self) {
        self.group = None;
    }

    /// Whether a fragment group is in progress.
    pub fn is_active(&self) -> bool {
        self.group.is_some()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────
