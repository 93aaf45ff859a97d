//! Outstanding requests awaiting a device response.
//!
//! Requests are kept in send order. A response completes the oldest
//! request waiting for that kind of reply; an ack completes the request
//! registered for the acknowledged sequence. Each request has one deadline.
//!
//! Status reports are shared by two exchanges. The device answers
//! GetWifiStatus at once but reports the outcome of ConnectWifi only when
//! the connection attempt ends, so an explicit status request takes a
//! report first, and a configure is only completed by a report that
//! carries an outcome.

use std::collections::VecDeque;

use core::time::Duration;

/// The kind of exchange a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Waiting for the device public key.
    Negotiate,
    /// Waiting for the ack of SetSecurityMode.
    SecurityConfirm,
    /// Waiting for the connection report after configure.
    Configure,
    Status,
    Version,
    Scan,
    /// Waiting for the ack of a custom data message.
    CustomData,
}

impl ExchangeKind {
    pub fn is_negotiation(self) -> bool {
        matches!(self, Self::Negotiate | Self::SecurityConfirm)
    }

    /// Priority of this waiter for `reply`, lowest first. `None` if the
    /// reply cannot complete it.
    fn rank(self, reply: Reply) -> Option<u8> {
        match (self, reply) {
            (Self::Negotiate, Reply::Negotiation)
            | (Self::Status, Reply::Status { .. })
            | (Self::Version, Reply::Version)
            | (Self::Scan, Reply::Scan) => Some(0),
            (Self::Configure, Reply::Status { settled: true }) => Some(1),
            _ => None,
        }
    }
}

/// Reply classes that complete a request by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Negotiation,
    /// Wi-Fi status report; `settled` unless the station is still connecting.
    Status { settled: bool },
    Version,
    Scan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub kind: ExchangeKind,
    /// Sequence whose ack completes this request.
    pub ack_sequence: Option<u8>,
    pub deadline: Duration,
}

#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: VecDeque<PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: ExchangeKind, ack_sequence: Option<u8>, deadline: Duration) {
        self.entries.push_back(PendingRequest {
            kind,
            ack_sequence,
            deadline,
        });
    }

    pub fn contains(&self, kind: ExchangeKind) -> bool {
        self.entries.iter().any(|p| p.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Complete the highest-priority, then oldest, request answered by `reply`.
    pub fn take_reply(&mut self, reply: Reply) -> Option<PendingRequest> {
        let (_, idx) = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.kind.rank(reply).map(|rank| (rank, i)))
            .min()?;
        self.entries.remove(idx)
    }

    /// Complete the request waiting for the ack of `sequence`.
    pub fn take_ack(&mut self, sequence: u8) -> Option<PendingRequest> {
        let idx = self
            .entries
            .iter()
            .position(|p| p.ack_sequence == Some(sequence))?;
        self.entries.remove(idx)
    }

    /// Remove the oldest request of `kind`.
    pub fn take_kind(&mut self, kind: ExchangeKind) -> Option<PendingRequest> {
        let idx = self.entries.iter().position(|p| p.kind == kind)?;
        self.entries.remove(idx)
    }

    /// Drop every negotiation request.
    pub fn clear_negotiation(&mut self) {
        self.entries.retain(|p| !p.kind.is_negotiation());
    }

    /// Remove and return every request whose deadline has passed.
    pub fn expire(&mut self, now: Duration) -> Vec<PendingRequest> {
        let mut expired = Vec::new();
        self.entries.retain(|p| {
            if p.deadline <= now {
                expired.push(*p);
                false
            } else {
                true
            }
        });
        expired
    }

    /// Remove and return everything, oldest first.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.entries.drain(..).collect()
    }
}
