//! Session events and the sinks that receive them.
//!
//! The session reports everything that happens asynchronously (state
//! changes, device responses, timeouts, codec errors) as a
//! [`SessionEvent`] pushed through the [`EventSink`] port. Adapters decide
//! where events go:
//!
//! - [`EventQueue`]: in-memory FIFO, polled by the host
//! - [`LogEventSink`]: one structured log line per event
//! - [`ChannelSink`]: an `embassy-sync` channel drained by an async task

use std::collections::VecDeque;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};

use crate::error::{Error, SecurityError};
use crate::response::ResponseEvent;
use crate::session::{ExchangeKind, SessionState};

/// Something the application should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged { from: SessionState, to: SessionState },
    /// Negotiation completed; `fingerprint` identifies the session keys.
    SecurityEstablished { fingerprint: [u8; 8] },
    SecurityFailed(SecurityError),
    /// All configure frames were written.
    ConfigurePosted,
    /// Custom data was written (and acked, if an ack was requested).
    CustomDataPosted,
    Response(ResponseEvent),
    /// A non-fatal error: codec failure or request timeout.
    Error(Error),
    /// A pending request was dropped by disconnect or link loss.
    RequestCancelled(ExchangeKind),
    Disconnected,
}

// ───────────────────────────────────────────────────────────────
// Event sink port
// ───────────────────────────────────────────────────────────────

/// The session emits every [`SessionEvent`] through this port.
pub trait EventSink {
    fn emit(&mut self, event: &SessionEvent);
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: &SessionEvent) {
        (**self).emit(event);
    }
}

// ───────────────────────────────────────────────────────────────
// Queue sink
// ───────────────────────────────────────────────────────────────

/// Buffers events until the host drains them.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<SessionEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    pub fn drain(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionEvent> {
        self.events.iter()
    }
}

impl EventSink for EventQueue {
    fn emit(&mut self, event: &SessionEvent) {
        self.events.push_back(event.clone());
    }
}

// ───────────────────────────────────────────────────────────────
// Log sink
// ───────────────────────────────────────────────────────────────

/// Adapter that logs every [`SessionEvent`].
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged { from, to } => {
                info!("STATE | {} -> {}", from, to);
            }
            SessionEvent::SecurityEstablished { fingerprint } => {
                info!(
                    "SECURITY | established, fingerprint={:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
                    fingerprint[0],
                    fingerprint[1],
                    fingerprint[2],
                    fingerprint[3],
                    fingerprint[4],
                    fingerprint[5],
                    fingerprint[6],
                    fingerprint[7],
                );
            }
            SessionEvent::SecurityFailed(reason) => {
                warn!("SECURITY | failed: {}", reason);
            }
            SessionEvent::ConfigurePosted => {
                info!("CONFIG | posted, awaiting connection report");
            }
            SessionEvent::CustomDataPosted => {
                info!("CUSTOM | posted");
            }
            SessionEvent::Response(ResponseEvent::StatusResponse(s)) => {
                info!(
                    "STATUS | mode={:?} sta={:?} softap_conns={} ssid={:?} rssi={:?}",
                    s.op_mode, s.sta_connection, s.softap_connections, s.sta_ssid, s.rssi
                );
            }
            SessionEvent::Response(ResponseEvent::VersionResponse { major, minor }) => {
                info!("VERSION | {}.{}", major, minor);
            }
            SessionEvent::Response(ResponseEvent::ScanResult(records)) => {
                info!("SCAN | {} access point(s)", records.len());
            }
            SessionEvent::Response(ResponseEvent::CustomDataResponse(bytes)) => {
                info!("CUSTOM | received {} byte(s)", bytes.len());
            }
            SessionEvent::Response(ResponseEvent::Error(e)) => {
                warn!("DEVICE | {}", e);
            }
            SessionEvent::Error(e) => {
                warn!("ERROR | {}", e);
            }
            SessionEvent::RequestCancelled(kind) => {
                info!("CANCEL | {:?}", kind);
            }
            SessionEvent::Disconnected => {
                info!("LINK | disconnected");
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Channel sink
// ───────────────────────────────────────────────────────────────

/// Default depth for an event channel.
pub const EVENT_CHANNEL_DEPTH: usize = 16;

/// Event channel for a single-threaded executor.
pub type EventChannel<const N: usize = EVENT_CHANNEL_DEPTH> =
    Channel<NoopRawMutex, SessionEvent, N>;

/// Pushes events into a bounded channel; drops (with a warning) when full.
pub struct ChannelSink<'a, const N: usize = EVENT_CHANNEL_DEPTH> {
    channel: &'a EventChannel<N>,
    dropped: usize,
}

impl<'a, const N: usize> ChannelSink<'a, N> {
    pub fn new(channel: &'a EventChannel<N>) -> Self {
        Self {
            channel,
            dropped: 0,
        }
    }

    /// Events lost to a full channel.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl<const N: usize> EventSink for ChannelSink<'_, N> {
    fn emit(&mut self, event: &SessionEvent) {
        if self.channel.try_send(event.clone()).is_err() {
            self.dropped += 1;
            warn!("event channel full, dropping {:?}", event);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
