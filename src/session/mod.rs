//! BluFi client session: the protocol core.
//!
//! [`Session`] owns the codec, the security engine and the pending request
//! table for one device. All I/O flows through injected ports, so the
//! whole session runs against mock transports in tests.
//!
//! ```text
//!   host ──commands──▶ ┌───────────────────────────┐ ──frames──▶ Transport
//!                      │          Session          │
//!   host ─on_receive─▶ │ codec · security · table  │ ──events──▶ EventSink
//!                      └───────────────────────────┘
//!                                   ▲
//!                                 Clock
//! ```
//!
//! The session is a single-owner cooperative state machine: every method
//! takes `&mut self`, notifications are processed in delivery order and
//! timeouts only fire from [`Session::poll_timeouts`].

pub mod commands;
pub mod pending;
pub mod state;

use core::time::Duration;

use log::{debug, info, warn};

pub use crate::config::BusyPolicy;
pub use commands::{ConfigureParams, OpMode, OutboundMessage, SoftApParams, SoftApSecurity, StationParams};
pub use pending::ExchangeKind;
pub use state::SessionState;

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::{Error, Result, SecurityError};
use crate::events::{EventSink, SessionEvent};
use crate::protocol::{
    Decoded, Direction, Frame, FrameDecoder, FrameEncoder, FrameKind, FrameOptions, ctrl, data,
};
use crate::response::{
    DeviceErrorCode, Notification, ResponseError, ResponseEvent, StaConnectionState,
    decode_notification,
};
use crate::security::{SecurityEngine, SecurityState};
use crate::transport::Transport;
use pending::{PendingRequests, Reply};

/// SetSecurityMode is always checksummed and acknowledged.
const SECURITY_MODE_OPTIONS: FrameOptions = FrameOptions {
    encrypt: false,
    checksum: true,
    require_ack: true,
};

// ───────────────────────────────────────────────────────────────
// Session
// ───────────────────────────────────────────────────────────────

pub struct Session<T: Transport, S: EventSink, C: Clock> {
    transport: T,
    sink: S,
    clock: C,
    config: SessionConfig,
    state: SessionState,
    security: SecurityEngine,
    encoder: FrameEncoder,
    decoder: FrameDecoder,
    pending: PendingRequests,
    /// The transport reported a successful connect and no loss since.
    linked: bool,
}

impl<T: Transport, S: EventSink, C: Clock> Session<T, S, C> {
    /// Construct an idle session. Fails on an invalid configuration.
    pub fn new(transport: T, sink: S, clock: C, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let security = SecurityEngine::new(config.dh_group()?, config.security_mode);
        let encoder = FrameEncoder::new(Direction::Outbound, config.package_length_limit);

        Ok(Self {
            transport,
            sink,
            clock,
            security,
            encoder,
            decoder: FrameDecoder::new(Direction::Inbound),
            pending: PendingRequests::new(),
            state: SessionState::Disconnected,
            linked: false,
            config,
        })
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn security_state(&self) -> SecurityState {
        self.security.state()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Session key fingerprint, once keys are derived.
    pub fn fingerprint(&self) -> Option<[u8; 8]> {
        self.security.fingerprint()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Bytes per frame currently in use.
    pub fn package_limit(&self) -> usize {
        self.encoder.package_limit()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Open the link and, if configured, start negotiating.
    pub async fn connect(&mut self, device: &str) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(Error::InvalidState(self.state));
        }
        self.set_state(SessionState::Connecting);

        if let Err(e) = self.transport.connect(device).await {
            return Err(self.transport_failed(e.to_string()));
        }

        self.linked = true;
        self.encoder.reset();
        self.decoder.reset();
        self.security.reset();
        let limit = self
            .config
            .package_length_limit
            .min(self.transport.max_transmission_unit());
        self.encoder.set_package_limit(limit);
        info!(
            "session: linked to {device}, {} bytes per frame",
            self.encoder.package_limit()
        );
        self.set_state(SessionState::Ready);

        if self.config.auto_negotiate {
            self.negotiate_security().await?;
        }
        Ok(())
    }

    /// Start (or retry) the security handshake.
    pub async fn negotiate_security(&mut self) -> Result<()> {
        self.state.admit_negotiation()?;
        if !self.linked {
            return Err(Error::NotConnected);
        }

        if !matches!(
            self.security.state(),
            SecurityState::Uninitialized | SecurityState::Failed
        ) {
            self.security.reset();
        }
        self.pending.clear_negotiation();

        let payloads = self.security.begin_negotiation()?;
        self.set_state(SessionState::SecurityNegotiating);

        let announce = OutboundMessage::data(data::NEGOTIATE, &payloads.length_announcement);
        let params = OutboundMessage::data(data::NEGOTIATE, &payloads.parameters);
        self.post(&announce, FrameOptions::PLAIN).await?;
        self.post(&params, FrameOptions::PLAIN).await?;

        let deadline = self.deadline(self.config.negotiation_timeout_ms);
        self.pending.push(ExchangeKind::Negotiate, None, deadline);
        Ok(())
    }

    /// Close the link from any state. Calling it again is a no-op.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.state == SessionState::Disconnected {
            return Ok(());
        }

        if self.linked {
            self.post_close_connection().await;
        }
        self.set_state(SessionState::Closing);

        let result = self.transport.disconnect().await.map_err(|e| {
            warn!("session: transport disconnect failed: {e}");
            Error::Transport(e.to_string())
        });

        self.teardown();
        self.set_state(SessionState::Disconnected);
        self.sink.emit(&SessionEvent::Disconnected);
        result
    }

    /// The host lost the link (peer disconnect, radio loss).
    pub fn on_transport_lost(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        warn!("session: transport lost in {}", self.state);
        self.teardown();
        self.set_state(SessionState::Disconnected);
        self.sink.emit(&SessionEvent::Disconnected);
    }

    // ── Commands ──────────────────────────────────────────────

    /// Provision Wi-Fi credentials and wait for the connection report.
    pub async fn configure(&mut self, params: &ConfigureParams) -> Result<()> {
        self.admit(ExchangeKind::Configure)?;

        for msg in params.messages() {
            let options = self.security.frame_options(msg.kind);
            self.post(&msg, options).await?;
        }

        let deadline = self.deadline(self.config.configure_timeout_ms);
        self.pending.push(ExchangeKind::Configure, None, deadline);
        info!("session: configure posted ({:?})", params.op_mode());
        self.set_state(SessionState::Configuring);
        self.sink.emit(&SessionEvent::ConfigurePosted);
        Ok(())
    }

    pub async fn request_device_status(&mut self) -> Result<()> {
        self.request(ExchangeKind::Status, ctrl::GET_WIFI_STATUS).await
    }

    pub async fn request_device_version(&mut self) -> Result<()> {
        self.request(ExchangeKind::Version, ctrl::GET_VERSION).await
    }

    pub async fn request_scan(&mut self) -> Result<()> {
        self.request(ExchangeKind::Scan, ctrl::GET_WIFI_LIST).await
    }

    /// Send application data to the device.
    ///
    /// With `require_ack`, `CustomDataPosted` is emitted on the device's
    /// ack; otherwise right after the write.
    pub async fn post_custom_data(&mut self, bytes: &[u8]) -> Result<()> {
        self.admit(ExchangeKind::CustomData)?;

        let require_ack = self.config.require_ack;
        let options = self.security.frame_options(FrameKind::Data).with_ack(require_ack);
        let msg = OutboundMessage::data(data::CUSTOM_DATA, bytes);
        let sequence = self.post(&msg, options).await?;

        if require_ack {
            let deadline = self.deadline(self.config.request_timeout_ms);
            self.pending.push(ExchangeKind::CustomData, Some(sequence), deadline);
        } else {
            self.sink.emit(&SessionEvent::CustomDataPosted);
        }
        Ok(())
    }

    async fn request(&mut self, kind: ExchangeKind, subtype: u8) -> Result<()> {
        self.admit(kind)?;
        let options = self.security.frame_options(FrameKind::Control);
        self.post(&OutboundMessage::control(subtype, &[]), options).await?;
        let deadline = self.deadline(self.config.request_timeout_ms);
        self.pending.push(kind, None, deadline);
        Ok(())
    }

    fn admit(&self, kind: ExchangeKind) -> Result<()> {
        self.state
            .admit_command(self.security.state(), self.config.require_security)?;
        if self.config.busy_policy == BusyPolicy::Fail && self.pending.contains(kind) {
            return Err(Error::Busy(kind));
        }
        Ok(())
    }

    // ── Inbound ───────────────────────────────────────────────

    /// Process one GATT notification from the device.
    pub async fn on_receive(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.linked {
            debug!("session: notification while unlinked, ignored");
            return Err(Error::NotConnected);
        }

        let frame = match self.decoder.feed(bytes, &self.security) {
            Ok(Decoded::Frame(frame)) => frame,
            Ok(Decoded::Incomplete) => return Ok(()),
            Err(e) => {
                warn!("session: dropping notification: {e}");
                let err = Error::Codec(e);
                self.sink.emit(&SessionEvent::Error(err.clone()));
                return Err(err);
            }
        };

        if frame.control.requires_ack() {
            self.post_ack(frame.sequence).await?;
        }
        self.dispatch(&frame).await
    }

    async fn dispatch(&mut self, frame: &Frame) -> Result<()> {
        match decode_notification(frame) {
            Notification::Ack(sequence) => self.on_ack(sequence),
            Notification::NegotiationData(public_key) => {
                return self.on_negotiation_data(&public_key).await;
            }
            Notification::Response(response) => self.on_response(response),
        }
        Ok(())
    }

    fn on_ack(&mut self, sequence: u8) {
        let Some(request) = self.pending.take_ack(sequence) else {
            debug!("session: unmatched ack for seq {sequence}, dropped");
            return;
        };

        match request.kind {
            ExchangeKind::SecurityConfirm => match self.security.confirm(sequence) {
                Ok(()) => {
                    if self.state == SessionState::SecurityNegotiating {
                        self.set_state(SessionState::Ready);
                    }
                    if let Some(fingerprint) = self.security.fingerprint() {
                        self.sink.emit(&SessionEvent::SecurityEstablished { fingerprint });
                    }
                }
                Err(e) => self.negotiation_failed(e),
            },
            ExchangeKind::CustomData => self.sink.emit(&SessionEvent::CustomDataPosted),
            other => debug!("session: ack completed {other:?}"),
        }
    }

    async fn on_negotiation_data(&mut self, public_key: &[u8]) -> Result<()> {
        let Some(request) = self.pending.take_kind(ExchangeKind::Negotiate) else {
            warn!("session: unsolicited negotiation data, dropped");
            return Ok(());
        };

        if let Err(e) = self.security.compute_shared_secret(public_key) {
            self.negotiation_failed(e);
            return Ok(());
        }

        let payload = self.security.security_mode_payload();
        let msg = OutboundMessage::control(ctrl::SET_SEC_MODE, &payload);
        let sequence = self.post(&msg, SECURITY_MODE_OPTIONS).await?;
        self.security.expect_confirmation(sequence);
        // The confirmation inherits the negotiation deadline.
        self.pending
            .push(ExchangeKind::SecurityConfirm, Some(sequence), request.deadline);
        Ok(())
    }

    fn on_response(&mut self, response: ResponseEvent) {
        let reply = match response {
            ResponseEvent::StatusResponse(ref status) => Reply::Status {
                settled: status.sta_connection != StaConnectionState::Connecting,
            },
            ResponseEvent::VersionResponse { .. } => Reply::Version,
            ResponseEvent::ScanResult(_) => Reply::Scan,
            ResponseEvent::CustomDataResponse(_) => {
                self.sink.emit(&SessionEvent::Response(response));
                return;
            }
            ResponseEvent::Error(err) => {
                self.sink.emit(&SessionEvent::Response(response));
                self.on_response_error(err);
                return;
            }
        };

        let Some(request) = self.pending.take_reply(reply) else {
            if reply == (Reply::Status { settled: false })
                && self.pending.contains(ExchangeKind::Configure)
            {
                debug!("session: station still connecting");
                self.sink.emit(&SessionEvent::Response(response));
            } else {
                debug!("session: unmatched {reply:?} response, dropped");
            }
            return;
        };

        if request.kind == ExchangeKind::Configure
            && self.state == SessionState::Configuring
            && !self.pending.contains(ExchangeKind::Configure)
        {
            self.set_state(SessionState::Ready);
        }
        self.sink.emit(&SessionEvent::Response(response));
    }

    fn on_response_error(&mut self, err: ResponseError) {
        let ResponseError::Device(code) = err else {
            return;
        };
        if self.state == SessionState::SecurityNegotiating {
            self.negotiation_failed(SecurityError::DeviceRejected(code.to_u8()));
        } else if code == DeviceErrorCode::WifiScan {
            self.pending.take_kind(ExchangeKind::Scan);
        }
    }

    fn negotiation_failed(&mut self, reason: SecurityError) {
        self.security.fail(reason);
        self.pending.clear_negotiation();
        self.set_state(SessionState::Error);
        self.sink.emit(&SessionEvent::SecurityFailed(reason));
    }

    // ── Timeouts ──────────────────────────────────────────────

    /// Expire overdue requests. Returns the kinds that timed out.
    pub fn poll_timeouts(&mut self) -> Vec<ExchangeKind> {
        let now = self.clock.now();
        let expired = self.pending.expire(now);
        let mut kinds = Vec::with_capacity(expired.len());

        for request in expired {
            warn!("session: {:?} request timed out", request.kind);
            match request.kind {
                ExchangeKind::Negotiate | ExchangeKind::SecurityConfirm => {
                    self.security.reset();
                    self.pending.clear_negotiation();
                    if self.state == SessionState::SecurityNegotiating {
                        self.set_state(SessionState::Ready);
                    }
                }
                ExchangeKind::Configure => {
                    if self.state == SessionState::Configuring
                        && !self.pending.contains(ExchangeKind::Configure)
                    {
                        self.set_state(SessionState::Ready);
                    }
                }
                _ => {}
            }
            self.sink
                .emit(&SessionEvent::Error(Error::Timeout(request.kind)));
            kinds.push(request.kind);
        }
        kinds
    }

    // ── Internals ─────────────────────────────────────────────

    fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("session: {} -> {}", from, to);
        self.state = to;
        self.sink.emit(&SessionEvent::StateChanged { from, to });
    }

    fn deadline(&self, timeout_ms: u64) -> Duration {
        self.clock.now() + Duration::from_millis(timeout_ms)
    }

    /// Frame and write one message. Returns the sequence of its last frame.
    async fn post(&mut self, msg: &OutboundMessage, options: FrameOptions) -> Result<u8> {
        let frames = self
            .encoder
            .encode(msg.kind, msg.subtype, options, &msg.payload, &self.security)?;
        for frame in &frames {
            if let Err(e) = self.transport.send(frame).await {
                return Err(self.transport_failed(e.to_string()));
            }
        }
        Ok(self.encoder.next_sequence().wrapping_sub(1))
    }

    async fn post_ack(&mut self, sequence: u8) -> Result<()> {
        let options = self.security.frame_options(FrameKind::Control);
        self.post(&OutboundMessage::control(ctrl::ACK, &[sequence]), options)
            .await?;
        Ok(())
    }

    /// Best effort: failures are logged, never escalated.
    async fn post_close_connection(&mut self) {
        let options = self.security.frame_options(FrameKind::Control);
        let frames = match self.encoder.encode(
            FrameKind::Control,
            ctrl::CLOSE_CONNECTION,
            options,
            &[],
            &self.security,
        ) {
            Ok(frames) => frames,
            Err(e) => {
                debug!("session: close frame not encoded: {e}");
                return;
            }
        };
        for frame in &frames {
            if let Err(e) = self.transport.send(frame).await {
                debug!("session: close frame not sent: {e}");
                return;
            }
        }
    }

    fn transport_failed(&mut self, msg: String) -> Error {
        warn!("session: transport failure: {msg}");
        let err = Error::Transport(msg);
        self.set_state(SessionState::Error);
        self.sink.emit(&SessionEvent::Error(err.clone()));
        err
    }

    /// Cancel requests and forget everything tied to the link.
    fn teardown(&mut self) {
        for request in self.pending.drain() {
            self.sink.emit(&SessionEvent::RequestCancelled(request.kind));
        }
        self.encoder.reset();
        self.decoder.reset();
        self.security.reset();
        self.linked = false;
    }
}

// ── Tests ────────────────────────────────────────────────────
