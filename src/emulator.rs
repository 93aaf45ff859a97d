//! In-process BluFi device.
//!
//! [`DeviceEmulator`] plays the ESP32 side of the protocol: it decodes
//! client frames, answers the DH negotiation, stores provisioned
//! credentials and produces the notifications a real device would send.
//! [`LoopbackTransport`] wires it to a [`Session`](crate::session::Session)
//! so the whole stack runs on the host without a radio.
//!
//! ```text
//!   Session ──send──▶ LoopbackTransport ──feed──▶ DeviceEmulator
//!      ▲                                                │
//!      └──────── on_receive ◀── drain_notifications ◀───┘
//! ```

use std::collections::VecDeque;
use std::rc::Rc;

use core::cell::RefCell;
use core::fmt;

use log::{debug, info, warn};
use num_bigint::BigUint;

use crate::error::{CodecError, MalformedReason, SecurityError};
use crate::protocol::{
    DEFAULT_PACKAGE_LENGTH, Decoded, Direction, Frame, FrameDecoder, FrameEncoder, FrameKind,
    FrameOptions, PayloadCipher, ctrl, data,
};
use crate::response::{DeviceErrorCode, ScanRecord, StaConnectionState, WifiStatus, encode_scan_list};
use crate::security::{
    CHECKSUM_KEY_LABEL, DhGroup, FrameCipher, NEG_SET_ALL_DATA, NEG_SET_LENGTH, SecurityMode,
    parse_negotiation_parameters,
};
use crate::session::commands::{OpMode, SoftApSecurity};
use crate::transport::Transport;

// ───────────────────────────────────────────────────────────────
// Behaviour knobs
// ───────────────────────────────────────────────────────────────

/// How the emulated device behaves.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub version: (u8, u8),
    pub access_points: Vec<ScanRecord>,
    /// Reported after ConnectWifi.
    pub connect_outcome: StaConnectionState,
    /// Answer scans with a WifiScan error instead of a list.
    pub scan_fails: bool,
    /// Answer the negotiation parameters with this error code.
    pub reject_negotiation: Option<DeviceErrorCode>,
    /// Stay silent after the negotiation parameters.
    pub ignore_negotiation: bool,
    /// Send custom data back to the client.
    pub echo_custom_data: bool,
    pub package_limit: usize,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            version: (1, 3),
            access_points: Vec::new(),
            connect_outcome: StaConnectionState::Connected,
            scan_fails: false,
            reject_negotiation: None,
            ignore_negotiation: false,
            echo_custom_data: true,
            package_limit: DEFAULT_PACKAGE_LENGTH,
        }
    }
}

/// Credentials and settings the client has written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provisioned {
    pub op_mode: Option<OpMode>,
    pub sta_bssid: Option<[u8; 6]>,
    pub sta_ssid: Option<String>,
    pub sta_password: Option<String>,
    pub softap_ssid: Option<String>,
    pub softap_password: Option<String>,
    pub softap_security: Option<SoftApSecurity>,
    pub softap_channel: Option<u8>,
    pub softap_max_connections: Option<u8>,
}

// ───────────────────────────────────────────────────────────────
// Device cipher
// ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct DeviceKeys {
    cipher: Option<FrameCipher>,
    fingerprint: Option<[u8; 8]>,
}

impl PayloadCipher for DeviceKeys {
    fn encrypt(&self, sequence: u8, buf: &mut [u8]) -> bool {
        self.cipher.as_ref().is_some_and(|c| {
            c.encrypt(sequence, buf);
            true
        })
    }

    fn decrypt(&self, sequence: u8, buf: &mut [u8]) -> bool {
        self.cipher.as_ref().is_some_and(|c| {
            c.decrypt(sequence, buf);
            true
        })
    }
}

// ───────────────────────────────────────────────────────────────
// DeviceEmulator
// ───────────────────────────────────────────────────────────────

pub struct DeviceEmulator {
    profile: DeviceProfile,
    encoder: FrameEncoder,
    decoder: FrameDecoder,
    keys: DeviceKeys,
    /// Applied after SetSecurityMode; plain until then.
    mode: Option<SecurityMode>,
    announced_len: Option<usize>,
    provisioned: Provisioned,
    sta_state: StaConnectionState,
    /// A ConnectWifi attempt whose report is sent on the next drain.
    connecting: bool,
    custom_data: Vec<Vec<u8>>,
    outbox: VecDeque<Vec<u8>>,
    frames_received: usize,
    close_requested: bool,
}

impl DeviceEmulator {
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            encoder: FrameEncoder::new(Direction::Inbound, profile.package_limit),
            decoder: FrameDecoder::new(Direction::Outbound),
            keys: DeviceKeys::default(),
            mode: None,
            announced_len: None,
            provisioned: Provisioned::default(),
            sta_state: StaConnectionState::Failed,
            connecting: false,
            custom_data: Vec::new(),
            outbox: VecDeque::new(),
            frames_received: 0,
            close_requested: false,
            profile,
        }
    }

    pub fn profile_mut(&mut self) -> &mut DeviceProfile {
        &mut self.profile
    }

    pub fn provisioned(&self) -> &Provisioned {
        &self.provisioned
    }

    pub fn custom_data(&self) -> &[Vec<u8>] {
        &self.custom_data
    }

    /// Fingerprint of the device-side session keys.
    pub fn fingerprint(&self) -> Option<[u8; 8]> {
        self.keys.fingerprint
    }

    pub fn security_mode(&self) -> Option<SecurityMode> {
        self.mode
    }

    pub fn frames_received(&self) -> usize {
        self.frames_received
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Forget the link: numbering, keys and partial messages.
    pub fn reset_link(&mut self) {
        self.encoder.reset();
        self.decoder.reset();
        self.keys = DeviceKeys::default();
        self.mode = None;
        self.announced_len = None;
        self.outbox.clear();
        self.connecting = false;
        self.close_requested = false;
    }

    /// Queue an unsolicited notification (e.g. a status push).
    pub fn push_notification(&mut self, kind: FrameKind, subtype: u8, payload: &[u8]) {
        self.send(kind, subtype, payload, false);
    }

    /// Notifications produced since the last call, one frame each.
    ///
    /// A pending connection attempt ends here, so its report follows the
    /// replies to every frame fed before the drain.
    pub fn drain_notifications(&mut self) -> Vec<Vec<u8>> {
        if std::mem::take(&mut self.connecting) {
            self.sta_state = self.profile.connect_outcome;
            info!(
                "emulator: connection to {:?} -> {:?}",
                self.provisioned.sta_ssid, self.sta_state
            );
            self.send_status();
        }
        self.outbox.drain(..).collect()
    }

    /// Process one frame written by the client.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.frames_received += 1;
        let frame = match self.decoder.feed(bytes, &self.keys) {
            Ok(Decoded::Frame(frame)) => frame,
            Ok(Decoded::Incomplete) => return,
            Err(e) => {
                warn!("emulator: rejecting client frame: {e}");
                self.report_error(codec_error_code(e));
                return;
            }
        };

        if frame.control.requires_ack() {
            self.send(FrameKind::Control, ctrl::ACK, &[frame.sequence], false);
        }
        match frame.kind {
            FrameKind::Control => self.on_control(&frame),
            FrameKind::Data => self.on_data(&frame),
        }
    }

    fn on_control(&mut self, frame: &Frame) {
        match frame.subtype {
            ctrl::ACK => debug!("emulator: client acked {:?}", frame.payload.first()),
            ctrl::SET_SEC_MODE => {
                let Some(&byte) = frame.payload.first() else {
                    return self.report_error(DeviceErrorCode::DataFormat);
                };
                let mode = SecurityMode::from_byte(byte);
                info!("emulator: security mode {byte:#04x}");
                self.mode = Some(mode);
            }
            ctrl::SET_OP_MODE => match frame.payload.first().copied().and_then(OpMode::from_u8) {
                Some(mode) => self.provisioned.op_mode = Some(mode),
                None => self.report_error(DeviceErrorCode::DataFormat),
            },
            ctrl::CONNECT_WIFI => {
                debug!("emulator: connecting to {:?}", self.provisioned.sta_ssid);
                self.sta_state = StaConnectionState::Connecting;
                self.connecting = true;
            }
            ctrl::DISCONNECT_WIFI => {
                self.sta_state = StaConnectionState::Failed;
                self.connecting = false;
            }
            ctrl::GET_WIFI_STATUS => self.send_status(),
            ctrl::GET_VERSION => {
                let (major, minor) = self.profile.version;
                self.send(FrameKind::Data, data::VERSION, &[major, minor], false);
            }
            ctrl::GET_WIFI_LIST => {
                if self.profile.scan_fails {
                    self.report_error(DeviceErrorCode::WifiScan);
                } else {
                    match encode_scan_list(&self.profile.access_points) {
                        Ok(list) => self.send(FrameKind::Data, data::WIFI_LIST, &list, false),
                        Err(e) => {
                            warn!("emulator: cannot report scan: {e}");
                            self.report_error(DeviceErrorCode::WifiScan);
                        }
                    }
                }
            }
            ctrl::CLOSE_CONNECTION => self.close_requested = true,
            other => debug!("emulator: ignoring control {other:#04x}"),
        }
    }

    fn on_data(&mut self, frame: &Frame) {
        let text = || String::from_utf8_lossy(&frame.payload).into_owned();
        let byte = frame.payload.first().copied();
        match frame.subtype {
            data::NEGOTIATE => self.on_negotiate(&frame.payload),
            data::STA_BSSID => match <[u8; 6]>::try_from(frame.payload.as_slice()) {
                Ok(bssid) => self.provisioned.sta_bssid = Some(bssid),
                Err(_) => self.report_error(DeviceErrorCode::DataFormat),
            },
            data::STA_SSID => self.provisioned.sta_ssid = Some(text()),
            data::STA_PASSWORD => self.provisioned.sta_password = Some(text()),
            data::SOFTAP_SSID => self.provisioned.softap_ssid = Some(text()),
            data::SOFTAP_PASSWORD => self.provisioned.softap_password = Some(text()),
            data::SOFTAP_AUTH_MODE => {
                self.provisioned.softap_security = byte.and_then(SoftApSecurity::from_u8);
            }
            data::SOFTAP_CHANNEL => self.provisioned.softap_channel = byte,
            data::SOFTAP_MAX_CONNECTIONS => self.provisioned.softap_max_connections = byte,
            data::CUSTOM_DATA => {
                self.custom_data.push(frame.payload.clone());
                if self.profile.echo_custom_data {
                    self.send(FrameKind::Data, data::CUSTOM_DATA, &frame.payload, false);
                }
            }
            other => debug!("emulator: ignoring data {other:#04x}"),
        }
    }

    fn on_negotiate(&mut self, msg: &[u8]) {
        match msg.first() {
            Some(&NEG_SET_LENGTH) if msg.len() >= 3 => {
                self.announced_len = Some(u16::from_be_bytes([msg[1], msg[2]]) as usize);
            }
            Some(&NEG_SET_ALL_DATA) => {
                if let Some(code) = self.profile.reject_negotiation {
                    return self.report_error(code);
                }
                if self.profile.ignore_negotiation {
                    return;
                }
                if self.announced_len.take().is_some_and(|n| n + 1 != msg.len()) {
                    return self.report_error(DeviceErrorCode::DataFormat);
                }
                match derive_keys(msg) {
                    Ok((public, keys)) => {
                        self.keys = keys;
                        self.send(FrameKind::Data, data::NEGOTIATE, &public, true);
                    }
                    Err(e) => {
                        warn!("emulator: negotiation failed: {e}");
                        self.report_error(DeviceErrorCode::DhParam);
                    }
                }
            }
            _ => self.report_error(DeviceErrorCode::DataFormat),
        }
    }

    fn send_status(&mut self) {
        let op_mode = self.provisioned.op_mode.unwrap_or(OpMode::Null);
        let mut status = WifiStatus::new(op_mode, self.sta_state, 0);
        if op_mode.has_station() {
            status.sta_bssid = self.provisioned.sta_bssid;
            status.sta_ssid.clone_from(&self.provisioned.sta_ssid);
        }
        if op_mode.has_softap() {
            status.softap_ssid.clone_from(&self.provisioned.softap_ssid);
            status.softap_security = self.provisioned.softap_security;
            status.softap_channel = self.provisioned.softap_channel;
            status.softap_max_connections = self.provisioned.softap_max_connections;
        }
        match status.to_payload() {
            Ok(payload) => self.send(FrameKind::Data, data::WIFI_CONNECTION_STATE, &payload, false),
            Err(e) => {
                warn!("emulator: cannot report status: {e}");
                self.report_error(DeviceErrorCode::DataFormat);
            }
        }
    }

    fn report_error(&mut self, code: DeviceErrorCode) {
        self.send(FrameKind::Data, data::ERROR, &[code.to_u8()], false);
    }

    fn send(&mut self, kind: FrameKind, subtype: u8, payload: &[u8], plain: bool) {
        let options = match self.mode {
            Some(mode) if !plain && self.keys.cipher.is_some() => mode.options_for(kind),
            _ => FrameOptions::PLAIN,
        };
        match self.encoder.encode(kind, subtype, options, payload, &self.keys) {
            Ok(frames) => self.outbox.extend(frames),
            Err(e) => warn!("emulator: cannot encode {kind:?}/{subtype:#04x}: {e}"),
        }
    }
}

impl Default for DeviceEmulator {
    fn default() -> Self {
        Self::new(DeviceProfile::default())
    }
}

/// Answer the client's parameters with a fresh key pair.
fn derive_keys(msg: &[u8]) -> Result<(Vec<u8>, DeviceKeys), SecurityError> {
    let (p, g, client_public) = parse_negotiation_parameters(msg)?;
    let group = DhGroup::new(BigUint::from_bytes_be(p), BigUint::from_bytes_be(g))?;
    let key_pair = group.generate_key_pair();
    let secret = key_pair.compute_shared_secret(&group, client_public)?;

    let checksum_key = zeroize::Zeroizing::new(hmac_sha256::HMAC::mac(CHECKSUM_KEY_LABEL, &*secret));
    let mut fingerprint = [0u8; 8];
    fingerprint.copy_from_slice(&checksum_key[..8]);

    let keys = DeviceKeys {
        cipher: Some(FrameCipher::from_shared_secret(&secret)),
        fingerprint: Some(fingerprint),
    };
    Ok((key_pair.public_key().to_vec(), keys))
}

fn codec_error_code(e: CodecError) -> DeviceErrorCode {
    match e {
        CodecError::SequenceGap { .. } => DeviceErrorCode::Sequence,
        CodecError::MalformedFrame(MalformedReason::ChecksumMismatch { .. }) => {
            DeviceErrorCode::Checksum
        }
        CodecError::MalformedFrame(MalformedReason::Undecryptable) => DeviceErrorCode::Decrypt,
        CodecError::MalformedFrame(_) => DeviceErrorCode::DataFormat,
    }
}

// ───────────────────────────────────────────────────────────────
// LoopbackTransport
// ───────────────────────────────────────────────────────────────

/// Failure injected into a [`LoopbackTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackError {
    ConnectRefused,
    WriteFailed,
    NotConnected,
}

impl fmt::Display for LoopbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectRefused => write!(f, "connection refused"),
            Self::WriteFailed => write!(f, "GATT write failed"),
            Self::NotConnected => write!(f, "link is down"),
        }
    }
}

/// Transport that delivers every write straight into a shared emulator.
pub struct LoopbackTransport {
    device: Rc<RefCell<DeviceEmulator>>,
    mtu: usize,
    connected: bool,
    refuse_connect: bool,
    fail_writes: bool,
    sent: Vec<Vec<u8>>,
}

impl LoopbackTransport {
    pub fn new(device: Rc<RefCell<DeviceEmulator>>) -> Self {
        Self {
            device,
            mtu: DEFAULT_PACKAGE_LENGTH,
            connected: false,
            refuse_connect: false,
            fail_writes: false,
            sent: Vec::new(),
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn set_refuse_connect(&mut self, refuse: bool) {
        self.refuse_connect = refuse;
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Every frame written, in order.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    pub fn device(&self) -> &Rc<RefCell<DeviceEmulator>> {
        &self.device
    }

    /// Notifications the device has produced, ready for `on_receive`.
    pub fn drain_notifications(&self) -> Vec<Vec<u8>> {
        self.device.borrow_mut().drain_notifications()
    }
}

impl Transport for LoopbackTransport {
    type Error = LoopbackError;

    async fn connect(&mut self, device: &str) -> Result<(), Self::Error> {
        if self.refuse_connect {
            return Err(LoopbackError::ConnectRefused);
        }
        debug!("loopback: connected to {device}");
        self.device.borrow_mut().reset_link();
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(LoopbackError::NotConnected);
        }
        if self.fail_writes {
            return Err(LoopbackError::WriteFailed);
        }
        self.sent.push(frame.to_vec());
        self.device.borrow_mut().feed(frame);
        Ok(())
    }

    fn max_transmission_unit(&self) -> usize {
        self.mtu
    }
}

// ── Tests ────────────────────────────────────────────────────
