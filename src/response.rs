//! Typed decoding of device notifications.
//!
//! | (kind, subtype)              | Notification                          |
//! |------------------------------|---------------------------------------|
//! | Control / Ack                | `Ack(sequence)`                       |
//! | Data / Negotiate             | `NegotiationData(bytes)`              |
//! | Data / WifiConnectionState   | `Response(StatusResponse)`            |
//! | Data / Version               | `Response(VersionResponse)`           |
//! | Data / WifiList              | `Response(ScanResult)`                |
//! | Data / Error                 | `Response(Error(Device(code)))`       |
//! | Data / CustomData            | `Response(CustomDataResponse)`        |
//! | anything else                | `Response(Error(UnknownType))`        |
//!
//! The encoders at the bottom build the same payloads from the device side.

use core::fmt;

use log::debug;

use crate::protocol::{Frame, FrameKind, ctrl, data};
use crate::session::commands::{OpMode, SoftApSecurity};

// ── Value types ──────────────────────────────────────────────

/// Station link state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaConnectionState {
    Connected,
    Failed,
    Connecting,
    /// Associated but no IP address yet.
    NoIp,
    Unknown(u8),
}

impl StaConnectionState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connected,
            1 => Self::Failed,
            2 => Self::Connecting,
            3 => Self::NoIp,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Connected => 0,
            Self::Failed => 1,
            Self::Connecting => 2,
            Self::NoIp => 3,
            Self::Unknown(v) => v,
        }
    }
}

/// Device Wi-Fi status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiStatus {
    pub op_mode: OpMode,
    pub sta_connection: StaConnectionState,
    pub softap_connections: u8,
    pub sta_bssid: Option<[u8; 6]>,
    pub sta_ssid: Option<String>,
    pub sta_password: Option<String>,
    pub softap_ssid: Option<String>,
    pub softap_password: Option<String>,
    pub softap_security: Option<SoftApSecurity>,
    pub softap_max_connections: Option<u8>,
    pub softap_channel: Option<u8>,
    pub max_connection_retry: Option<u8>,
    pub connection_end_reason: Option<u8>,
    pub rssi: Option<i8>,
}

impl WifiStatus {
    pub fn new(op_mode: OpMode, sta_connection: StaConnectionState, softap_connections: u8) -> Self {
        Self {
            op_mode,
            sta_connection,
            softap_connections,
            sta_bssid: None,
            sta_ssid: None,
            sta_password: None,
            softap_ssid: None,
            softap_password: None,
            softap_security: None,
            softap_max_connections: None,
            softap_channel: None,
            max_connection_retry: None,
            connection_end_reason: None,
            rssi: None,
        }
    }

    pub fn is_sta_connected(&self) -> bool {
        self.sta_connection == StaConnectionState::Connected
    }
}

/// One access point from a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub ssid: String,
    pub rssi: i8,
}

/// Error codes a device reports on Data/Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorCode {
    Sequence,
    Checksum,
    Decrypt,
    Encrypt,
    InitSecurity,
    DhMalloc,
    DhParam,
    ReadParam,
    MakePublic,
    DataFormat,
    CalcMd5,
    WifiScan,
    MsgState,
    Unknown(u8),
}

impl DeviceErrorCode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Sequence,
            1 => Self::Checksum,
            2 => Self::Decrypt,
            3 => Self::Encrypt,
            4 => Self::InitSecurity,
            5 => Self::DhMalloc,
            6 => Self::DhParam,
            7 => Self::ReadParam,
            8 => Self::MakePublic,
            9 => Self::DataFormat,
            10 => Self::CalcMd5,
            11 => Self::WifiScan,
            12 => Self::MsgState,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Sequence => 0,
            Self::Checksum => 1,
            Self::Decrypt => 2,
            Self::Encrypt => 3,
            Self::InitSecurity => 4,
            Self::DhMalloc => 5,
            Self::DhParam => 6,
            Self::ReadParam => 7,
            Self::MakePublic => 8,
            Self::DataFormat => 9,
            Self::CalcMd5 => 10,
            Self::WifiScan => 11,
            Self::MsgState => 12,
            Self::Unknown(v) => v,
        }
    }

    /// Codes that mean the security handshake itself broke.
    pub fn is_security_failure(self) -> bool {
        matches!(
            self,
            Self::InitSecurity
                | Self::DhMalloc
                | Self::DhParam
                | Self::ReadParam
                | Self::MakePublic
                | Self::CalcMd5
                | Self::Decrypt
                | Self::Encrypt
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseError {
    /// The device reported an error.
    Device(DeviceErrorCode),
    /// No decoder for this (kind, subtype).
    UnknownType { kind: FrameKind, subtype: u8 },
    /// Payload too short or internally inconsistent.
    MalformedPayload { subtype: u8 },
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(code) => write!(f, "device error {code:?} ({})", code.to_u8()),
            Self::UnknownType { kind, subtype } => {
                write!(f, "unknown frame {kind:?}/{subtype:#04x}")
            }
            Self::MalformedPayload { subtype } => {
                write!(f, "malformed payload for subtype {subtype:#04x}")
            }
        }
    }
}

/// Typed device response delivered to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    ScanResult(Vec<ScanRecord>),
    StatusResponse(WifiStatus),
    VersionResponse { major: u8, minor: u8 },
    CustomDataResponse(Vec<u8>),
    Error(ResponseError),
}

/// Everything a device notification can decode to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Device acknowledged the frame with this sequence.
    Ack(u8),
    /// Device public key during negotiation.
    NegotiationData(Vec<u8>),
    Response(ResponseEvent),
}

// ── Decoding ─────────────────────────────────────────────────

pub fn decode_notification(frame: &Frame) -> Notification {
    let malformed = || {
        Notification::Response(ResponseEvent::Error(ResponseError::MalformedPayload {
            subtype: frame.subtype,
        }))
    };

    match (frame.kind, frame.subtype) {
        (FrameKind::Control, ctrl::ACK) => match frame.payload.first() {
            Some(&seq) => Notification::Ack(seq),
            None => malformed(),
        },
        (FrameKind::Data, data::NEGOTIATE) => Notification::NegotiationData(frame.payload.clone()),
        (FrameKind::Data, data::WIFI_CONNECTION_STATE) => match decode_status(&frame.payload) {
            Some(status) => Notification::Response(ResponseEvent::StatusResponse(status)),
            None => malformed(),
        },
        (FrameKind::Data, data::VERSION) => match frame.payload.as_slice() {
            [major, minor, ..] => Notification::Response(ResponseEvent::VersionResponse {
                major: *major,
                minor: *minor,
            }),
            _ => malformed(),
        },
        (FrameKind::Data, data::WIFI_LIST) => match decode_scan_list(&frame.payload) {
            Some(records) => Notification::Response(ResponseEvent::ScanResult(records)),
            None => malformed(),
        },
        (FrameKind::Data, data::ERROR) => match frame.payload.first() {
            Some(&code) => Notification::Response(ResponseEvent::Error(ResponseError::Device(
                DeviceErrorCode::from_u8(code),
            ))),
            None => malformed(),
        },
        (FrameKind::Data, data::CUSTOM_DATA) => {
            Notification::Response(ResponseEvent::CustomDataResponse(frame.payload.clone()))
        }
        (kind, subtype) => Notification::Response(ResponseEvent::Error(
            ResponseError::UnknownType { kind, subtype },
        )),
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn decode_status(payload: &[u8]) -> Option<WifiStatus> {
    let [op_mode, sta_state, softap_conns, fields @ ..] = payload else {
        return None;
    };
    let mut status = WifiStatus::new(
        OpMode::from_u8(*op_mode)?,
        StaConnectionState::from_u8(*sta_state),
        *softap_conns,
    );

    let mut rest = fields;
    while !rest.is_empty() {
        let [subtype, len, tail @ ..] = rest else {
            return None;
        };
        let len = *len as usize;
        if tail.len() < len {
            return None;
        }
        let (value, next) = tail.split_at(len);
        rest = next;

        let byte = || value.first().copied();
        match *subtype {
            data::STA_BSSID => status.sta_bssid = Some(value.try_into().ok()?),
            data::STA_SSID => status.sta_ssid = Some(lossy(value)),
            data::STA_PASSWORD => status.sta_password = Some(lossy(value)),
            data::SOFTAP_SSID => status.softap_ssid = Some(lossy(value)),
            data::SOFTAP_PASSWORD => status.softap_password = Some(lossy(value)),
            data::SOFTAP_AUTH_MODE => {
                status.softap_security = Some(SoftApSecurity::from_u8(byte()?)?);
            }
            data::SOFTAP_MAX_CONNECTIONS => status.softap_max_connections = Some(byte()?),
            data::SOFTAP_CHANNEL => status.softap_channel = Some(byte()?),
            data::STA_MAX_CONN_RETRY => status.max_connection_retry = Some(byte()?),
            data::STA_CONN_END_REASON => status.connection_end_reason = Some(byte()?),
            data::STA_CONN_RSSI => status.rssi = Some(byte()? as i8),
            other => debug!("status report: skipping field {other:#04x}"),
        }
    }
    Some(status)
}

fn decode_scan_list(payload: &[u8]) -> Option<Vec<ScanRecord>> {
    let mut records = Vec::new();
    let mut rest = payload;
    while let [len, tail @ ..] = rest {
        let len = *len as usize;
        if len == 0 || tail.len() < len {
            return None;
        }
        let (entry, next) = tail.split_at(len);
        records.push(ScanRecord {
            rssi: entry[0] as i8,
            ssid: lossy(&entry[1..]),
        });
        rest = next;
    }
    Some(records)
}

// ── Device-side encoding ─────────────────────────────────────

impl WifiStatus {
    /// Wire payload of a Data/WifiConnectionState report.
    ///
    /// Fails if a field does not fit its one-byte length.
    pub fn to_payload(&self) -> Result<Vec<u8>, ResponseError> {
        let mut out = vec![
            self.op_mode as u8,
            self.sta_connection.to_u8(),
            self.softap_connections
        ];
        let fields: [(u8, Option<&[u8]>); 5] = [
            (data::STA_BSSID, self.sta_bssid.as_ref().map(|b| &b[..])),
            (data::STA_SSID, self.sta_ssid.as_deref().map(str::as_bytes)),
            (data::STA_PASSWORD, self.sta_password.as_deref().map(str::as_bytes)),
            (data::SOFTAP_SSID, self.softap_ssid.as_deref().map(str::as_bytes)),
            (data::SOFTAP_PASSWORD, self.softap_password.as_deref().map(str::as_bytes)),
        ];
        for (subtype, value) in fields {
            if let Some(value) = value {
                push_status_field(&mut out, subtype, value)?;
            }
        }
        let bytes = [
            (data::SOFTAP_AUTH_MODE, self.softap_security.map(|sec| sec as u8)),
            (data::SOFTAP_MAX_CONNECTIONS, self.softap_max_connections),
            (data::SOFTAP_CHANNEL, self.softap_channel),
            (data::STA_MAX_CONN_RETRY, self.max_connection_retry),
            (data::STA_CONN_END_REASON, self.connection_end_reason),
            (data::STA_CONN_RSSI, self.rssi.map(|rssi| rssi as u8)),
        ];
        for (subtype, value) in bytes {
            if let Some(value) = value {
                push_status_field(&mut out, subtype, &[value])?;
            }
        }
        Ok(out)
    }
}

fn push_status_field(out: &mut Vec<u8>, subtype: u8, value: &[u8]) -> Result<(), ResponseError> {
    let len = u8::try_from(value.len()).map_err(|_| ResponseError::MalformedPayload {
        subtype: data::WIFI_CONNECTION_STATE,
    })?;
    out.push(subtype);
    out.push(len);
    out.extend_from_slice(value);
    Ok(())
}

/// Wire payload of a Data/WifiList report.
///
/// Fails if an SSID is too long for the one-byte entry length.
pub fn encode_scan_list(records: &[ScanRecord]) -> Result<Vec<u8>, ResponseError> {
    let mut out = Vec::new();
    for r in records {
        let ssid = r.ssid.as_bytes();
        let len = u8::try_from(ssid.len() + 1)
            .map_err(|_| ResponseError::MalformedPayload { subtype: data::WIFI_LIST })?;
        out.push(len);
        out.push(r.rssi as u8);
        out.extend_from_slice(ssid);
    }
    Ok(out)
}

// ── Tests ────────────────────────────────────────────────────
