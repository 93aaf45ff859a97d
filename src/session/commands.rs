//! Outbound commands and the provisioning parameters they carry.
//!
//! [`ConfigureParams`] is validated once at construction and then only
//! read; [`ConfigureParams::messages`] expands it into the frame sequence
//! the device expects.

use heapless::Vec as BoundedVec;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{FrameKind, ctrl, data};

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 64;
/// WPA passphrases are 8..=63 characters (64 for a raw hex PSK).
pub const MIN_WPA_PASSWORD_LEN: usize = 8;
pub const MAX_SOFTAP_CONNECTIONS: u8 = 4;

pub type Ssid = BoundedVec<u8, MAX_SSID_LEN>;
pub type Password = BoundedVec<u8, MAX_PASSWORD_LEN>;

// ── Enumerations ─────────────────────────────────────────────

/// Device Wi-Fi operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpMode {
    Null = 0,
    Station = 1,
    SoftAp = 2,
    StationSoftAp = 3,
}

impl OpMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Null),
            1 => Some(Self::Station),
            2 => Some(Self::SoftAp),
            3 => Some(Self::StationSoftAp),
            _ => None,
        }
    }

    pub fn has_station(self) -> bool {
        matches!(self, Self::Station | Self::StationSoftAp)
    }

    pub fn has_softap(self) -> bool {
        matches!(self, Self::SoftAp | Self::StationSoftAp)
    }
}

/// SoftAP authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SoftApSecurity {
    Open = 0,
    Wep = 1,
    Wpa = 2,
    Wpa2 = 3,
    WpaWpa2 = 4,
}

impl SoftApSecurity {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Open),
            1 => Some(Self::Wep),
            2 => Some(Self::Wpa),
            3 => Some(Self::Wpa2),
            4 => Some(Self::WpaWpa2),
            _ => None,
        }
    }
}

// ── Outbound message ─────────────────────────────────────────

/// One logical message before framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub kind: FrameKind,
    pub subtype: u8,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    pub fn control(subtype: u8, payload: &[u8]) -> Self {
        Self {
            kind: FrameKind::Control,
            subtype,
            payload: payload.to_vec(),
        }
    }

    pub fn data(subtype: u8, payload: &[u8]) -> Self {
        Self {
            kind: FrameKind::Data,
            subtype,
            payload: payload.to_vec(),
        }
    }
}

// ── Parameters ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationParams {
    pub ssid: Ssid,
    pub password: Password,
    pub bssid: Option<[u8; 6]>,
}

impl StationParams {
    pub fn new(ssid: impl AsRef<[u8]>, password: impl AsRef<[u8]>) -> Result<Self> {
        Ok(Self {
            ssid: ssid_from(ssid.as_ref())?,
            password: password_from(password.as_ref())?,
            bssid: None,
        })
    }

    /// Pin the connection to one access point.
    pub fn with_bssid(mut self, bssid: [u8; 6]) -> Self {
        self.bssid = Some(bssid);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftApParams {
    pub ssid: Ssid,
    pub password: Password,
    pub channel: u8,
    pub max_connections: u8,
    pub security: SoftApSecurity,
}

impl SoftApParams {
    pub fn new(
        ssid: impl AsRef<[u8]>,
        password: impl AsRef<[u8]>,
        channel: u8,
        max_connections: u8,
        security: SoftApSecurity,
    ) -> Result<Self> {
        let password = password_from(password.as_ref())?;
        match security {
            SoftApSecurity::Open if !password.is_empty() => {
                return Err(Error::InvalidParams("open SoftAP takes no password"));
            }
            SoftApSecurity::Wpa | SoftApSecurity::Wpa2 | SoftApSecurity::WpaWpa2
                if password.len() < MIN_WPA_PASSWORD_LEN =>
            {
                return Err(Error::InvalidParams("SoftAP password shorter than 8 bytes"));
            }
            SoftApSecurity::Wep if password.is_empty() => {
                return Err(Error::InvalidParams("WEP SoftAP needs a password"));
            }
            _ => {}
        }
        if !(1..=14).contains(&channel) {
            return Err(Error::InvalidParams("SoftAP channel must be 1..=14"));
        }
        if !(1..=MAX_SOFTAP_CONNECTIONS).contains(&max_connections) {
            return Err(Error::InvalidParams("SoftAP max connections must be 1..=4"));
        }
        Ok(Self {
            ssid: ssid_from(ssid.as_ref())?,
            password,
            channel,
            max_connections,
            security,
        })
    }
}

/// Immutable provisioning request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureParams {
    op_mode: OpMode,
    station: Option<StationParams>,
    softap: Option<SoftApParams>,
}

impl ConfigureParams {
    /// Join an access point as a station.
    pub fn station(ssid: impl AsRef<[u8]>, password: impl AsRef<[u8]>) -> Result<Self> {
        Ok(Self::from_station(StationParams::new(ssid, password)?))
    }

    pub fn from_station(station: StationParams) -> Self {
        Self {
            op_mode: OpMode::Station,
            station: Some(station),
            softap: None,
        }
    }

    pub fn softap(softap: SoftApParams) -> Self {
        Self {
            op_mode: OpMode::SoftAp,
            station: None,
            softap: Some(softap),
        }
    }

    pub fn station_softap(station: StationParams, softap: SoftApParams) -> Self {
        Self {
            op_mode: OpMode::StationSoftAp,
            station: Some(station),
            softap: Some(softap),
        }
    }

    /// Switch Wi-Fi off.
    pub fn null() -> Self {
        Self {
            op_mode: OpMode::Null,
            station: None,
            softap: None,
        }
    }

    pub fn op_mode(&self) -> OpMode {
        self.op_mode
    }

    pub fn station_params(&self) -> Option<&StationParams> {
        self.station.as_ref()
    }

    pub fn softap_params(&self) -> Option<&SoftApParams> {
        self.softap.as_ref()
    }

    /// Messages to post, in order.
    ///
    /// Station modes end the station block with `ConnectWifi`, after which
    /// the device reports its connection state on its own. Modes without a
    /// station end with `GetWifiStatus` to solicit that report.
    pub fn messages(&self) -> Vec<OutboundMessage> {
        let mut out = vec![OutboundMessage::control(
            ctrl::SET_OP_MODE,
            &[self.op_mode as u8]
        )];

        if let Some(sta) = &self.station {
            if let Some(bssid) = &sta.bssid {
                out.push(OutboundMessage::data(data::STA_BSSID, bssid));
            }
            out.push(OutboundMessage::data(data::STA_SSID, &sta.ssid));
            out.push(OutboundMessage::data(data::STA_PASSWORD, &sta.password));
            out.push(OutboundMessage::control(ctrl::CONNECT_WIFI, &[]));
        }

        if let Some(ap) = &self.softap {
            out.push(OutboundMessage::data(data::SOFTAP_AUTH_MODE, &[ap.security as u8]));
            out.push(OutboundMessage::data(data::SOFTAP_CHANNEL, &[ap.channel]));
            out.push(OutboundMessage::data(data::SOFTAP_MAX_CONNECTIONS, &[ap.max_connections]));
            out.push(OutboundMessage::data(data::SOFTAP_SSID, &ap.ssid));
            if !ap.password.is_empty() {
                out.push(OutboundMessage::data(data::SOFTAP_PASSWORD, &ap.password));
            }
        }

        if !self.op_mode.has_station() {
            out.push(OutboundMessage::control(ctrl::GET_WIFI_STATUS, &[]));
        }
        out
    }
}

fn ssid_from(bytes: &[u8]) -> Result<Ssid> {
    if bytes.is_empty() {
        return Err(Error::InvalidParams("SSID is empty"));
    }
    Ssid::from_slice(bytes).map_err(|()| Error::InvalidParams("SSID longer than 32 bytes"))
}

fn password_from(bytes: &[u8]) -> Result<Password> {
    Password::from_slice(bytes).map_err(|()| Error::InvalidParams("password longer than 64 bytes"))
}

// ── Tests ────────────────────────────────────────────────────
