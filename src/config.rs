//! Session configuration parameters
//!
//! All tunable parameters of a BluFi client session. Loadable from JSON;
//! missing fields take the defaults below.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{DEFAULT_PACKAGE_LENGTH, MAX_PACKAGE_LENGTH, MIN_PACKAGE_LENGTH};
use crate::security::{DhGroup, SecurityMode};

/// What to do with a command whose exchange kind is already pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Send it anyway; responses complete pending requests oldest first.
    #[default]
    Queue,
    /// Reject with `Error::Busy`.
    Fail,
}

/// Hex-encoded DH group parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhGroupConfig {
    pub prime_hex: String,
    pub generator_hex: String,
}

/// Core session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    // --- Framing ---
    /// Upper bound for one GATT write, before the transport MTU is applied
    pub package_length_limit: usize,

    // --- Timeouts ---
    /// Status, version, scan and custom-data requests (milliseconds)
    pub request_timeout_ms: u64,
    /// Configure: waiting for the connection report (milliseconds)
    pub configure_timeout_ms: u64,
    /// Whole security negotiation (milliseconds)
    pub negotiation_timeout_ms: u64,

    // --- Behaviour ---
    pub busy_policy: BusyPolicy,
    /// Start negotiation as soon as the link is up
    pub auto_negotiate: bool,
    /// Reject commands until security is established
    pub require_security: bool,
    /// Ask the device to ack custom data
    pub require_ack: bool,

    // --- Security ---
    pub security_mode: SecurityMode,
    /// `None` selects the default 1024-bit group
    pub dh_group: Option<DhGroupConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            // Framing
            package_length_limit: DEFAULT_PACKAGE_LENGTH, // ATT MTU 23 - 3

            // Timeouts
            request_timeout_ms: 5_000,
            configure_timeout_ms: 30_000, // AP association + DHCP
            negotiation_timeout_ms: 10_000,

            // Behaviour
            busy_policy: BusyPolicy::Queue,
            auto_negotiate: true,
            require_security: true,
            require_ack: false,

            // Security
            security_mode: SecurityMode::default(),
            dh_group: None,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|_| Error::Config("malformed JSON"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no session can work with.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_PACKAGE_LENGTH..=MAX_PACKAGE_LENGTH).contains(&self.package_length_limit) {
            return Err(Error::Config("package_length_limit must be 9..=261"));
        }
        if self.request_timeout_ms == 0
            || self.configure_timeout_ms == 0
            || self.negotiation_timeout_ms == 0
        {
            return Err(Error::Config("timeouts must be non-zero"));
        }
        self.dh_group()?;
        Ok(())
    }

    /// The DH group to negotiate with.
    pub fn dh_group(&self) -> Result<DhGroup> {
        match &self.dh_group {
            None => Ok(DhGroup::default()),
            Some(cfg) => DhGroup::from_hex(&cfg.prime_hex, &cfg.generator_hex)
                .map_err(|_| Error::Config("invalid dh_group")),
        }
    }
}
