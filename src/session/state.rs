//! Session lifecycle states and command admission.
//!
//! ```text
//! Disconnected ─▶ Connecting ─▶ Ready ⇄ SecurityNegotiating
//!                                 ⇅
//!                            Configuring
//!
//! any ─▶ Closing ─▶ Disconnected        any ─▶ Error
//! ```

use crate::error::Error;
use crate::security::SecurityState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Connecting = 1,
    SecurityNegotiating = 2,
    Ready = 3,
    Configuring = 4,
    Closing = 5,
    Error = 6,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::SecurityNegotiating => "SecurityNegotiating",
            Self::Ready => "Ready",
            Self::Configuring => "Configuring",
            Self::Closing => "Closing",
            Self::Error => "Error",
        }
    }

    /// Gate for every device command (configure, queries, custom data).
    pub fn admit_command(
        self,
        security: SecurityState,
        require_security: bool,
    ) -> Result<(), Error> {
        match self {
            Self::Ready | Self::Configuring => {
                if require_security && security != SecurityState::Established {
                    Err(Error::SecurityNotEstablished)
                } else {
                    Ok(())
                }
            }
            Self::SecurityNegotiating => Err(Error::SecurityNotEstablished),
            Self::Disconnected | Self::Connecting | Self::Closing => Err(Error::NotConnected),
            Self::Error => Err(Error::InvalidState(self)),
        }
    }

    /// Gate for starting a negotiation.
    pub fn admit_negotiation(self) -> Result<(), Error> {
        match self {
            Self::Ready | Self::Error => Ok(()),
            Self::SecurityNegotiating | Self::Configuring => Err(Error::InvalidState(self)),
            Self::Disconnected | Self::Connecting | Self::Closing => Err(Error::NotConnected),
        }
    }
}

impl core::fmt::Display for SessionState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
