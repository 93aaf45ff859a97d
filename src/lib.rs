//! BluFi provisioning client engine.
//!
//! Talks to an ESP32 running the BluFi GATT service: frames and fragments
//! messages, negotiates session keys over Diffie-Hellman, encrypts with
//! AES-128-CFB and drives the connect → negotiate → configure lifecycle.
//! The BLE stack itself stays outside; the session sees it only through
//! the [`Transport`] port.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Host adapters (outer ring)                │
//! │   Transport (BLE GATT)   EventSink (queue/log/channel)  Clock│
//! │  ─────────────────── Port Trait Boundary ─────────────────── │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                 Session (pure logic)                   │  │
//! │  │  protocol · security · pending requests · responses    │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![deny(unused_must_use)]

pub mod clock;
pub mod config;
pub mod emulator;
pub mod error;
pub mod events;
pub mod protocol;
pub mod response;
pub mod security;
pub mod session;
pub mod transport;

pub use clock::{Clock, MonotonicClock};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use events::{EventQueue, EventSink, SessionEvent};
pub use response::ResponseEvent;
pub use session::{ConfigureParams, Session, SessionState};
pub use transport::Transport;
