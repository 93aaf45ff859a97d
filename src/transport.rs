//! Transport abstraction: one BLE GATT link to a BluFi device.
//!
//! ```text
//!   Session ──send──▶ Transport ──GATT write──▶ device
//!   Session ◀──on_receive── host ◀──GATT notify── device
//! ```
//!
//! The session is generic over `Transport`, so the BLE stack (btleplug,
//! CoreBluetooth, Android) stays outside this crate. Inbound traffic is not
//! pulled through the trait: the host forwards each notification to
//! [`Session::on_receive`](crate::session::Session::on_receive) in order.

use core::fmt::Display;

use crate::protocol::DEFAULT_PACKAGE_LENGTH;

/// Write side of a GATT link.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Error type for this transport.
    type Error: Display;

    /// Open a link to `device` (address or platform identifier) and
    /// subscribe to notifications.
    async fn connect(&mut self, device: &str) -> Result<(), Self::Error>;

    /// Close the link. Closing an already closed link is not an error.
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Write one frame to the device's write characteristic.
    async fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Largest single write the link accepts (ATT MTU minus 3).
    fn max_transmission_unit(&self) -> usize;
}

/// A transport that accepts every write and never fails.
/// Useful for exercising the session without a device.
#[derive(Debug, Default)]
pub struct NullTransport {
    connected: bool,
    sent: usize,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Number of frames written since creation.
    pub fn frames_sent(&self) -> usize {
        self.sent
    }
}

impl Transport for NullTransport {
    type Error = core::convert::Infallible;

    async fn connect(&mut self, _device: &str) -> Result<(), Self::Error> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        Ok(())
    }

    async fn send(&mut self, _frame: &[u8]) -> Result<(), Self::Error> {
        self.sent += 1;
        Ok(())
    }

    fn max_transmission_unit(&self) -> usize {
        DEFAULT_PACKAGE_LENGTH
    }
}
