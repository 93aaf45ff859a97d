//! Mock adapters for integration tests.
//!
//! `MockTransport` records every write and can be told to fail;
//! `ManualClock` is moved by hand; `Harness` wires a session to the
//! in-process device emulator and pumps notifications between them.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use blufi::Transport;
use blufi::clock::Clock;
use blufi::config::SessionConfig;
use blufi::emulator::{DeviceEmulator, DeviceProfile, LoopbackTransport};
use blufi::error::Error;
use blufi::events::{EventQueue, SessionEvent};
use blufi::session::Session;
use futures_lite::future::block_on;

// ── Clock ─────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct ManualClock(Rc<Cell<Duration>>);

#[allow(dead_code)]
impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.0.get()
    }
}

// ── MockTransport ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockError(pub &'static str);

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Transport with no device behind it.
pub struct MockTransport {
    pub sent: Vec<Vec<u8>>,
    pub mtu: usize,
    pub fail_connect: bool,
    pub fail_send: bool,
    pub fail_disconnect: bool,
    pub connects: usize,
    pub disconnects: usize,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            mtu: 20,
            fail_connect: false,
            fail_send: false,
            fail_disconnect: false,
            connects: 0,
            disconnects: 0,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    type Error = MockError;

    async fn connect(&mut self, _device: &str) -> Result<(), Self::Error> {
        if self.fail_connect {
            return Err(MockError("adapter off"));
        }
        self.connects += 1;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.disconnects += 1;
        if self.fail_disconnect {
            return Err(MockError("already gone"));
        }
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        if self.fail_send {
            return Err(MockError("write rejected"));
        }
        self.sent.push(frame.to_vec());
        Ok(())
    }

    fn max_transmission_unit(&self) -> usize {
        self.mtu
    }
}

pub type MockSession = Session<MockTransport, EventQueue, ManualClock>;

#[allow(dead_code)]
pub fn mock_session(config: SessionConfig) -> (MockSession, ManualClock) {
    let clock = ManualClock::new();
    let session = Session::new(MockTransport::new(), EventQueue::new(), clock.clone(), config)
        .expect("valid config");
    (session, clock)
}

/// Configuration without the security handshake.
#[allow(dead_code)]
pub fn insecure() -> SessionConfig {
    SessionConfig {
        auto_negotiate: false,
        require_security: false,
        ..SessionConfig::default()
    }
}

// ── Harness ───────────────────────────────────────────────────

pub struct Harness {
    pub session: Session<LoopbackTransport, EventQueue, ManualClock>,
    pub device: Rc<RefCell<DeviceEmulator>>,
    pub clock: ManualClock,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(config: SessionConfig, profile: DeviceProfile) -> Self {
        Self::with_mtu(config, profile, 20)
    }

    pub fn with_mtu(config: SessionConfig, profile: DeviceProfile, mtu: usize) -> Self {
        let device = Rc::new(RefCell::new(DeviceEmulator::new(profile)));
        let transport = LoopbackTransport::new(Rc::clone(&device)).with_mtu(mtu);
        let clock = ManualClock::new();
        let session = Session::new(transport, EventQueue::new(), clock.clone(), config)
            .expect("valid config");
        Self {
            session,
            device,
            clock,
        }
    }

    /// Connect and complete the handshake.
    pub fn established(profile: DeviceProfile) -> Self {
        let mut h = Self::new(SessionConfig::default(), profile);
        h.connect();
        assert!(h.pump().is_empty());
        h
    }

    pub fn connect(&mut self) {
        block_on(self.session.connect("24:0A:C4:00:00:01")).expect("connect");
    }

    /// Deliver device notifications until both sides are quiet.
    /// Returns the errors `on_receive` reported.
    pub fn pump(&mut self) -> Vec<Error> {
        let mut errors = Vec::new();
        loop {
            let notes = self.session.transport().drain_notifications();
            if notes.is_empty() {
                return errors;
            }
            for n in notes {
                if let Err(e) = block_on(self.session.on_receive(&n)) {
                    errors.push(e);
                }
            }
        }
    }

    pub fn events(&mut self) -> Vec<SessionEvent> {
        self.session.sink_mut().drain()
    }
}
