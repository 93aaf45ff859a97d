//! Provision a Wi-Fi station against the in-process device emulator.
//!
//! cargo run --example provision -- [ssid] [password]
//!
//! Runs the whole client lifecycle (connect, negotiate, scan, configure,
//! disconnect) with every session event written to stderr. Set `RUST_LOG`
//! to change the level.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use blufi::emulator::{DeviceEmulator, DeviceProfile, LoopbackTransport};
use blufi::events::LogEventSink;
use blufi::response::ScanRecord;
use blufi::{ConfigureParams, MonotonicClock, Session, SessionConfig, SessionState};
use futures_lite::future::block_on;
use log::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let ssid = args.next().unwrap_or_else(|| "lab-net".into());
    let password = args.next().unwrap_or_else(|| "hunter22".into());

    let device = Rc::new(RefCell::new(DeviceEmulator::new(DeviceProfile {
        access_points: vec![
            ScanRecord { ssid: ssid.clone(), rssi: -48 },
            ScanRecord { ssid: "guest".into(), rssi: -77 },
        ],
        ..DeviceProfile::default()
    })));
    let transport = LoopbackTransport::new(Rc::clone(&device));
    let config = SessionConfig::from_json(r#"{"require_ack": true}"#)?;
    let mut session = Session::new(transport, LogEventSink::new(), MonotonicClock::new(), config)?;

    block_on(async {
        session.connect("24:0A:C4:00:00:01").await?;
        pump(&mut session).await?;
        info!("link up, {} bytes per frame", session.package_limit());
        if session.state() != SessionState::Ready {
            bail!("handshake did not complete ({})", session.state());
        }

        session.request_device_version().await?;
        session.request_scan().await?;
        pump(&mut session).await?;

        let params = ConfigureParams::station(&ssid, &password).context("invalid credentials")?;
        session.configure(&params).await?;
        pump(&mut session).await?;

        session.post_custom_data(b"hello from the host").await?;
        pump(&mut session).await?;

        for kind in session.poll_timeouts() {
            info!("still waiting on {kind:?}");
        }
        session.disconnect().await?;
        Ok::<(), anyhow::Error>(())
    })?;

    let dev = device.borrow();
    info!(
        "device now holds ssid={:?} password set={}",
        dev.provisioned().sta_ssid,
        dev.provisioned().sta_password.is_some()
    );
    Ok(())
}

/// Forward device notifications until both sides are idle.
async fn pump(session: &mut Session<LoopbackTransport, LogEventSink, MonotonicClock>) -> Result<()> {
    loop {
        let notes = session.transport().drain_notifications();
        if notes.is_empty() {
            return Ok(());
        }
        for n in notes {
            session.on_receive(&n).await?;
        }
    }
}
