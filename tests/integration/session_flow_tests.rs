//! End-to-end session flows against the device emulator and mock transport.

use std::time::Duration;

use blufi::config::{BusyPolicy, SessionConfig};
use blufi::emulator::DeviceProfile;
use blufi::error::{Error, SecurityError};
use blufi::events::SessionEvent;
use blufi::protocol::{Direction, FrameEncoder, FrameKind, FrameOptions, NoCipher, ctrl, data};
use blufi::response::{
    DeviceErrorCode, ResponseError, ResponseEvent, ScanRecord, StaConnectionState,
};
use blufi::security::SecurityState;
use blufi::session::{
    ConfigureParams, ExchangeKind, OpMode, SessionState, SoftApParams, SoftApSecurity,
};
use futures_lite::future::block_on;

use crate::mock_transport::{Harness, insecure, mock_session};

fn responses(events: &[SessionEvent]) -> Vec<&ResponseEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Response(r) => Some(r),
            _ => None,
        })
        .collect()
}

fn states(events: &[SessionEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

// ── Handshake and provisioning ────────────────────────────────

#[test]
fn connect_negotiate_and_configure_station() {
    let mut h = Harness::new(SessionConfig::default(), DeviceProfile::default());
    h.connect();
    assert_eq!(h.session.state(), SessionState::SecurityNegotiating);
    assert!(h.pump().is_empty());

    assert_eq!(h.session.state(), SessionState::Ready);
    assert_eq!(h.session.security_state(), SecurityState::Established);
    let events = h.events();
    assert_eq!(
        states(&events),
        vec![
            SessionState::Connecting,
            SessionState::Ready,
            SessionState::SecurityNegotiating,
            SessionState::Ready,
        ]
    );
    let fingerprint = h.session.fingerprint().unwrap();
    assert!(events.contains(&SessionEvent::SecurityEstablished { fingerprint }));

    let params = ConfigureParams::station("lab-net", "hunter2").unwrap();
    block_on(h.session.configure(&params)).unwrap();
    assert_eq!(h.session.state(), SessionState::Configuring);
    assert!(h.pump().is_empty());

    assert_eq!(h.session.state(), SessionState::Ready);
    assert_eq!(h.session.pending_len(), 0);
    {
        let dev = h.device.borrow();
        let p = dev.provisioned();
        assert_eq!(p.op_mode, Some(OpMode::Station));
        assert_eq!(p.sta_ssid.as_deref(), Some("lab-net"));
        assert_eq!(p.sta_password.as_deref(), Some("hunter2"));
    }

    let events = h.events();
    assert_eq!(events.first(), Some(&SessionEvent::StateChanged {
        from: SessionState::Ready,
        to: SessionState::Configuring,
    }));
    assert!(events.contains(&SessionEvent::ConfigurePosted));
    let got = responses(&events);
    let [ResponseEvent::StatusResponse(status)] = got[..] else {
        panic!("expected one status report, got {events:?}");
    };
    assert_eq!(status.op_mode, OpMode::Station);
    assert!(status.is_sta_connected());
    assert_eq!(status.sta_ssid.as_deref(), Some("lab-net"));
}

#[test]
fn failed_station_connection_is_reported_not_fatal() {
    let mut h = Harness::established(DeviceProfile {
        connect_outcome: StaConnectionState::Failed,
        ..DeviceProfile::default()
    });
    h.events();

    let params = ConfigureParams::station("lab-net", "wrong-password").unwrap();
    block_on(h.session.configure(&params)).unwrap();
    h.pump();
    assert_eq!(h.session.state(), SessionState::Ready);
    let events = h.events();
    let got = responses(&events);
    let [ResponseEvent::StatusResponse(status)] = got[..] else {
        panic!("expected status");
    };
    assert_eq!(status.sta_connection, StaConnectionState::Failed);
}

#[test]
fn softap_configure_completes_on_status_report() {
    let mut h = Harness::established(DeviceProfile::default());
    let ap = SoftApParams::new("blufi-ap", "12345678", 6, 3, SoftApSecurity::Wpa2).unwrap();
    block_on(h.session.configure(&ConfigureParams::softap(ap))).unwrap();
    h.pump();

    assert_eq!(h.session.state(), SessionState::Ready);
    let dev = h.device.borrow();
    let p = dev.provisioned();
    assert_eq!(p.softap_ssid.as_deref(), Some("blufi-ap"));
    assert_eq!(p.softap_password.as_deref(), Some("12345678"));
    assert_eq!(p.softap_channel, Some(6));
    assert_eq!(p.softap_max_connections, Some(3));
    assert_eq!(p.softap_security, Some(SoftApSecurity::Wpa2));
}

#[test]
fn status_query_during_configure_does_not_complete_it() {
    let mut h = Harness::established(DeviceProfile::default());
    h.events();

    let params = ConfigureParams::station("lab-net", "hunter2").unwrap();
    block_on(async {
        h.session.configure(&params).await.unwrap();
        h.session.request_device_status().await.unwrap();
    });
    assert_eq!(h.session.pending_len(), 2);

    // The query is answered at once, mid-attempt; the outcome follows.
    let notes = h.session.transport().drain_notifications();
    let mut seen = Vec::new();
    for n in notes {
        block_on(h.session.on_receive(&n)).unwrap();
        seen.push((h.session.pending_len(), h.session.state()));
    }
    assert!(seen.contains(&(1, SessionState::Configuring)));
    assert_eq!(seen.last(), Some(&(0, SessionState::Ready)));

    let events = h.events();
    let got = responses(&events);
    let [ResponseEvent::StatusResponse(query), ResponseEvent::StatusResponse(outcome)] = got[..]
    else {
        panic!("expected two status reports, got {events:?}");
    };
    assert_eq!(query.sta_connection, StaConnectionState::Connecting);
    assert_eq!(outcome.sta_connection, StaConnectionState::Connected);
}

// ── Queries ───────────────────────────────────────────────────

#[test]
fn version_status_and_scan_queries() {
    let mut h = Harness::established(DeviceProfile {
        version: (1, 4),
        access_points: vec![
            ScanRecord { ssid: "lab-net".into(), rssi: -45 },
            ScanRecord { ssid: "guest".into(), rssi: -80 },
        ],
        ..DeviceProfile::default()
    });
    h.events();

    block_on(async {
        h.session.request_device_version().await.unwrap();
        h.session.request_device_status().await.unwrap();
        h.session.request_scan().await.unwrap();
    });
    assert_eq!(h.session.pending_len(), 3);
    h.pump();
    assert_eq!(h.session.pending_len(), 0);

    let events = h.events();
    let got = responses(&events);
    assert_eq!(got.len(), 3);
    assert_eq!(got[0], &ResponseEvent::VersionResponse { major: 1, minor: 4 });
    assert!(matches!(got[1], ResponseEvent::StatusResponse(s) if s.op_mode == OpMode::Null));
    let ResponseEvent::ScanResult(records) = got[2] else {
        panic!("expected scan result");
    };
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].ssid, "lab-net");
    assert_eq!(records[1].rssi, -80);
}

#[test]
fn scan_error_clears_pending_scan() {
    let mut h = Harness::established(DeviceProfile {
        scan_fails: true,
        ..DeviceProfile::default()
    });
    h.events();
    block_on(h.session.request_scan()).unwrap();
    h.pump();

    assert_eq!(h.session.pending_len(), 0);
    assert_eq!(h.session.state(), SessionState::Ready);
    assert_eq!(
        h.events(),
        vec![SessionEvent::Response(ResponseEvent::Error(ResponseError::Device(
            DeviceErrorCode::WifiScan
        )))]
    );
}

#[test]
fn unsolicited_reply_is_dropped() {
    let mut h = Harness::established(DeviceProfile::default());
    h.events();
    h.device
        .borrow_mut()
        .push_notification(FrameKind::Data, data::VERSION, &[9, 9]);
    assert!(h.pump().is_empty());
    assert!(h.events().is_empty());
    assert_eq!(h.session.state(), SessionState::Ready);
}

#[test]
fn custom_data_with_ack_round_trip() {
    let config = SessionConfig {
        require_ack: true,
        ..SessionConfig::default()
    };
    let mut h = Harness::new(config, DeviceProfile::default());
    h.connect();
    h.pump();
    h.events();

    block_on(h.session.post_custom_data(b"hello device")).unwrap();
    assert_eq!(h.session.pending_len(), 1);
    h.pump();
    assert_eq!(h.session.pending_len(), 0);
    assert_eq!(
        h.events(),
        vec![
            SessionEvent::CustomDataPosted,
            SessionEvent::Response(ResponseEvent::CustomDataResponse(b"hello device".to_vec())),
        ]
    );
    assert_eq!(h.device.borrow().custom_data(), &[b"hello device".to_vec()]);
}

#[test]
fn large_custom_data_is_fragmented() {
    let mut h = Harness::established(DeviceProfile::default());
    let blob: Vec<u8> = (0..=255u8).cycle().take(700).collect();
    let before = h.session.transport().sent().len();
    block_on(h.session.post_custom_data(&blob)).unwrap();
    assert!(h.session.transport().sent().len() - before > 40);
    h.pump();
    assert_eq!(h.device.borrow().custom_data(), &[blob]);
}

#[test]
fn package_limit_follows_transport_mtu() {
    let config = SessionConfig {
        package_length_limit: 128,
        ..SessionConfig::default()
    };
    let mut h = Harness::with_mtu(config, DeviceProfile::default(), 64);
    h.connect();
    assert_eq!(h.session.package_limit(), 64);
    assert!(h.session.transport().sent().iter().all(|f| f.len() <= 64));
    h.pump();
    assert_eq!(h.session.security_state(), SecurityState::Established);
}

// ── Admission ─────────────────────────────────────────────────

#[test]
fn commands_rejected_while_negotiating() {
    let mut h = Harness::new(SessionConfig::default(), DeviceProfile::default());
    h.connect();
    let params = ConfigureParams::station("lab-net", "hunter2").unwrap();

    block_on(async {
        assert_eq!(
            h.session.configure(&params).await,
            Err(Error::SecurityNotEstablished)
        );
        assert_eq!(
            h.session.request_device_version().await,
            Err(Error::SecurityNotEstablished)
        );
        assert_eq!(
            h.session.negotiate_security().await,
            Err(Error::InvalidState(SessionState::SecurityNegotiating))
        );
    });
    assert_eq!(h.session.state(), SessionState::SecurityNegotiating);
}

#[test]
fn commands_rejected_when_disconnected() {
    let (mut s, _clock) = mock_session(insecure());
    block_on(async {
        assert_eq!(s.request_scan().await, Err(Error::NotConnected));
        assert_eq!(s.negotiate_security().await, Err(Error::NotConnected));
    });
    assert!(s.transport().sent.is_empty());
}

#[test]
fn busy_policy_queue_and_fail() {
    let mut h = Harness::established(DeviceProfile::default());
    h.events();
    block_on(async {
        h.session.request_device_status().await.unwrap();
        h.session.request_device_status().await.unwrap();
    });
    h.pump();
    assert_eq!(responses(&h.events()).len(), 2);

    let config = SessionConfig {
        busy_policy: BusyPolicy::Fail,
        ..insecure()
    };
    let (mut s, _clock) = mock_session(config);
    block_on(async {
        s.connect("dev").await.unwrap();
        s.request_scan().await.unwrap();
        assert_eq!(s.request_scan().await, Err(Error::Busy(ExchangeKind::Scan)));
    });
}

// ── Timeouts ──────────────────────────────────────────────────

#[test]
fn configure_timeout_returns_to_ready() {
    let (mut s, clock) = mock_session(insecure());
    let params = ConfigureParams::station("lab-net", "hunter2").unwrap();
    block_on(async {
        s.connect("dev").await.unwrap();
        s.configure(&params).await.unwrap();
    });
    assert_eq!(s.state(), SessionState::Configuring);
    s.sink_mut().drain();

    clock.advance(Duration::from_millis(29_999));
    assert!(s.poll_timeouts().is_empty());
    clock.advance(Duration::from_millis(1));
    assert_eq!(s.poll_timeouts(), vec![ExchangeKind::Configure]);
    assert_eq!(s.state(), SessionState::Ready);
    assert_eq!(
        s.sink_mut().drain(),
        vec![
            SessionEvent::StateChanged {
                from: SessionState::Configuring,
                to: SessionState::Ready
            },
            SessionEvent::Error(Error::Timeout(ExchangeKind::Configure)),
        ]
    );
}

#[test]
fn silent_device_times_out_negotiation_then_retry_succeeds() {
    let mut h = Harness::new(
        SessionConfig::default(),
        DeviceProfile {
            ignore_negotiation: true,
            ..DeviceProfile::default()
        },
    );
    h.connect();
    h.pump();
    assert_eq!(h.session.state(), SessionState::SecurityNegotiating);

    h.clock.advance(Duration::from_secs(10));
    assert_eq!(h.session.poll_timeouts(), vec![ExchangeKind::Negotiate]);
    assert_eq!(h.session.state(), SessionState::Ready);
    assert_eq!(h.session.security_state(), SecurityState::Uninitialized);

    h.device.borrow_mut().profile_mut().ignore_negotiation = false;
    block_on(h.session.negotiate_security()).unwrap();
    h.pump();
    assert_eq!(h.session.security_state(), SecurityState::Established);
}

// ── Failures and teardown ─────────────────────────────────────

#[test]
fn device_rejecting_negotiation_fails_security() {
    let mut h = Harness::new(
        SessionConfig::default(),
        DeviceProfile {
            reject_negotiation: Some(DeviceErrorCode::DhParam),
            ..DeviceProfile::default()
        },
    );
    h.connect();
    h.pump();

    assert_eq!(h.session.state(), SessionState::Error);
    assert_eq!(h.session.security_state(), SecurityState::Failed);
    assert_eq!(h.session.pending_len(), 0);
    let events = h.events();
    assert!(events.contains(&SessionEvent::SecurityFailed(SecurityError::DeviceRejected(6))));
    assert!(events.contains(&SessionEvent::Response(ResponseEvent::Error(
        ResponseError::Device(DeviceErrorCode::DhParam)
    ))));

    // Retry from Error once the device cooperates.
    h.device.borrow_mut().profile_mut().reject_negotiation = None;
    block_on(h.session.negotiate_security()).unwrap();
    h.pump();
    assert_eq!(h.session.state(), SessionState::Ready);
    assert_eq!(h.session.security_state(), SecurityState::Established);
}

#[test]
fn write_failure_moves_to_error() {
    let mut h = Harness::established(DeviceProfile::default());
    h.events();
    h.session.transport_mut().set_fail_writes(true);

    let err = block_on(h.session.request_device_version()).unwrap_err();
    assert_eq!(err, Error::Transport("GATT write failed".into()));
    assert_eq!(h.session.state(), SessionState::Error);
    assert!(h.events().contains(&SessionEvent::Error(err)));
}

#[test]
fn connect_failure_then_disconnect_recovers() {
    let (mut s, _clock) = mock_session(insecure());
    s.transport_mut().fail_connect = true;
    let err = block_on(s.connect("dev")).unwrap_err();
    assert_eq!(err, Error::Transport("adapter off".into()));
    assert_eq!(s.state(), SessionState::Error);
    assert_eq!(
        block_on(s.connect("dev")),
        Err(Error::InvalidState(SessionState::Error))
    );

    block_on(s.disconnect()).unwrap();
    assert_eq!(s.state(), SessionState::Disconnected);
    s.transport_mut().fail_connect = false;
    block_on(s.connect("dev")).unwrap();
    assert_eq!(s.state(), SessionState::Ready);
}

#[test]
fn disconnect_is_idempotent_and_cancels_pending() {
    let mut h = Harness::established(DeviceProfile::default());
    block_on(h.session.request_scan()).unwrap();
    h.events();

    block_on(h.session.disconnect()).unwrap();
    assert!(h.device.borrow().close_requested());
    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert_eq!(h.session.security_state(), SecurityState::Uninitialized);
    assert_eq!(h.session.fingerprint(), None);
    assert_eq!(
        h.events(),
        vec![
            SessionEvent::StateChanged {
                from: SessionState::Ready,
                to: SessionState::Closing
            },
            SessionEvent::RequestCancelled(ExchangeKind::Scan),
            SessionEvent::StateChanged {
                from: SessionState::Closing,
                to: SessionState::Disconnected
            },
            SessionEvent::Disconnected,
        ]
    );

    block_on(h.session.disconnect()).unwrap();
    assert!(h.events().is_empty());
}

#[test]
fn disconnect_reports_transport_error_but_still_closes() {
    let (mut s, _clock) = mock_session(insecure());
    block_on(s.connect("dev")).unwrap();
    s.transport_mut().fail_disconnect = true;
    assert_eq!(
        block_on(s.disconnect()),
        Err(Error::Transport("already gone".into()))
    );
    assert_eq!(s.state(), SessionState::Disconnected);
    // Close-connection frame went out first.
    let last = s.transport().sent.last().unwrap();
    assert_eq!(last[0], blufi::protocol::type_byte(FrameKind::Control, ctrl::CLOSE_CONNECTION));
}

#[test]
fn reconnect_restarts_sequence_numbers() {
    let mut h = Harness::established(DeviceProfile::default());
    block_on(h.session.disconnect()).unwrap();
    h.connect();
    let sent = h.session.transport().sent();
    let first_after_reconnect = sent.iter().rev().find(|f| f[2] == 0);
    assert!(first_after_reconnect.is_some());
    h.pump();
    assert_eq!(h.session.security_state(), SecurityState::Established);
}

#[test]
fn garbage_notification_is_reported_and_session_continues() {
    let (mut s, _clock) = mock_session(insecure());
    block_on(s.connect("dev")).unwrap();
    s.sink_mut().drain();

    // Wrong direction bit: a client frame echoed back.
    let mut enc = FrameEncoder::new(Direction::Outbound, 20);
    let echoed = enc
        .encode(FrameKind::Data, data::VERSION, FrameOptions::PLAIN, &[1, 2], &NoCipher)
        .unwrap();
    let err = block_on(s.on_receive(&echoed[0])).unwrap_err();
    assert!(matches!(err, Error::Codec(_)));
    assert_eq!(s.state(), SessionState::Ready);

    block_on(s.request_device_version()).unwrap();
    let mut dev = FrameEncoder::new(Direction::Inbound, 20);
    let reply = dev
        .encode(FrameKind::Data, data::VERSION, FrameOptions::PLAIN, &[1, 2], &NoCipher)
        .unwrap();
    block_on(s.on_receive(&reply[0])).unwrap();
    assert!(s
        .sink()
        .iter()
        .any(|e| *e == SessionEvent::Response(ResponseEvent::VersionResponse { major: 1, minor: 2 })));
}
