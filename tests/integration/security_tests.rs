//! Integration tests for the security handshake and what it protects.

use blufi::config::SessionConfig;
use blufi::emulator::DeviceProfile;
use blufi::events::{ChannelSink, EventChannel, SessionEvent};
use blufi::protocol::{FrameControl, FrameKind, ctrl, data, type_byte};
use blufi::security::{DhGroup, FrameCipher, SecurityMode, SecurityState};
use blufi::session::{ConfigureParams, Session, SessionState};
use futures_lite::future::block_on;

use crate::mock_transport::{Harness, ManualClock};

fn frames_of(sent: &[Vec<u8>], kind: FrameKind, subtype: u8) -> Vec<&Vec<u8>> {
    let ty = type_byte(kind, subtype);
    sent.iter().filter(|f| f[0] == ty).collect()
}

#[test]
fn both_sides_derive_the_same_keys() {
    let h = Harness::established(DeviceProfile::default());
    let client = h.session.fingerprint();
    assert!(client.is_some());
    assert_eq!(client, h.device.borrow().fingerprint());
    assert_eq!(h.device.borrow().security_mode(), Some(SecurityMode::default()));
}

/// Reference vectors for the default group, computed independently of this
/// crate. The device's secret has a leading zero byte, so it is 127 bytes
/// long and the AES key is MD5 over those 127 bytes.
#[test]
fn default_group_known_answer() {
    let group = DhGroup::default();
    let client_private: Vec<u8> = (0x01..=0x10).collect();
    let mut device_private: Vec<u8> = (0x21..=0x30).collect();
    device_private[15] = 0x51;

    let client = group.key_pair_from_private(&client_private).unwrap();
    let device = group.key_pair_from_private(&device_private).unwrap();
    let secret = client.compute_shared_secret(&group, device.public_key()).unwrap();
    assert_eq!(*secret, *device.compute_shared_secret(&group, client.public_key()).unwrap());

    assert_eq!(secret.len(), 127);
    assert_eq!(&secret[..4], &[0x94, 0xe1, 0x97, 0xe0]);
    assert_eq!(&secret[123..], &[0x55, 0x7b, 0x8b, 0x36]);

    let md5_key = [
        0x05, 0xb6, 0x82, 0x61, 0x25, 0x3b, 0xa6, 0x8b, 0x8e, 0x90, 0x55, 0x2f, 0x9f, 0xdd, 0x86,
        0x9c,
    ];
    let expected = [0xed, 0xe4, 0xa1, 0x35, 0x2c, 0xc2, 0xad];
    for cipher in [FrameCipher::from_shared_secret(&secret), FrameCipher::new(md5_key)] {
        let mut buf = *b"hunter2";
        cipher.encrypt(5, &mut buf);
        assert_eq!(buf, expected);
    }
}

#[test]
fn negotiation_is_plain_and_security_mode_is_checksummed() {
    let h = Harness::established(DeviceProfile::default());
    let sent = h.session.transport().sent();

    let negotiate = frames_of(sent, FrameKind::Data, data::NEGOTIATE);
    assert!(negotiate.len() > 2);
    for f in negotiate {
        let fc = FrameControl(f[1]);
        assert!(!fc.is_encrypted());
        assert!(!fc.has_checksum());
    }

    let sec_mode = frames_of(sent, FrameKind::Control, ctrl::SET_SEC_MODE);
    assert_eq!(sec_mode.len(), 1);
    let fc = FrameControl(sec_mode[0][1]);
    assert!(fc.has_checksum());
    assert!(fc.requires_ack());
    assert!(!fc.is_encrypted());
    assert_eq!(sec_mode[0][4], 0x03);
}

#[test]
fn credentials_never_cross_the_link_in_clear() {
    let mut h = Harness::established(DeviceProfile::default());
    let params = ConfigureParams::station("lab-net", "hunter2").unwrap();
    block_on(h.session.configure(&params)).unwrap();
    h.pump();

    let sent = h.session.transport().sent();
    let password = frames_of(sent, FrameKind::Data, data::STA_PASSWORD);
    assert_eq!(password.len(), 1);
    let fc = FrameControl(password[0][1]);
    assert!(fc.is_encrypted());
    assert!(fc.has_checksum());
    assert!(
        !sent.iter().any(|f| f.windows(7).any(|w| w == b"hunter2")),
        "password visible on the wire"
    );
    // Control frames stay plain under the default mode.
    let op_mode = frames_of(sent, FrameKind::Control, ctrl::SET_OP_MODE);
    assert!(!FrameControl(op_mode[0][1]).is_encrypted());

    assert_eq!(
        h.device.borrow().provisioned().sta_password.as_deref(),
        Some("hunter2")
    );
}

#[test]
fn control_encryption_mode_is_honoured() {
    let config = SessionConfig {
        security_mode: SecurityMode {
            control_encrypt: true,
            control_checksum: true,
            ..SecurityMode::default()
        },
        ..SessionConfig::default()
    };
    let mut h = Harness::new(config, DeviceProfile::default());
    h.connect();
    assert!(h.pump().is_empty());
    assert_eq!(h.session.security_state(), SecurityState::Established);

    block_on(h.session.request_device_version()).unwrap();
    assert!(h.pump().is_empty());
    let sent = h.session.transport().sent();
    let get_version = frames_of(sent, FrameKind::Control, ctrl::GET_VERSION);
    assert!(FrameControl(get_version[0][1]).is_encrypted());
    assert_eq!(h.session.pending_len(), 0);
}

#[test]
fn renegotiation_rotates_keys() {
    let mut h = Harness::established(DeviceProfile::default());
    let first = h.session.fingerprint();

    block_on(h.session.negotiate_security()).unwrap();
    assert_eq!(h.session.security_state(), SecurityState::NegotiationRequested);
    assert_eq!(h.session.fingerprint(), None);
    h.pump();

    assert_eq!(h.session.state(), SessionState::Ready);
    assert_eq!(h.session.security_state(), SecurityState::Established);
    assert_ne!(h.session.fingerprint(), first);
    assert_eq!(h.session.fingerprint(), h.device.borrow().fingerprint());
}

#[test]
fn events_flow_through_a_channel() {
    let channel: EventChannel = EventChannel::new();
    let device = std::rc::Rc::new(std::cell::RefCell::new(blufi::emulator::DeviceEmulator::default()));
    let transport = blufi::emulator::LoopbackTransport::new(device);
    let mut session = Session::new(
        transport,
        ChannelSink::new(&channel),
        ManualClock::new(),
        SessionConfig::default(),
    )
    .unwrap();

    block_on(async {
        session.connect("dev").await.unwrap();
        loop {
            let notes = session.transport().drain_notifications();
            if notes.is_empty() {
                break;
            }
            for n in notes {
                session.on_receive(&n).await.unwrap();
            }
        }
    });

    let mut established = false;
    while let Ok(event) = channel.try_receive() {
        established |= matches!(event, SessionEvent::SecurityEstablished { .. });
    }
    assert!(established);
    assert_eq!(session.sink().dropped(), 0);
}
