//! Fuzz target: `decode_notification`
//!
//! Arbitrary (kind, subtype, payload) triples must always decode to some
//! notification without panicking.
//!
//! cargo fuzz run fuzz_notification

#![no_main]

use blufi::protocol::{Frame, FrameControl, FrameKind};
use blufi::response::decode_notification;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&ty, payload)) = data.split_first() else {
        return;
    };
    let kind = if ty & 0x01 == 0 { FrameKind::Control } else { FrameKind::Data };
    let frame = Frame {
        kind,
        subtype: ty >> 2,
        control: FrameControl(FrameControl::DIRECTION),
        sequence: 0,
        payload: payload.to_vec(),
        checksum: None,
    };
    let _ = decode_notification(&frame);
});
