//! Fuzz target: `FrameDecoder::feed`
//!
//! Splits arbitrary input into notifications and feeds them through the
//! inbound decoder. The decoder must never panic, must never yield a
//! message beyond the reassembly limit, and must accept frames again
//! after a reset.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use blufi::protocol::fragment::MAX_MESSAGE_LEN;
use blufi::protocol::{Decoded, Direction, FrameDecoder, NoCipher};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new(Direction::Inbound);

    // First byte of each record is its length; the rest is the notification.
    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let (chunk, next) = tail.split_at((len as usize).min(tail.len()));
        rest = next;
        if let Ok(Decoded::Frame(frame)) = decoder.feed(chunk, &NoCipher) {
            assert!(frame.payload.len() <= MAX_MESSAGE_LEN, "reassembled past the limit");
        }
    }

    decoder.reset();
    assert_eq!(decoder.expected_sequence(), 0);
    assert!(!decoder.in_fragment_group());
    let _ = decoder.feed(data, &NoCipher);
});
