#![no_main]

//! Fuzz target for handshake message decoding.
//!
//! Every input is tried as is and behind a valid header for each message
//! type. Whatever decodes must encode back to the same bytes.

use libfuzzer_sys::fuzz_target;

use reprise::message::Message;

const TYPES: &[u8] = &[1, 2, 3, 4, 11, 12, 13, 14, 15, 16, 20, 22, 254];

fn check(bytes: &[u8]) {
    if let Ok(message) = Message::decode(bytes) {
        let encoded = message.encode().expect("decoded message encodes");
        assert_eq!(encoded, bytes);
    }
}

fuzz_target!(|data: &[u8]| {
    check(data);

    let len = data.len().min(0xFF_FFFF);
    for t in TYPES {
        let mut framed = Vec::with_capacity(4 + len);
        framed.push(*t);
        framed.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
        framed.extend_from_slice(&data[..len]);
        check(&framed);
    }
});
