#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The presence decoder must classify or reject any input without
    // panicking; the unknown-kind fallback makes most valid JSON succeed.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = chatwire_client::protocol::decode_presence_frame(s);
    }
});
