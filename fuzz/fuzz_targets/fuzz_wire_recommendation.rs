//! Fuzz target for dose recommendation decoding.

#![no_main]

use libfuzzer_sys::fuzz_target;
use lw_core::wire::decode_recommendation;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = decode_recommendation(text);
    }
});
