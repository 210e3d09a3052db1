//! Fuzz target for engine date-list decoding.
//!
//! Tests that comma-delimited date lists decode or fail without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use lw_core::wire::decode_dates;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = decode_dates(text);
    }
});
