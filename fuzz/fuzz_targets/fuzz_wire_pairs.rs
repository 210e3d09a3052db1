//! Fuzz target for engine `timestamp,value` pair decoding.

#![no_main]

use libfuzzer_sys::fuzz_target;
use lw_core::wire::decode_pairs;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok((dates, values)) = decode_pairs(text) {
            assert_eq!(dates.len(), values.len());
        }
    }
});
