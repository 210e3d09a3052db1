//! Fuzz target for TOML config parsing and validation.
//!
//! Tests that arbitrary config documents are rejected with an error rather
//! than a panic, including values that parse but fail validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use lw_config::{validate_config, Config};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(config) = toml::from_str::<Config>(text) {
            let _ = validate_config(&config);
        }
    }
});
