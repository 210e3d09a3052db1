//! Fuzz target for JSON config parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use lw_config::{validate_config, Config};

fuzz_target!(|data: &[u8]| {
    // Try to parse as JSON - should never panic, only return an error
    if let Ok(config) = serde_json::from_slice::<Config>(data) {
        let _ = validate_config(&config);
    }
});
