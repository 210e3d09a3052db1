//! Fuzz target for overlapping batch planning.
//!
//! Checks that retained write ranges tile `[overlap, len)` exactly once for
//! any accepted parameters.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use lw_core::window::overlapping_batches;

#[derive(Debug, Arbitrary)]
struct Plan {
    len: u16,
    batch_size: u16,
    overlap: u16,
}

fuzz_target!(|plan: Plan| {
    let len = plan.len as usize;
    let Ok(batches) = overlapping_batches(len, plan.batch_size as usize, plan.overlap as usize)
    else {
        return;
    };

    let mut next = (plan.overlap as usize).min(len);
    for batch in batches {
        let write = batch.write_range();
        if write.is_empty() {
            continue;
        }
        assert_eq!(write.start, next);
        next = write.end;
    }
    assert_eq!(next, len);
});
