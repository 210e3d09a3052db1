//! Writing oracle results back into the output series.
//!
//! Writes go by timestamp, not position: a response whose dates drift from
//! the request's nominal window still lands on the right samples. The output
//! index must be normalized (strictly ascending).

use chrono::NaiveDateTime;
use lw_common::{Channel, Error, Result, TimeSeries};
use serde::Serialize;
use std::ops::Range;

/// Counters for one or more writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    /// Values stored in the output.
    pub written: usize,
    /// Retained entries whose timestamp is not in the index.
    pub unmatched: usize,
    /// Entries outside the retained range.
    pub discarded: usize,
}

impl std::ops::AddAssign for WriteStats {
    fn add_assign(&mut self, other: Self) {
        self.written += other.written;
        self.unmatched += other.unmatched;
        self.discarded += other.discarded;
    }
}

/// Write `values[retained]` into `channel` at the matching `timestamps`.
///
/// The range is clamped to the response length. Unequal input lengths are
/// rejected before anything is written.
pub fn write(
    output: &mut TimeSeries,
    channel: Channel,
    timestamps: &[NaiveDateTime],
    values: &[f64],
    retained: Range<usize>,
) -> Result<WriteStats> {
    if timestamps.len() != values.len() {
        return Err(Error::ResponseLengthMismatch {
            values: values.len(),
            timestamps: timestamps.len(),
        });
    }

    let len = values.len();
    let retained = retained.start.min(len)..retained.end.min(len);
    let mut stats = WriteStats {
        discarded: len - retained.len(),
        ..WriteStats::default()
    };

    for i in retained {
        match output.position_of(timestamps[i]) {
            Some(position) => {
                output.ensure_channel(channel)[position] = Some(values[i]);
                stats.written += 1;
            }
            None => stats.unmatched += 1,
        }
    }
    Ok(stats)
}

/// Write a single value at `timestamp`; returns whether it matched.
pub fn write_one(
    output: &mut TimeSeries,
    channel: Channel,
    timestamp: NaiveDateTime,
    value: f64,
) -> bool {
    match output.position_of(timestamp) {
        Some(position) => {
            output.ensure_channel(channel)[position] = Some(value);
            true
        }
        None => false,
    }
}
