//! Pure partition plans for the two schedulers.
//!
//! A plan says which slice of the series feeds each oracle call, which
//! sample anchors the prediction, and where the results may be written.
//! Plans never touch the series or the oracle.

use lw_common::{Error, Result};
use std::ops::Range;

/// One trailing window of the lookback scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookbackWindow {
    /// Slice of the series sent to the oracle, ending at the anchor.
    pub range: Range<usize>,
    /// Position whose timestamp is the prediction start.
    pub anchor: usize,
    /// Position the scalar result is written to.
    pub target: usize,
}

/// Iterator over the lookback windows of a series of `len` samples.
#[derive(Debug, Clone)]
pub struct LookbackWindows {
    len: usize,
    lookback: usize,
    next: usize,
}

impl Iterator for LookbackWindows {
    type Item = LookbackWindow;

    fn next(&mut self) -> Option<Self::Item> {
        let anchor = self.next;
        if anchor + 1 >= self.len {
            return None;
        }
        self.next += 1;
        let start = (anchor + 1).saturating_sub(self.lookback);
        Some(LookbackWindow {
            range: start..anchor + 1,
            anchor,
            target: anchor + 1,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len.saturating_sub(self.next + 1);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for LookbackWindows {}

/// Plan the windows for `len` samples.
///
/// Window `i` ends at sample `i`, holds at most `lookback` samples and feeds
/// position `i + 1`; position 0 is never a target.
pub fn lookback_windows(len: usize, lookback: usize) -> Result<LookbackWindows> {
    if lookback == 0 {
        return Err(Error::invalid_parameter("lookback", "must be at least 1"));
    }
    Ok(LookbackWindows {
        len,
        lookback,
        next: 0,
    })
}

/// One overlapping batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Slice of the series sent to the oracle.
    pub range: Range<usize>,
    /// Position whose timestamp is the prediction start (last of `range`).
    pub anchor: usize,
    /// Leading response entries to discard.
    pub discard: usize,
}

impl Batch {
    /// Series positions this batch nominally writes.
    pub fn write_range(&self) -> Range<usize> {
        (self.range.start + self.discard).min(self.range.end)..self.range.end
    }
}

/// Iterator over the batches covering a series.
#[derive(Debug, Clone)]
pub struct Batches {
    len: usize,
    batch_size: usize,
    overlap: usize,
    start: usize,
}

impl Iterator for Batches {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.start >= self.len {
            return None;
        }
        let start = self.start;
        let end = (start + self.batch_size).min(self.len);
        self.start += self.batch_size - self.overlap;
        Some(Batch {
            range: start..end,
            anchor: end - 1,
            discard: self.overlap,
        })
    }
}

/// Plan batches of `batch_size` samples overlapping by `overlap`.
///
/// Batch starts advance by `batch_size - overlap` while they lie inside the
/// series. Retained write ranges tile `[overlap, len)` without gaps.
pub fn overlapping_batches(len: usize, batch_size: usize, overlap: usize) -> Result<Batches> {
    if batch_size == 0 {
        return Err(Error::invalid_parameter("batch_size", "must be at least 1"));
    }
    if overlap >= batch_size {
        return Err(Error::invalid_parameter(
            "overlap",
            format!("must be smaller than batch_size ({overlap} >= {batch_size})"),
        ));
    }
    Ok(Batches {
        len,
        batch_size,
        overlap,
        start: 0,
    })
}

/// Number of oracle calls the batch scheduler makes for `len` samples.
pub fn batch_count(len: usize, batch_size: usize, overlap: usize) -> usize {
    let step = batch_size.saturating_sub(overlap);
    if len == 0 || step == 0 {
        return 0;
    }
    (len - 1) / step + 1
}
