//! Scheduler presets derived from insulin activity duration.
//!
//! A lookback window only needs to reach back as far as insulin stays
//! active; anything older contributes nothing to IOB and only inflates the
//! request. The same duration is the warm-up a batch needs before its
//! outputs can be trusted, so it also sets the overlap.

use crate::scheduler::{SchedulerConfig, SAMPLE_INTERVAL_SECONDS};
use lw_common::InsulinType;

/// Number of 5-minute samples covering the insulin's action duration.
pub fn activity_samples(insulin_type: InsulinType) -> usize {
    let seconds = insulin_type.action_duration().num_seconds();
    (seconds / SAMPLE_INTERVAL_SECONDS).max(1) as usize
}

/// Scheduler parameters tuned to `insulin_type`.
///
/// Batch size keeps the default unless the overlap would not fit.
pub fn preset_for(insulin_type: InsulinType) -> SchedulerConfig {
    let samples = activity_samples(insulin_type);
    let defaults = SchedulerConfig::default();
    let batch_size = defaults.batch_size.max(samples * 2);
    SchedulerConfig {
        lookback: samples,
        batch_size,
        overlap: samples,
        ..defaults
    }
}

impl SchedulerConfig {
    /// Shorthand for [`preset_for`].
    pub fn for_insulin(insulin_type: InsulinType) -> Self {
        preset_for(insulin_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rapid_acting_preset_matches_defaults() {
        let preset = preset_for(InsulinType::Novolog);
        assert_eq!(preset.lookback, 72);
        assert_eq!(preset.overlap, 72);
        assert_eq!(preset, SchedulerConfig::default());
    }

    #[test]
    fn test_afrezza_is_shorter() {
        assert_eq!(activity_samples(InsulinType::Afrezza), 60);
        let preset = preset_for(InsulinType::Afrezza);
        assert_eq!(preset.lookback, 60);
        assert!(preset.overlap < preset.batch_size);
        assert_eq!(SchedulerConfig::for_insulin(InsulinType::Afrezza), preset);
    }

    #[test]
    fn test_all_presets_keep_overlap_below_batch() {
        for insulin in InsulinType::ALL {
            let preset = preset_for(*insulin);
            assert!(preset.overlap < preset.batch_size, "{insulin}");
        }
    }
}
