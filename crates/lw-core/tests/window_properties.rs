//! Property-based tests for partitioning, extraction and request building.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use lw_common::{Channel, TherapySettings, TimeSeries};
use lw_config::SchedulerConfig;
use lw_core::extract::extract;
use lw_core::oracle::mock::MockOracle;
use lw_core::request::{settings_margin, RequestBuilder};
use lw_core::window::{batch_count, lookback_windows, overlapping_batches};
use lw_core::Pipeline;
use proptest::prelude::*;

fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 2, 28)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn flat_series(len: usize) -> TimeSeries {
    TimeSeries::regular(t0(), Duration::minutes(5), len)
        .with_values(Channel::Basal, std::iter::repeat(1.0).take(len))
        .unwrap()
        .with_values(Channel::Glucose, std::iter::repeat(110.0).take(len))
        .unwrap()
}

/// Batch size and an overlap strictly below it.
fn batch_params() -> impl Strategy<Value = (usize, usize)> {
    (1usize..64).prop_flat_map(|b| (Just(b), 0..b))
}

proptest! {
    #[test]
    fn extract_keeps_exactly_defined_entries(
        values in prop::collection::vec(prop::option::of(-50.0f64..50.0), 0..80)
    ) {
        let len = values.len();
        let series = TimeSeries::regular(t0(), Duration::minutes(5), len)
            .with_channel(Channel::Carbs, values.clone())
            .unwrap();

        let records = extract(&series.view(), Channel::Carbs).unwrap();
        let expected: Vec<_> = values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (series.index()[i], v)))
            .collect();
        let actual: Vec<_> = records.iter().collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn lookback_windows_are_bounded_and_anchored(len in 0usize..200, lookback in 1usize..80) {
        let windows: Vec<_> = lookback_windows(len, lookback).unwrap().collect();
        prop_assert_eq!(windows.len(), len.saturating_sub(1));

        for (i, window) in windows.iter().enumerate() {
            prop_assert_eq!(window.anchor, i);
            prop_assert_eq!(window.target, i + 1);
            prop_assert_eq!(window.range.end, i + 1);
            prop_assert_eq!(window.range.len(), (i + 1).min(lookback));
        }
    }

    #[test]
    fn batch_write_ranges_tile_from_overlap(len in 0usize..400, (batch, overlap) in batch_params()) {
        let batches: Vec<_> = overlapping_batches(len, batch, overlap).unwrap().collect();
        prop_assert_eq!(batches.len(), batch_count(len, batch, overlap));

        let mut covered = vec![0u32; len];
        for b in &batches {
            prop_assert!(b.range.len() <= batch);
            prop_assert_eq!(b.anchor, b.range.end - 1);
            for i in b.write_range() {
                covered[i] += 1;
            }
        }
        for (i, count) in covered.iter().enumerate() {
            let expected = u32::from(i >= overlap);
            prop_assert_eq!(*count, expected, "position {}", i);
        }
    }

    #[test]
    fn overlapping_batches_agree_with_one_batch(len in 1usize..150, (batch, overlap) in batch_params()) {
        let series = flat_series(len);
        let settings = TherapySettings::new(1.0, 45.0, 12.0);

        let whole = Pipeline::new(settings.clone())
            .with_scheduler(SchedulerConfig::default().with_batches(len + overlap + 1, overlap))
            .add_insulin_counteraction_effect(&series, &mut MockOracle::new())
            .unwrap();
        let split = Pipeline::new(settings)
            .with_scheduler(SchedulerConfig::default().with_batches(batch, overlap))
            .add_insulin_counteraction_effect(&series, &mut MockOracle::new())
            .unwrap();

        prop_assert_eq!(
            whole.series.channel(Channel::Ice),
            split.series.channel(Channel::Ice)
        );
    }

    #[test]
    fn settings_window_spans_margin(start in 0usize..40, width in 1usize..40) {
        let series = flat_series(start + width);
        let view = series.slice(start..start + width).unwrap();
        let builder = RequestBuilder::new(TherapySettings::new(0.9, 40.0, 10.0));
        let anchor = series.index()[start + width - 1];
        let request = builder.build(&view, anchor).unwrap();

        let first = series.index()[start];
        let last = anchor;
        for schedule in [&request.basal, &request.carb_ratio, &request.sensitivity] {
            prop_assert_eq!(schedule.len(), 1);
            prop_assert_eq!(schedule[0].start_date, first - settings_margin());
            prop_assert_eq!(schedule[0].end_date, last + settings_margin());
        }
        prop_assert_eq!(request.target[0].start_date, first);
        prop_assert_eq!(request.target[0].end_date, last);
        prop_assert_eq!(request.glucose_history.len(), width);
        prop_assert_eq!(request.prediction_start, anchor);
    }
}
