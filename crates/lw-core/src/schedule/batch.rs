//! Overlapping batch scheduler: few large paired queries, stitched by time.

use chrono::NaiveDateTime;
use lw_common::{Channel, Result, TimeSeries};
use lw_config::{FailurePolicy, SchedulerConfig};

use super::RunReport;
use crate::assemble::write;
use crate::logging::{event_names, Stage};
use crate::oracle::{Oracle, OracleRequest, QueryKind};
use crate::request::RequestBuilder;
use crate::window::{overlapping_batches, Batch};

/// Drives [`overlapping_batches`] against an oracle.
#[derive(Debug, Clone)]
pub struct BatchScheduler<'a> {
    builder: &'a RequestBuilder,
    batch_size: usize,
    overlap: usize,
    policy: FailurePolicy,
}

impl<'a> BatchScheduler<'a> {
    pub fn new(builder: &'a RequestBuilder, config: &SchedulerConfig) -> Self {
        Self {
            builder,
            batch_size: config.batch_size,
            overlap: config.overlap,
            policy: config.failure_policy,
        }
    }

    /// Query paired results for every batch of `output` and store them in
    /// `channel`, skipping the first `overlap` entries of each response.
    /// Existing values in `channel` are discarded first.
    pub fn run<O: Oracle + ?Sized>(
        &self,
        output: &mut TimeSeries,
        kind: QueryKind,
        channel: Channel,
        oracle: &mut O,
        report: &mut RunReport,
    ) -> Result<()> {
        let batches = overlapping_batches(output.len(), self.batch_size, self.overlap)?;
        output.reset_channel(channel);

        for batch in batches {
            report.windows += 1;
            let result = self
                .query(output, &batch, kind, oracle)
                .and_then(|(dates, values)| {
                    write(output, channel, &dates, &values, batch.discard..values.len())
                });

            match result {
                Ok(stats) => {
                    report.writes += stats;
                    tracing::debug!(
                        target: event_names::BATCH_DONE,
                        stage = %Stage::Assemble,
                        start = batch.range.start,
                        end = batch.range.end,
                        written = stats.written,
                        unmatched = stats.unmatched,
                        "batch done"
                    );
                    if stats.unmatched > 0 {
                        tracing::debug!(
                            target: event_names::ASSEMBLE_UNMATCHED,
                            stage = %Stage::Assemble,
                            unmatched = stats.unmatched,
                            "response timestamps outside the series were ignored"
                        );
                    }
                }
                Err(err) => {
                    let unwritten = batch.write_range();
                    report.fail(batch.range, unwritten, err)?;
                }
            }
        }
        Ok(())
    }

    fn query<O: Oracle + ?Sized>(
        &self,
        series: &TimeSeries,
        batch: &Batch,
        kind: QueryKind,
        oracle: &mut O,
    ) -> Result<(Vec<NaiveDateTime>, Vec<f64>)> {
        let view = series.slice(batch.range.clone())?;
        let request = self.builder.build(&view, series.index()[batch.anchor])?;
        oracle
            .call(&OracleRequest::Prediction(request), kind)?
            .into_pairs(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::mock::MockOracle;
    use chrono::{Duration, NaiveDate};
    use lw_common::TherapySettings;

    fn series(len: usize) -> TimeSeries {
        let t0 = NaiveDate::from_ymd_opt(2024, 2, 28)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        TimeSeries::regular(t0, Duration::minutes(5), len)
            .with_values(Channel::Basal, std::iter::repeat(1.0).take(len))
            .unwrap()
            .with_values(Channel::Glucose, std::iter::repeat(100.0).take(len))
            .unwrap()
    }

    fn run(
        output: &mut TimeSeries,
        config: &SchedulerConfig,
        oracle: &mut MockOracle,
    ) -> Result<RunReport> {
        let builder = RequestBuilder::new(TherapySettings::new(1.0, 45.0, 12.0));
        let mut report = RunReport::new("run-test", "ice", Channel::Ice, config.failure_policy);
        BatchScheduler::new(&builder, config).run(
            output,
            QueryKind::GlucoseEffectVelocity,
            Channel::Ice,
            oracle,
            &mut report,
        )?;
        Ok(report)
    }

    #[test]
    fn test_batches_write_from_overlap_onward() {
        let mut output = series(25);
        let mut oracle = MockOracle::new();
        let config = SchedulerConfig::default().with_batches(10, 3);
        let report = run(&mut output, &config, &mut oracle).unwrap();

        assert_eq!(oracle.call_count(), 4);
        assert_eq!(report.writes.written, 22);
        for i in 0..25 {
            let value = output.value(Channel::Ice, i);
            if i < 3 {
                assert_eq!(value, None, "position {i}");
            } else {
                assert_eq!(value, Some(MockOracle::velocity_at(output.index()[i])));
            }
        }
    }

    #[test]
    fn test_prediction_start_is_last_sample_of_batch() {
        let mut output = series(25);
        let mut oracle = MockOracle::new();
        let config = SchedulerConfig::default().with_batches(10, 3);
        run(&mut output, &config, &mut oracle).unwrap();

        let starts: Vec<_> = oracle
            .prediction_requests(QueryKind::GlucoseEffectVelocity)
            .iter()
            .map(|r| r.prediction_start)
            .collect();
        let index = output.index();
        assert_eq!(starts, vec![index[9], index[16], index[23], index[24]]);
    }

    #[test]
    fn test_mismatched_pairs_abort_without_writes() {
        let mut output = series(20);
        let mut oracle = MockOracle::new().with_mismatched_pairs();
        let config = SchedulerConfig::default().with_batches(10, 3);
        let err = run(&mut output, &config, &mut oracle).unwrap_err();

        assert_eq!(err.code(), 30);
        assert_eq!(oracle.call_count(), 1);
        assert_eq!(output.defined_count(Channel::Ice), 0);
    }

    #[test]
    fn test_isolated_batch_failure() {
        let mut output = series(25);
        let mut oracle = MockOracle::new().fail_on_call(1);
        let config = SchedulerConfig::default()
            .with_batches(10, 3)
            .with_failure_policy(FailurePolicy::Isolate);
        let report = run(&mut output, &config, &mut oracle).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].unwritten, 10..17);
        assert_eq!(output.value(Channel::Ice, 12), None);
        assert!(output.value(Channel::Ice, 17).is_some());
    }
}
