//! Lookback scheduler: one scalar query per output position.

use lw_common::{Channel, Result, TimeSeries};
use lw_config::{FailurePolicy, SchedulerConfig};

use super::RunReport;
use crate::assemble::write_one;
use crate::logging::{event_names, Stage};
use crate::oracle::{Oracle, OracleRequest, QueryKind};
use crate::request::RequestBuilder;
use crate::window::{lookback_windows, LookbackWindow};

/// Drives [`lookback_windows`] against an oracle.
#[derive(Debug, Clone)]
pub struct LookbackScheduler<'a> {
    builder: &'a RequestBuilder,
    lookback: usize,
    policy: FailurePolicy,
}

impl<'a> LookbackScheduler<'a> {
    pub fn new(builder: &'a RequestBuilder, config: &SchedulerConfig) -> Self {
        Self {
            builder,
            lookback: config.lookback,
            policy: config.failure_policy,
        }
    }

    /// Query `kind` for every window of `output` and store results in `channel`.
    ///
    /// `output` must be normalized. Any existing values in `channel` are
    /// discarded; the column is all undefined even when the series is too
    /// short for any window.
    pub fn run<O: Oracle + ?Sized>(
        &self,
        output: &mut TimeSeries,
        kind: QueryKind,
        channel: Channel,
        oracle: &mut O,
        report: &mut RunReport,
    ) -> Result<()> {
        let windows = lookback_windows(output.len(), self.lookback)?;
        output.reset_channel(channel);

        for window in windows {
            report.windows += 1;
            match self.query(output, &window, kind, oracle) {
                Ok(value) => {
                    let target_ts = output.index()[window.target];
                    if write_one(output, channel, target_ts, value) {
                        report.writes.written += 1;
                    }
                    tracing::trace!(
                        target: event_names::WINDOW_DONE,
                        stage = %Stage::Query,
                        anchor = window.anchor,
                        samples = window.range.len(),
                        value,
                        "window done"
                    );
                }
                Err(err) => {
                    let target = window.target;
                    report.fail(window.range, target..target + 1, err)?;
                }
            }
        }
        Ok(())
    }

    fn query<O: Oracle + ?Sized>(
        &self,
        series: &TimeSeries,
        window: &LookbackWindow,
        kind: QueryKind,
        oracle: &mut O,
    ) -> Result<f64> {
        let view = series.slice(window.range.clone())?;
        let request = self.builder.build(&view, series.index()[window.anchor])?;
        oracle
            .call(&OracleRequest::Prediction(request), kind)?
            .into_scalar(kind)
    }
}
