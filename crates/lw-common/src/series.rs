//! Time-indexed sample tables.
//!
//! A [`TimeSeries`] is an index of timezone-naive timestamps (interpreted as
//! UTC) plus named channels aligned with it. Missing entries are `None`;
//! `NaN` is treated as missing wherever values are read.

use crate::error::{Error, Result};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// Named channels of a therapy time series.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Bolus doses (U), present only at dose events.
    Bolus,
    /// Basal rate (U/hr), defined at every sample.
    Basal,
    /// CGM glucose (mg/dL).
    Glucose,
    /// Carbohydrate intake (g), sparse.
    Carbs,
    /// Derived: insulin on board (U).
    Iob,
    /// Derived: insulin counteraction effect (mg/dL/s).
    Ice,
    /// Derived: carbs on board (g).
    Cob,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Bolus => "bolus",
            Channel::Basal => "basal",
            Channel::Glucose => "glucose",
            Channel::Carbs => "carbs",
            Channel::Iob => "iob",
            Channel::Ice => "ice",
            Channel::Cob => "cob",
        }
    }

    /// Whether the channel is produced by the pipeline rather than supplied.
    pub fn is_derived(&self) -> bool {
        matches!(self, Channel::Iob | Channel::Ice | Channel::Cob)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bolus" => Ok(Channel::Bolus),
            "basal" => Ok(Channel::Basal),
            "glucose" | "cgm" | "bg" => Ok(Channel::Glucose),
            "carbs" | "carbohydrates" => Ok(Channel::Carbs),
            "iob" => Ok(Channel::Iob),
            "ice" => Ok(Channel::Ice),
            "cob" => Ok(Channel::Cob),
            _ => Err(Error::InvalidEnum {
                field: "channel",
                value: s.to_string(),
                allowed: "bolus, basal, glucose, carbs, iob, ice, cob".to_string(),
            }),
        }
    }
}

/// An ordered table of samples keyed by timestamp.
///
/// Deserialization enforces the same channel-length rule as
/// [`TimeSeries::insert_channel`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeSeries")]
pub struct TimeSeries {
    index: Vec<NaiveDateTime>,
    channels: BTreeMap<Channel, Vec<Option<f64>>>,
}

/// Unchecked wire form of a [`TimeSeries`].
#[derive(Deserialize)]
struct RawTimeSeries {
    index: Vec<NaiveDateTime>,
    #[serde(default)]
    channels: BTreeMap<Channel, Vec<Option<f64>>>,
}

impl TryFrom<RawTimeSeries> for TimeSeries {
    type Error = Error;

    fn try_from(raw: RawTimeSeries) -> Result<Self> {
        let mut series = TimeSeries::new(raw.index);
        for (channel, values) in raw.channels {
            series.insert_channel(channel, values)?;
        }
        Ok(series)
    }
}

impl TimeSeries {
    /// Create a series with the given index and no channels.
    pub fn new(index: Vec<NaiveDateTime>) -> Self {
        Self {
            index,
            channels: BTreeMap::new(),
        }
    }

    /// Create a series with `len` samples spaced `step` apart.
    pub fn regular(start: NaiveDateTime, step: Duration, len: usize) -> Self {
        let index = (0..len).map(|i| start + step * i as i32).collect();
        Self::new(index)
    }

    /// Attach a channel; fails if its length differs from the index.
    pub fn with_channel(mut self, channel: Channel, values: Vec<Option<f64>>) -> Result<Self> {
        self.insert_channel(channel, values)?;
        Ok(self)
    }

    /// Attach a fully observed channel.
    pub fn with_values(
        self,
        channel: Channel,
        values: impl IntoIterator<Item = f64>,
    ) -> Result<Self> {
        let values = values.into_iter().map(Some).collect();
        self.with_channel(channel, values)
    }

    /// Insert or replace a channel.
    pub fn insert_channel(&mut self, channel: Channel, values: Vec<Option<f64>>) -> Result<()> {
        if values.len() != self.index.len() {
            return Err(Error::invalid_parameter(
                channel.as_str(),
                format!(
                    "channel has {} values but the index has {} timestamps",
                    values.len(),
                    self.index.len()
                ),
            ));
        }
        self.channels.insert(channel, values);
        Ok(())
    }

    /// Replace `channel` with an all-undefined column.
    pub fn reset_channel(&mut self, channel: Channel) {
        self.channels.insert(channel, vec![None; self.index.len()]);
    }

    /// Make sure `channel` exists, filling a new column with undefined values.
    pub fn ensure_channel(&mut self, channel: Channel) -> &mut Vec<Option<f64>> {
        let len = self.index.len();
        self.channels.entry(channel).or_insert_with(|| vec![None; len])
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn channel(&self, channel: Channel) -> Option<&[Option<f64>]> {
        self.channels.get(&channel).map(Vec::as_slice)
    }

    pub fn has_channel(&self, channel: Channel) -> bool {
        self.channels.contains_key(&channel)
    }

    /// Value at `position`, with `NaN` reported as missing.
    pub fn value(&self, channel: Channel, position: usize) -> Option<f64> {
        self.channels
            .get(&channel)
            .and_then(|values| values.get(position).copied().flatten())
            .filter(|v| !v.is_nan())
    }

    /// Number of defined (non-missing, non-NaN) values in a channel.
    pub fn defined_count(&self, channel: Channel) -> usize {
        self.channel(channel)
            .map(|values| values.iter().flatten().filter(|v| !v.is_nan()).count())
            .unwrap_or(0)
    }

    /// Position of `timestamp` in a normalized index.
    pub fn position_of(&self, timestamp: NaiveDateTime) -> Option<usize> {
        self.index.binary_search(&timestamp).ok()
    }

    /// Whether the index is strictly ascending.
    pub fn is_normalized(&self) -> bool {
        self.index.windows(2).all(|w| w[0] < w[1])
    }

    /// Copy of the series with the index sorted ascending and deduplicated.
    ///
    /// Sorting is stable; among duplicate timestamps the first row wins.
    pub fn normalized(&self) -> TimeSeries {
        if self.is_normalized() {
            return self.clone();
        }

        let mut order: Vec<usize> = (0..self.index.len()).collect();
        order.sort_by_key(|&i| self.index[i]);
        order.dedup_by_key(|i| self.index[*i]);

        let index = order.iter().map(|&i| self.index[i]).collect();
        let channels = self
            .channels
            .iter()
            .map(|(channel, values)| (*channel, order.iter().map(|&i| values[i]).collect()))
            .collect();

        TimeSeries { index, channels }
    }

    /// Borrow the whole series as a view.
    pub fn view(&self) -> SeriesView<'_> {
        SeriesView {
            series: self,
            range: 0..self.index.len(),
        }
    }

    /// Borrow `range` of the series as a view.
    pub fn slice(&self, range: Range<usize>) -> Result<SeriesView<'_>> {
        if range.start > range.end || range.end > self.index.len() {
            return Err(Error::invalid_parameter(
                "range",
                format!(
                    "{}..{} is outside a series of {} samples",
                    range.start,
                    range.end,
                    self.index.len()
                ),
            ));
        }
        Ok(SeriesView {
            series: self,
            range,
        })
    }
}

/// A borrowed, contiguous slice of a [`TimeSeries`].
#[derive(Debug, Clone)]
pub struct SeriesView<'a> {
    series: &'a TimeSeries,
    range: Range<usize>,
}

impl<'a> SeriesView<'a> {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Position of the first sample within the parent series.
    pub fn offset(&self) -> usize {
        self.range.start
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn index(&self) -> &'a [NaiveDateTime] {
        &self.series.index[self.range.clone()]
    }

    pub fn channel(&self, channel: Channel) -> Option<&'a [Option<f64>]> {
        self.series
            .channels
            .get(&channel)
            .map(|values| &values[self.range.clone()])
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.index().first().copied()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.index().last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 28)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_regular_index_spacing() {
        let series = TimeSeries::regular(t0(), Duration::minutes(5), 3);
        assert_eq!(series.len(), 3);
        assert_eq!(series.index()[2] - series.index()[0], Duration::minutes(10));
        assert!(series.is_normalized());
    }

    #[test]
    fn test_channel_length_must_match_index() {
        let series = TimeSeries::regular(t0(), Duration::minutes(5), 3);
        let err = series.with_values(Channel::Basal, [1.0, 1.0]).unwrap_err();
        assert_eq!(err.code(), 11);
    }

    #[test]
    fn test_normalized_sorts_and_keeps_first_duplicate() {
        let a = t0();
        let b = a + Duration::minutes(5);
        let series = TimeSeries::new(vec![b, a, b])
            .with_values(Channel::Glucose, [120.0, 100.0, 999.0])
            .unwrap();
        assert!(!series.is_normalized());

        let normalized = series.normalized();
        assert_eq!(normalized.index(), &[a, b]);
        assert_eq!(
            normalized.channel(Channel::Glucose).unwrap(),
            &[Some(100.0), Some(120.0)]
        );
    }

    #[test]
    fn test_value_treats_nan_as_missing() {
        let series = TimeSeries::regular(t0(), Duration::minutes(5), 2)
            .with_channel(Channel::Bolus, vec![Some(f64::NAN), Some(2.0)])
            .unwrap();
        assert_eq!(series.value(Channel::Bolus, 0), None);
        assert_eq!(series.value(Channel::Bolus, 1), Some(2.0));
        assert_eq!(series.defined_count(Channel::Bolus), 1);
    }

    #[test]
    fn test_slice_view_bounds() {
        let series = TimeSeries::regular(t0(), Duration::minutes(5), 10)
            .with_values(Channel::Basal, (0..10).map(f64::from))
            .unwrap();
        let view = series.slice(3..6).unwrap();
        assert_eq!(view.len(), 3);
        assert_eq!(view.offset(), 3);
        assert_eq!(view.channel(Channel::Basal).unwrap()[0], Some(3.0));
        assert_eq!(view.first_timestamp(), Some(series.index()[3]));
        assert!(series.slice(8..11).is_err());
    }

    #[test]
    fn test_position_of_uses_sorted_index() {
        let series = TimeSeries::regular(t0(), Duration::minutes(5), 4);
        assert_eq!(series.position_of(t0() + Duration::minutes(15)), Some(3));
        assert_eq!(series.position_of(t0() + Duration::minutes(16)), None);
    }

    #[test]
    fn test_channel_parse_accepts_cgm_alias() {
        assert_eq!("CGM".parse::<Channel>().unwrap(), Channel::Glucose);
        assert_eq!("iob".parse::<Channel>().unwrap(), Channel::Iob);
        assert!("insulin".parse::<Channel>().is_err());
    }

    #[test]
    fn test_ensure_channel_initializes_undefined() {
        let mut series = TimeSeries::regular(t0(), Duration::minutes(5), 3);
        series.ensure_channel(Channel::Iob);
        assert_eq!(series.channel(Channel::Iob).unwrap(), &[None, None, None]);
        assert!(Channel::Iob.is_derived());
    }

    #[test]
    fn test_reset_channel_discards_old_values() {
        let mut series = TimeSeries::regular(t0(), Duration::minutes(5), 3)
            .with_values(Channel::Ice, [1.0, 2.0, 3.0])
            .unwrap();
        series.reset_channel(Channel::Ice);
        assert_eq!(series.defined_count(Channel::Ice), 0);
        assert_eq!(series.channel(Channel::Ice).unwrap().len(), 3);
    }

    #[test]
    fn test_deserialize_checks_channel_lengths() {
        let json = serde_json::json!({
            "index": ["2024-02-28T00:00:00", "2024-02-28T00:05:00", "2024-02-28T00:10:00"],
            "channels": { "iob": [null] }
        });
        let err = serde_json::from_value::<TimeSeries>(json).unwrap_err();
        assert!(err.to_string().contains("iob"), "{err}");

        let unsorted = serde_json::json!({
            "index": ["2024-02-28T00:05:00", "2024-02-28T00:00:00"],
            "channels": { "basal": [1.0] }
        });
        assert!(serde_json::from_value::<TimeSeries>(unsorted).is_err());
    }

    #[test]
    fn test_deserialize_round_trips_valid_series() {
        let series = TimeSeries::regular(t0(), Duration::minutes(5), 2)
            .with_channel(Channel::Glucose, vec![Some(100.0), None])
            .unwrap();
        let json = serde_json::to_string(&series).unwrap();
        let back: TimeSeries = serde_json::from_str(&json).unwrap();
        assert_eq!(back, series);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn normalized_index_is_strictly_ascending(offsets in prop::collection::vec(0i64..500, 0..64)) {
                let index: Vec<_> = offsets.iter().map(|m| t0() + Duration::minutes(*m)).collect();
                let values: Vec<_> = offsets.iter().map(|m| Some(*m as f64)).collect();
                let series = TimeSeries::new(index).with_channel(Channel::Glucose, values).unwrap();

                let normalized = series.normalized();
                prop_assert!(normalized.is_normalized());

                let mut unique = offsets.clone();
                unique.sort_unstable();
                unique.dedup();
                prop_assert_eq!(normalized.len(), unique.len());

                // Every row keeps its own value after reordering.
                for (ts, value) in normalized.index().iter().zip(normalized.channel(Channel::Glucose).unwrap()) {
                    let minutes = (*ts - t0()).num_minutes();
                    prop_assert_eq!(*value, Some(minutes as f64));
                }
            }
        }
    }
}
