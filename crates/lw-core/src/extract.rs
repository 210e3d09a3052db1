//! Record extraction: defined samples of one channel, in series order.

use chrono::NaiveDateTime;
use lw_common::{Channel, Error, Result, SeriesView};

/// Timestamps and values of the defined entries of one channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Records {
    pub timestamps: Vec<NaiveDateTime>,
    pub values: Vec<f64>,
}

impl Records {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDateTime, f64)> + '_ {
        self.timestamps.iter().copied().zip(self.values.iter().copied())
    }
}

/// Defined entries of `channel`, or `None` if the channel is absent.
pub fn extract(view: &SeriesView<'_>, channel: Channel) -> Option<Records> {
    let values = view.channel(channel)?;
    let mut records = Records::default();
    for (ts, value) in view.index().iter().zip(values) {
        if let Some(v) = value.filter(|v| !v.is_nan()) {
            records.timestamps.push(*ts);
            records.values.push(v);
        }
    }
    Some(records)
}

/// Like [`extract`], but an absent channel is an error.
pub fn extract_required(view: &SeriesView<'_>, channel: Channel) -> Result<Records> {
    extract(view, channel).ok_or_else(|| Error::ChannelAbsent {
        channel: channel.to_string(),
    })
}

/// Like [`extract`], but an absent channel yields no records.
pub fn extract_optional(view: &SeriesView<'_>, channel: Channel) -> Records {
    extract(view, channel).unwrap_or_default()
}
