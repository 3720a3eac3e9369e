use serde::Serialize;
use time::{Duration, OffsetDateTime, format_description::well_known::Rfc3339};

use crate::core::{Error, Result};

pub(super) fn format_timestamp(timestamp: OffsetDateTime) -> Result<String> {
    Ok(timestamp.format(&Rfc3339)?)
}

pub(super) fn parse_timestamp(raw: &str) -> Result<OffsetDateTime> {
    Ok(OffsetDateTime::parse(raw, &Rfc3339)?)
}

pub(super) fn duration_from_ms(ms: i64) -> Duration {
    Duration::milliseconds(ms)
}

/// Whole milliseconds of a non-negative duration, as stored in `total_time_ms`.
pub(super) fn duration_to_ms(duration: Duration) -> Result<i64> {
    i64::try_from(duration.whole_milliseconds())
        .map_err(|_| Error::Corrupt(format!("duration out of range: {duration}")))
}

/// A duration broken into whole hours, minutes and seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Hms {
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Hms {
    pub fn from_seconds(total_seconds: i64) -> Self {
        let total_seconds = total_seconds.max(0);
        Self {
            hours: total_seconds / 3600,
            minutes: (total_seconds % 3600) / 60,
            seconds: total_seconds % 60,
        }
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self::from_seconds(duration.whole_seconds())
    }
}

impl std::fmt::Display for Hms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}
