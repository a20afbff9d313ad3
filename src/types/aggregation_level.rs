//! Temporal resolution of a response
//!
//! Every response is produced at exactly one aggregation level: either the raw samples as stored,
//! or samples reduced into fixed-duration buckets.

use chrono::Duration;
use strum_macros::{Display, IntoStaticStr};

/// Nominal interval between raw samples in the store.
pub const RAW_SAMPLE_INTERVAL_SECONDS: i64 = 60;

/// Supported aggregation levels, ordered from finest to coarsest.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, IntoStaticStr, Ord, PartialEq, PartialOrd)]
pub enum AggregationLevel {
    /// Every stored sample, no reduction.
    #[strum(serialize = "raw")]
    Raw,
    /// 5 minute buckets
    #[strum(serialize = "5min")]
    FiveMinutes,
    /// 15 minute buckets
    #[strum(serialize = "15min")]
    FifteenMinutes,
    /// 1 hour buckets
    #[strum(serialize = "hourly")]
    Hourly,
    /// 3 hour buckets
    #[strum(serialize = "hourly-3h")]
    ThreeHourly,
    /// 1 day buckets
    #[strum(serialize = "daily")]
    Daily,
    /// 1 week buckets, starting on Mondays
    #[strum(serialize = "weekly")]
    Weekly,
}

impl AggregationLevel {
    /// Returns the bucket duration, or `None` for raw data.
    pub fn bucket(self) -> Option<Duration> {
        match self {
            Self::Raw => None,
            Self::FiveMinutes => Some(Duration::minutes(5)),
            Self::FifteenMinutes => Some(Duration::minutes(15)),
            Self::Hourly => Some(Duration::hours(1)),
            Self::ThreeHourly => Some(Duration::hours(3)),
            Self::Daily => Some(Duration::days(1)),
            Self::Weekly => Some(Duration::weeks(1)),
        }
    }

    /// Returns the name of this level as reported to clients.
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Returns whether this level reduces samples into buckets.
    pub fn is_aggregated(self) -> bool {
        self != Self::Raw
    }

    /// Returns the maximum number of records expected for one station over a range of `days`
    /// inclusive days.
    pub fn record_ceiling(self, days: i64) -> i64 {
        let range_seconds = days.max(0) * 86_400;
        let step = self
            .bucket()
            .map(|bucket| bucket.num_seconds())
            .unwrap_or(RAW_SAMPLE_INTERVAL_SECONDS);
        // A range that is not aligned to bucket boundaries may touch one extra bucket.
        let extra = i64::from(self.is_aggregated());
        (range_seconds + step - 1) / step + extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names() {
        assert_eq!("raw", AggregationLevel::Raw.to_string());
        assert_eq!("5min", AggregationLevel::FiveMinutes.to_string());
        assert_eq!("15min", AggregationLevel::FifteenMinutes.to_string());
        assert_eq!("hourly", AggregationLevel::Hourly.to_string());
        assert_eq!("hourly-3h", AggregationLevel::ThreeHourly.to_string());
        assert_eq!("daily", AggregationLevel::Daily.to_string());
        assert_eq!("weekly", AggregationLevel::Weekly.to_string());
        assert_eq!("hourly-3h", AggregationLevel::ThreeHourly.as_str());
    }

    #[test]
    fn raw_has_no_bucket() {
        assert_eq!(None, AggregationLevel::Raw.bucket());
        assert!(!AggregationLevel::Raw.is_aggregated());
    }

    #[test]
    fn bucket_durations() {
        assert_eq!(Some(300), AggregationLevel::FiveMinutes.bucket().map(|d| d.num_seconds()));
        assert_eq!(Some(10_800), AggregationLevel::ThreeHourly.bucket().map(|d| d.num_seconds()));
        assert_eq!(Some(604_800), AggregationLevel::Weekly.bucket().map(|d| d.num_seconds()));
    }

    #[test]
    fn record_ceilings() {
        assert_eq!(1_440, AggregationLevel::Raw.record_ceiling(1));
        assert_eq!(25, AggregationLevel::Hourly.record_ceiling(1));
        assert_eq!(59, AggregationLevel::Weekly.record_ceiling(400));
        assert_eq!(0, AggregationLevel::Raw.record_ceiling(-3));
    }
}
