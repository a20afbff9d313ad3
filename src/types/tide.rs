//! Daily tide summaries
//!
//! The tides data source holds one summary per station and day: the day's high and low tide
//! levels, the times they occurred and the sea temperature at each. Summaries are reduced by
//! calendar day or by Monday-aligned week only.

use chrono::{Duration, NaiveTime};

/// High and low tides of a station over one day, or the means over a bucket of days.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TideSummary {
    /// High tide level in metres
    pub high: Option<f64>,
    /// Time of the high tide, absent for aggregated summaries
    pub high_time: Option<NaiveTime>,
    /// Sea temperature at high tide
    pub high_temperature: Option<f64>,
    /// Low tide level in metres
    pub low: Option<f64>,
    /// Time of the low tide, absent for aggregated summaries
    pub low_time: Option<NaiveTime>,
    /// Sea temperature at low tide
    pub low_temperature: Option<f64>,
    /// Number of raw samples the summary was computed from
    pub measurement_count: Option<u32>,
}

impl TideSummary {
    /// Returns whether no tide field is present.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Drop non-finite levels and temperatures.
    pub fn remove_non_finite(&mut self) {
        for field in [
            &mut self.high,
            &mut self.high_temperature,
            &mut self.low,
            &mut self.low_temperature,
        ] {
            *field = field.filter(|v| v.is_finite());
        }
    }
}

/// Truncation unit of tide summaries, as named by PostgreSQL's `date_trunc`.
pub fn truncation_unit(bucket: Duration) -> &'static str {
    if bucket >= Duration::weeks(1) {
        "week"
    } else {
        "day"
    }
}

/// Returns the bucket tide summaries are reduced into when `bucket` is requested.
///
/// Weekly and coarser requests reduce by week. Everything finer reduces by day, since a summary
/// never covers less than a day.
pub fn bucket(bucket: Duration) -> Duration {
    match truncation_unit(bucket) {
        "week" => Duration::weeks(1),
        _ => Duration::days(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets() {
        assert_eq!(Duration::days(1), bucket(Duration::minutes(5)));
        assert_eq!(Duration::days(1), bucket(Duration::hours(3)));
        assert_eq!(Duration::days(1), bucket(Duration::days(1)));
        assert_eq!(Duration::weeks(1), bucket(Duration::weeks(1)));
        assert_eq!("day", truncation_unit(Duration::hours(1)));
        assert_eq!("week", truncation_unit(Duration::weeks(1)));
    }

    #[test]
    fn non_finite_removed() {
        let mut summary = TideSummary {
            high: Some(f64::INFINITY),
            high_temperature: Some(21.5),
            low: Some(f64::NAN),
            measurement_count: Some(1440),
            ..Default::default()
        };
        summary.remove_non_finite();
        assert_eq!(None, summary.high);
        assert_eq!(None, summary.low);
        assert_eq!(Some(21.5), summary.high_temperature);
        assert!(!summary.is_empty());
        assert!(TideSummary::default().is_empty());
    }
}
