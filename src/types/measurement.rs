//! Measurements flowing through the retrieval pipeline

use crate::types::TideSummary;

use chrono::{DateTime, Utc};

/// Classification of a single reading by the outlier detector.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum AnomalyFlag {
    /// Reading within the expected band
    Normal,
    /// Reading outside the expected band
    Outlier,
    /// Not classified, either because detection was not requested or because it failed
    #[default]
    Unknown,
}

impl AnomalyFlag {
    /// Returns the external indicator for this flag: `-1` for outliers, `0` otherwise.
    pub fn indicator(self) -> i8 {
        match self {
            Self::Outlier => -1,
            Self::Normal | Self::Unknown => 0,
        }
    }
}

/// A single sea level reading, or the reduction of several readings into a bucket.
///
/// `station` and `timestamp` identify a measurement and never change once it leaves the store.
/// Numeric fields are `None` when absent, e.g. a NULL in the store or a non-finite reading
/// removed by the cleaner.
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    /// Station name
    pub station: String,
    /// Time of the reading, or start of the bucket for aggregated data
    pub timestamp: DateTime<Utc>,
    /// Sea level in metres
    pub value: Option<f64>,
    /// Sea temperature in degrees Celsius
    pub secondary_value: Option<f64>,
    /// Number of raw rows folded into the bucket, for aggregated data only
    pub sample_count: Option<u32>,
    /// Outlier classification
    pub anomaly: AnomalyFlag,
    /// Daily tide summary, for the tides data source only
    pub tide: Option<TideSummary>,
}

impl Measurement {
    /// Return a new raw Measurement with an unclassified anomaly flag.
    pub fn new(
        station: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: Option<f64>,
        secondary_value: Option<f64>,
    ) -> Self {
        Self {
            station: station.into(),
            timestamp,
            value,
            secondary_value,
            sample_count: None,
            anomaly: AnomalyFlag::Unknown,
            tide: None,
        }
    }

    /// Return a new tide summary Measurement for the day starting at `timestamp`.
    pub fn tide(station: impl Into<String>, timestamp: DateTime<Utc>, summary: TideSummary) -> Self {
        let mut measurement = Self::new(station, timestamp, None, None);
        measurement.tide = Some(summary);
        measurement
    }
}
