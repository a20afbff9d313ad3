//! Measurement store interface
//!
//! The store is the source of truth for raw samples. Implementations normalise their native row
//! format into [Measurement] at this boundary so that the rest of the pipeline sees a single
//! schema.

use crate::aggregate;
use crate::models::{QueryFilter, TIDES_DATA_SOURCE};
use crate::types::{tide, Measurement, TideSummary};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Errors returned by a [MeasurementStore]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached
    #[error("store connection failed: {0}")]
    Connection(String),

    /// The store rejected or failed a query
    #[error("store query failed: {0}")]
    Query(String),

    /// The requested data source is not served by this store
    #[error("unsupported data source {0}")]
    UnsupportedDataSource(String),

    /// A fixture file could not be read
    #[error("failed to read fixture file {path}")]
    FixtureRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A fixture file could not be parsed
    #[error("failed to parse fixture file {path}")]
    FixtureParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Error from the database driver
    #[cfg(feature = "postgres")]
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// A source of sea level measurements.
///
/// Implementations must return results ordered by ascending timestamp and must include only
/// samples whose calendar day lies within the filter's date range, inclusive at both ends.
#[async_trait]
pub trait MeasurementStore: std::fmt::Debug + Send + Sync {
    /// Returns every raw sample matching `filter`.
    async fn fetch_raw(&self, filter: &QueryFilter) -> Result<Vec<Measurement>, StoreError>;

    /// Returns samples matching `filter` reduced into buckets of width `bucket`.
    ///
    /// The default implementation fetches raw samples and reduces them in process. Stores that
    /// can aggregate natively should override it. Either way, a station's duplicate samples at
    /// one timestamp count once per bucket, and tide summaries are reduced by day or week.
    async fn fetch_aggregated(
        &self,
        filter: &QueryFilter,
        bucket: Duration,
    ) -> Result<Vec<Measurement>, StoreError> {
        let bucket = if filter.data_source == TIDES_DATA_SOURCE {
            tide::bucket(bucket)
        } else {
            bucket
        };
        let raw = normalise(self.fetch_raw(filter).await?);
        Ok(aggregate::reduce(&raw, bucket))
    }
}

/// Order rows by timestamp then station, keeping the first row of each station and timestamp.
pub fn normalise(mut rows: Vec<Measurement>) -> Vec<Measurement> {
    // Stable, so the store's first row wins.
    rows.sort_by(|a, b| (a.timestamp, &a.station).cmp(&(b.timestamp, &b.station)));
    rows.dedup_by(|later, earlier| {
        later.timestamp == earlier.timestamp && later.station == earlier.station
    });
    rows
}

/// A row as stored, before normalisation.
///
/// Accepts both the column names of the tide gauge and tide summary tables and plain field
/// names. A row with any tide column becomes a tide summary.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StoreRow {
    #[serde(alias = "Station", alias = "station_name")]
    pub station: String,
    #[serde(
        alias = "Tab_DateTime",
        alias = "Date",
        alias = "datetime",
        alias = "time",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "Tab_Value_mDepthC1", alias = "level")]
    pub value: Option<f64>,
    #[serde(default, alias = "Tab_Value_monT2m", alias = "temperature")]
    pub secondary_value: Option<f64>,
    #[serde(default, alias = "HighTide")]
    pub high_tide: Option<f64>,
    #[serde(default, alias = "HighTideTime", deserialize_with = "deserialize_time")]
    pub high_tide_time: Option<NaiveTime>,
    #[serde(default, alias = "HighTideTemp")]
    pub high_tide_temperature: Option<f64>,
    #[serde(default, alias = "LowTide")]
    pub low_tide: Option<f64>,
    #[serde(default, alias = "LowTideTime", deserialize_with = "deserialize_time")]
    pub low_tide_time: Option<NaiveTime>,
    #[serde(default, alias = "LowTideTemp")]
    pub low_tide_temperature: Option<f64>,
    #[serde(default, alias = "MeasurementCount")]
    pub measurement_count: Option<u32>,
}

impl From<StoreRow> for Measurement {
    fn from(row: StoreRow) -> Self {
        let summary = TideSummary {
            high: row.high_tide,
            high_time: row.high_tide_time,
            high_temperature: row.high_tide_temperature,
            low: row.low_tide,
            low_time: row.low_tide_time,
            low_temperature: row.low_tide_temperature,
            measurement_count: row.measurement_count,
        };
        let mut measurement =
            Measurement::new(row.station, row.timestamp, row.value, row.secondary_value);
        if !summary.is_empty() {
            measurement.tide = Some(summary);
        }
        measurement
    }
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339, a naive date-time which is taken to be UTC, or a date which is taken to be
/// midnight UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Parse a stored time of day, with or without seconds.
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    ["%H:%M:%S%.f", "%H:%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(value, format).ok())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_timestamp(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{value}`")))
}

fn deserialize_time<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(value) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    parse_time(&value)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid time `{value}`")))
}
