//! Request types and associated functions and methods

use crate::error::SeaLevelError;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use std::fmt;
use validator::Validate;

/// Name of the data source used when a request does not specify one.
pub const DEFAULT_DATA_SOURCE: &str = "default";

/// Name of the data source holding daily tide summaries.
pub const TIDES_DATA_SOURCE: &str = "tides";

/// Station names that select every station.
const ALL_STATIONS: [&str; 2] = ["all", "all stations"];

/// Query parameters for the single station endpoint
#[derive(Debug, Default, Deserialize, PartialEq, Validate)]
pub struct DataQuery {
    /// Station name, or `All` for every station
    #[validate(length(min = 1, message = "station must not be empty"))]
    pub station: Option<String>,
    /// First day of the range, inclusive
    pub start_date: Option<String>,
    /// Last day of the range, inclusive
    pub end_date: Option<String>,
    /// Data source name
    #[validate(length(min = 1, message = "data_source must not be empty"))]
    pub data_source: Option<String>,
    /// Whether to run outlier detection
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub show_anomalies: bool,
    /// Alias for `show_anomalies`
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub include_outliers: bool,
    /// Maximum number of records to return
    #[validate(range(min = 1, message = "limit must be greater than 0"))]
    pub limit: Option<usize>,
}

/// Query parameters for the batch endpoint
#[derive(Debug, Default, Deserialize, PartialEq, Validate)]
pub struct BatchQuery {
    /// Comma-separated station names
    pub stations: String,
    /// First day of the range, inclusive
    pub start_date: Option<String>,
    /// Last day of the range, inclusive
    pub end_date: Option<String>,
    /// Data source name
    #[validate(length(min = 1, message = "data_source must not be empty"))]
    pub data_source: Option<String>,
    /// Whether to run outlier detection
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub show_anomalies: bool,
    /// Alias for `show_anomalies`
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub include_outliers: bool,
    /// Maximum number of records to return
    #[validate(range(min = 1, message = "limit must be greater than 0"))]
    pub limit: Option<usize>,
}

/// A set of stations to query
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum StationSelection {
    /// Every station known to the store
    All,
    /// A non-empty set of named stations, ordered by name
    Stations(BTreeSet<String>),
}

impl StationSelection {
    /// Returns a selection for a single station name.
    ///
    /// `All` and `All Stations` in any case select every station.
    pub fn single(name: &str) -> Self {
        let name = name.trim();
        if is_all_stations(name) {
            Self::All
        } else {
            Self::Stations(BTreeSet::from([name.to_string()]))
        }
    }

    /// Returns a selection for a comma-separated list of station names.
    ///
    /// Blank entries and the `All Stations` placeholder are dropped. Duplicates collapse.
    pub fn from_csv(csv: &str) -> Result<Self, SeaLevelError> {
        let stations: BTreeSet<String> = csv
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty() && !is_all_stations(name))
            .map(str::to_string)
            .collect();
        if stations.is_empty() {
            return Err(SeaLevelError::NoStations);
        }
        Ok(Self::Stations(stations))
    }

    /// Returns whether `station` is part of this selection.
    pub fn contains(&self, station: &str) -> bool {
        match self {
            Self::All => true,
            Self::Stations(stations) => stations.contains(station),
        }
    }

    /// Returns the selected station names, or `None` when every station is selected.
    pub fn names(&self) -> Option<Vec<&str>> {
        match self {
            Self::All => None,
            Self::Stations(stations) => Some(stations.iter().map(String::as_str).collect()),
        }
    }
}

fn is_all_stations(name: &str) -> bool {
    ALL_STATIONS
        .iter()
        .any(|all| name.eq_ignore_ascii_case(all))
}

/// A validated, normalised query used by the pipeline
#[derive(Clone, Debug, PartialEq)]
pub struct QueryFilter {
    /// Stations to query
    pub stations: StationSelection,
    /// First day of the range, inclusive
    pub start_date: Option<NaiveDate>,
    /// Last day of the range, inclusive
    pub end_date: Option<NaiveDate>,
    /// Data source name
    pub data_source: String,
    /// Whether to run outlier detection
    pub include_outliers: bool,
}

impl QueryFilter {
    /// Returns a QueryFilter for a single station request.
    ///
    /// # Arguments
    ///
    /// * `query`: Validated query parameters
    /// * `max_range_days`: Longest range accepted, in days
    pub fn from_data_query(query: &DataQuery, max_range_days: i64) -> Result<Self, SeaLevelError> {
        let stations = query
            .station
            .as_deref()
            .map_or(StationSelection::All, StationSelection::single);
        Self::build(
            stations,
            query.start_date.as_deref(),
            query.end_date.as_deref(),
            query.data_source.as_deref(),
            query.show_anomalies || query.include_outliers,
            max_range_days,
        )
    }

    /// Returns a QueryFilter for a batch request.
    ///
    /// # Arguments
    ///
    /// * `query`: Validated query parameters
    /// * `max_range_days`: Longest range accepted, in days
    pub fn from_batch_query(
        query: &BatchQuery,
        max_range_days: i64,
    ) -> Result<Self, SeaLevelError> {
        Self::build(
            StationSelection::from_csv(&query.stations)?,
            query.start_date.as_deref(),
            query.end_date.as_deref(),
            query.data_source.as_deref(),
            query.show_anomalies || query.include_outliers,
            max_range_days,
        )
    }

    fn build(
        stations: StationSelection,
        start_date: Option<&str>,
        end_date: Option<&str>,
        data_source: Option<&str>,
        include_outliers: bool,
        max_range_days: i64,
    ) -> Result<Self, SeaLevelError> {
        let start_date = start_date.map(parse_date).transpose()?;
        let end_date = end_date.map(parse_date).transpose()?;
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if end < start {
                return Err(SeaLevelError::InvertedRange { start, end });
            }
            let days = (end - start).num_days();
            if days > max_range_days {
                return Err(SeaLevelError::RangeTooLong {
                    days,
                    max: max_range_days,
                });
            }
        }
        Ok(Self {
            stations,
            start_date,
            end_date,
            data_source: data_source.unwrap_or(DEFAULT_DATA_SOURCE).to_string(),
            include_outliers,
        })
    }
}

/// Parse a date parameter.
///
/// Accepts `YYYY-MM-DD`, or an ISO 8601 date-time of which only the date is kept.
pub fn parse_date(value: &str) -> Result<NaiveDate, SeaLevelError> {
    let value = value.trim();
    let invalid = || SeaLevelError::InvalidDate {
        value: value.to_string(),
    };
    if !value.contains('T') {
        return NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid());
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Ok(datetime.date_naive());
    }
    NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .map(|datetime| datetime.date())
        .map_err(|_| invalid())
}

/// Deserialise a boolean query flag.
///
/// `true` in any case is true. Any other text is false.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlagVisitor;

    impl<'de> Visitor<'de> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a boolean or a string")
        }

        fn visit_bool<E: de::Error>(self, value: bool) -> Result<bool, E> {
            Ok(value)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<bool, E> {
            Ok(value.trim().eq_ignore_ascii_case("true"))
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}
