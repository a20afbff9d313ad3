//! Response assembly
//!
//! Serialises measurements to the external record formats. Only external fields are written, so
//! nothing computed internally by the detector or cleaner leaks into a response.

use crate::error::SeaLevelError;
use crate::types::{AggregationLevel, Measurement, TideSummary};

use axum::body::Bytes;
use chrono::NaiveTime;
use serde::Serialize;

/// Timestamp format of the `Tab_DateTime` field.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Date format of the tide `Date` field.
const TIDE_DATE_FORMAT: &str = "%d/%m/%Y";

/// Time format of the tide `HighTideTime` and `LowTideTime` fields.
const TIDE_TIME_FORMAT: &str = "%H:%M";

/// A record in the external format
#[derive(Debug, PartialEq, Serialize)]
struct Record<'a> {
    #[serde(rename = "Tab_DateTime")]
    timestamp: String,
    #[serde(rename = "Station")]
    station: &'a str,
    #[serde(rename = "Tab_Value_mDepthC1")]
    value: f64,
    #[serde(rename = "Tab_Value_monT2m")]
    secondary_value: f64,
    #[serde(rename = "RecordCount", skip_serializing_if = "Option::is_none")]
    record_count: Option<u32>,
    anomaly: i8,
}

impl<'a> From<&'a Measurement> for Record<'a> {
    fn from(measurement: &'a Measurement) -> Self {
        Self {
            timestamp: measurement.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            station: &measurement.station,
            value: measurement.value.unwrap_or(0.0),
            secondary_value: measurement.secondary_value.unwrap_or(0.0),
            record_count: measurement.sample_count,
            anomaly: measurement.anomaly.indicator(),
        }
    }
}

/// A tide summary record in the external format
#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TideRecord<'a> {
    date: String,
    station: &'a str,
    high_tide: f64,
    high_tide_time: Option<String>,
    #[serde(rename = "HighTideTemp")]
    high_tide_temperature: f64,
    low_tide: f64,
    low_tide_time: Option<String>,
    #[serde(rename = "LowTideTemp")]
    low_tide_temperature: f64,
    measurement_count: u32,
    #[serde(rename = "anomaly")]
    anomaly: i8,
}

impl<'a> TideRecord<'a> {
    fn new(measurement: &'a Measurement, summary: &TideSummary) -> Self {
        let time = |time: Option<NaiveTime>| time.map(|t| t.format(TIDE_TIME_FORMAT).to_string());
        Self {
            date: measurement.timestamp.format(TIDE_DATE_FORMAT).to_string(),
            station: &measurement.station,
            high_tide: summary.high.unwrap_or(0.0),
            high_tide_time: time(summary.high_time),
            high_tide_temperature: summary.high_temperature.unwrap_or(0.0),
            low_tide: summary.low.unwrap_or(0.0),
            low_tide_time: time(summary.low_time),
            low_tide_temperature: summary.low_temperature.unwrap_or(0.0),
            measurement_count: summary.measurement_count.unwrap_or(0),
            anomaly: measurement.anomaly.indicator(),
        }
    }
}

/// A gauge reading or a tide summary, serialised without a tag
#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
enum Row<'a> {
    Gauge(Record<'a>),
    Tide(TideRecord<'a>),
}

impl<'a> From<&'a Measurement> for Row<'a> {
    fn from(measurement: &'a Measurement) -> Self {
        match &measurement.tide {
            Some(summary) => Self::Tide(TideRecord::new(measurement, summary)),
            None => Self::Gauge(Record::from(measurement)),
        }
    }
}

/// A serialised response with its metadata
#[derive(Debug)]
pub struct DataResponse {
    /// JSON array of records
    pub body: Bytes,
    /// Aggregation level of the records
    pub level: AggregationLevel,
    /// Number of records in `body`
    pub record_count: usize,
    /// Number of records before truncation
    pub total_count: usize,
    /// Number of stations requested, for batch requests
    pub stations_count: Option<usize>,
}

impl DataResponse {
    /// Returns whether records were dropped to honour a limit.
    pub fn is_truncated(&self) -> bool {
        self.record_count < self.total_count
    }
}

/// Builds [DataResponse]s.
pub struct ResponseAssembler;

impl ResponseAssembler {
    /// Serialise `data` at `level`.
    ///
    /// Absent values are written as `0`, absent tide times as `null`. Empty input is an error,
    /// never an empty success.
    ///
    /// # Arguments
    ///
    /// * `data`: Cleaned measurements, in order
    /// * `level`: Aggregation level of `data`
    /// * `limit`: Optional maximum number of records to write
    /// * `stations_count`: Number of stations requested, for batch requests
    pub fn assemble(
        data: &[Measurement],
        level: AggregationLevel,
        limit: Option<usize>,
        stations_count: Option<usize>,
    ) -> Result<DataResponse, SeaLevelError> {
        if data.is_empty() {
            return Err(SeaLevelError::NoData);
        }
        let kept = limit.map_or(data.len(), |limit| limit.min(data.len()));
        let records: Vec<Row> = data[..kept].iter().map(Row::from).collect();
        let body = serde_json::to_vec(&records)?;
        Ok(DataResponse {
            body: body.into(),
            level,
            record_count: kept,
            total_count: data.len(),
            stations_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnomalyFlag;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    fn data() -> Vec<Measurement> {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
        let mut outlier = Measurement::new("Acre", timestamp, Some(0.5), Some(21.0));
        outlier.anomaly = AnomalyFlag::Outlier;
        vec![
            Measurement::new("Haifa", timestamp, None, Some(20.0)),
            outlier,
        ]
    }

    fn parse(response: &DataResponse) -> Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn raw_records() {
        let response =
            ResponseAssembler::assemble(&data(), AggregationLevel::Raw, None, None).unwrap();
        assert_eq!(
            json!([
                {
                    "Tab_DateTime": "2024-01-01T06:00:00Z",
                    "Station": "Haifa",
                    "Tab_Value_mDepthC1": 0.0,
                    "Tab_Value_monT2m": 20.0,
                    "anomaly": 0
                },
                {
                    "Tab_DateTime": "2024-01-01T06:00:00Z",
                    "Station": "Acre",
                    "Tab_Value_mDepthC1": 0.5,
                    "Tab_Value_monT2m": 21.0,
                    "anomaly": -1
                }
            ]),
            parse(&response)
        );
        assert_eq!(2, response.record_count);
        assert!(!response.is_truncated());
        assert_eq!(AggregationLevel::Raw, response.level);
    }

    #[test]
    fn aggregated_record_count() {
        let mut data = data();
        data[0].sample_count = Some(60);
        let response =
            ResponseAssembler::assemble(&data[..1], AggregationLevel::Hourly, None, Some(1))
                .unwrap();
        assert_eq!(json!(60), parse(&response)[0]["RecordCount"]);
        assert_eq!(Some(1), response.stations_count);
    }

    #[test]
    fn tide_records() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        let summary = TideSummary {
            high: Some(0.42),
            high_time: NaiveTime::from_hms_opt(4, 30, 15),
            high_temperature: Some(22.5),
            low: None,
            low_time: None,
            low_temperature: Some(21.0),
            measurement_count: Some(1440),
        };
        let data = vec![Measurement::tide("Eilat", timestamp, summary)];
        let response =
            ResponseAssembler::assemble(&data, AggregationLevel::Daily, None, None).unwrap();
        assert_eq!(
            json!([{
                "Date": "05/03/2024",
                "Station": "Eilat",
                "HighTide": 0.42,
                "HighTideTime": "04:30",
                "HighTideTemp": 22.5,
                "LowTide": 0.0,
                "LowTideTime": null,
                "LowTideTemp": 21.0,
                "MeasurementCount": 1440,
                "anomaly": 0
            }]),
            parse(&response)
        );
    }

    #[test]
    fn limit_truncates() {
        let response =
            ResponseAssembler::assemble(&data(), AggregationLevel::Raw, Some(1), None).unwrap();
        assert_eq!(1, parse(&response).as_array().unwrap().len());
        assert_eq!(1, response.record_count);
        assert_eq!(2, response.total_count);
        assert!(response.is_truncated());
    }

    #[test]
    fn limit_above_len() {
        let response =
            ResponseAssembler::assemble(&data(), AggregationLevel::Raw, Some(10), None).unwrap();
        assert!(!response.is_truncated());
    }

    #[test]
    fn empty_is_no_data() {
        match ResponseAssembler::assemble(&[], AggregationLevel::Raw, None, None) {
            Err(SeaLevelError::NoData) => (),
            other => panic!("unexpected {other:?}"),
        }
    }
}
