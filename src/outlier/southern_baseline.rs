//! Southern baseline rules
//!
//! The southern stations Yafo, Ashdod and Ashkelon track each other closely. Where they agree,
//! their median at a timestamp is a baseline from which every other station's level is predicted
//! using a fixed offset and tolerance.

use super::{DetectionError, OutlierStrategy};
use crate::types::{AnomalyFlag, Measurement};

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

const NAME: &str = "southern baseline rules";

/// Expected relationship between a station and the baseline
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct StationExpectation {
    /// Expected level above the baseline, in metres
    pub offset: f64,
    /// Largest accepted deviation from the expected level, in metres
    pub tolerance: f64,
}

/// Reference table used by the rules
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BaselineTable {
    /// Stations contributing to the baseline
    pub reference_stations: Vec<String>,
    /// Largest difference at which two reference readings are said to agree, in metres
    pub agreement_tolerance: f64,
    /// Expectations per station
    pub stations: std::collections::HashMap<String, StationExpectation>,
}

/// Errors loading a [BaselineTable]
#[derive(Debug, Error)]
pub enum BaselineTableError {
    #[error("failed to read baseline table {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse baseline table {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("baseline table has no reference stations")]
    NoReferenceStations,
}

impl Default for BaselineTable {
    fn default() -> Self {
        let expectation = |offset, tolerance| StationExpectation { offset, tolerance };
        Self {
            reference_stations: ["Yafo", "Ashdod", "Ashkelon"].map(String::from).to_vec(),
            agreement_tolerance: 0.05,
            stations: [
                ("Yafo", expectation(0.00, 0.03)),
                ("Ashdod", expectation(0.00, 0.03)),
                ("Ashkelon", expectation(0.00, 0.03)),
                ("Haifa", expectation(0.04, 0.05)),
                ("Acre", expectation(0.08, 0.05)),
                ("Eilat", expectation(0.28, 0.06)),
            ]
            .into_iter()
            .map(|(station, expectation)| (station.to_string(), expectation))
            .collect(),
        }
    }
}

impl BaselineTable {
    /// Load a BaselineTable from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, BaselineTableError> {
        let path_name = path.display().to_string();
        let contents = std::fs::read(path).map_err(|source| BaselineTableError::Read {
            path: path_name.clone(),
            source,
        })?;
        let table: Self =
            serde_json::from_slice(&contents).map_err(|source| BaselineTableError::Parse {
                path: path_name,
                source,
            })?;
        if table.reference_stations.is_empty() {
            return Err(BaselineTableError::NoReferenceStations);
        }
        Ok(table)
    }
}

/// [OutlierStrategy] applying the southern baseline rules
#[derive(Debug, Default)]
pub struct SouthernBaseline {
    table: BaselineTable,
}

impl SouthernBaseline {
    /// Returns a SouthernBaseline using `table`.
    pub fn new(table: BaselineTable) -> Self {
        Self { table }
    }

    fn is_reference(&self, station: &str) -> bool {
        self.table.reference_stations.iter().any(|s| s == station)
    }

    /// Returns the baseline at each timestamp with at least one valid reference reading.
    fn baselines(&self, data: &[Measurement]) -> HashMap<DateTime<Utc>, f64> {
        let mut references: HashMap<DateTime<Utc>, Vec<(&str, f64)>> = HashMap::new();
        for measurement in data.iter().filter(|m| self.is_reference(&m.station)) {
            if let Some(value) = measurement.value {
                references
                    .entry(measurement.timestamp)
                    .or_default()
                    .push((measurement.station.as_str(), value));
            }
        }
        references
            .into_iter()
            .filter_map(|(timestamp, readings)| {
                // A reading is valid when another reference station agrees with it.
                let mut valid: Vec<f64> = readings
                    .iter()
                    .filter(|(station, value)| {
                        readings.iter().any(|(other, other_value)| {
                            other != station
                                && (value - other_value).abs() <= self.table.agreement_tolerance
                        })
                    })
                    .map(|(_, value)| *value)
                    .collect();
                median(&mut valid).map(|baseline| (timestamp, baseline))
            })
            .collect()
    }
}

impl OutlierStrategy for SouthernBaseline {
    fn name(&self) -> &'static str {
        NAME
    }

    fn classify(&self, data: &[Measurement]) -> Result<Vec<AnomalyFlag>, DetectionError> {
        let baselines = self.baselines(data);
        if baselines.is_empty() {
            return Err(DetectionError::Unavailable {
                strategy: NAME,
                reason: "no valid reference readings".to_string(),
            });
        }
        Ok(data
            .iter()
            .map(|measurement| {
                let Some(value) = measurement.value else {
                    return AnomalyFlag::Unknown;
                };
                let expectation = self.table.stations.get(&measurement.station);
                match (expectation, baselines.get(&measurement.timestamp)) {
                    (Some(expectation), Some(baseline)) => {
                        let expected = baseline + expectation.offset;
                        if (value - expected).abs() > expectation.tolerance {
                            AnomalyFlag::Outlier
                        } else {
                            AnomalyFlag::Normal
                        }
                    }
                    // Without a baseline or an expectation there is no evidence of an outlier.
                    _ => AnomalyFlag::Normal,
                }
            })
            .collect())
    }
}

/// Returns the median of `values`, averaging the middle pair for an even count.
fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
