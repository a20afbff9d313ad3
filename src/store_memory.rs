//! In-memory measurement store
//!
//! Holds every sample in memory, grouped by data source. Used for tests, benchmarks and for
//! serving fixture files without a database.

use crate::models::{QueryFilter, DEFAULT_DATA_SOURCE};
use crate::store::{MeasurementStore, StoreError, StoreRow};
use crate::types::Measurement;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::Deserialize;
use std::path::Path;
use tracing::{event, Level};

/// Contents of a fixture file: either a list of rows for the default data source, or a map from
/// data source name to rows.
#[derive(Deserialize)]
#[serde(untagged)]
enum Fixture {
    Rows(Vec<StoreRow>),
    Sources(std::collections::HashMap<String, Vec<StoreRow>>),
}

/// A [MeasurementStore] backed by vectors in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sources: HashMap<String, Vec<Measurement>>,
}

impl MemoryStore {
    /// Returns an empty MemoryStore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add measurements to a data source.
    pub fn insert(&mut self, data_source: &str, measurements: impl IntoIterator<Item = Measurement>) {
        let series = self.sources.entry(data_source.to_string()).or_default();
        series.extend(measurements);
        series.sort_by(|a, b| (a.timestamp, &a.station).cmp(&(b.timestamp, &b.station)));
    }

    /// Returns a MemoryStore holding `measurements` in the default data source.
    pub fn with_measurements(measurements: impl IntoIterator<Item = Measurement>) -> Self {
        let mut store = Self::new();
        store.insert(DEFAULT_DATA_SOURCE, measurements);
        store
    }

    /// Load a MemoryStore from a JSON fixture file.
    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let path_name = path.display().to_string();
        let contents = std::fs::read(path).map_err(|source| StoreError::FixtureRead {
            path: path_name.clone(),
            source,
        })?;
        let fixture: Fixture =
            serde_json::from_slice(&contents).map_err(|source| StoreError::FixtureParse {
                path: path_name.clone(),
                source,
            })?;
        let mut store = Self::new();
        match fixture {
            Fixture::Rows(rows) => {
                store.insert(DEFAULT_DATA_SOURCE, rows.into_iter().map(Measurement::from))
            }
            Fixture::Sources(sources) => {
                for (data_source, rows) in sources {
                    store.insert(&data_source, rows.into_iter().map(Measurement::from));
                }
            }
        }
        event!(
            Level::INFO,
            "Loaded {} data sources from {}",
            store.sources.len(),
            path_name
        );
        Ok(store)
    }
}

#[async_trait]
impl MeasurementStore for MemoryStore {
    async fn fetch_raw(&self, filter: &QueryFilter) -> Result<Vec<Measurement>, StoreError> {
        let series = self
            .sources
            .get(&filter.data_source)
            .ok_or_else(|| StoreError::UnsupportedDataSource(filter.data_source.clone()))?;
        Ok(series
            .iter()
            .filter(|m| filter.stations.contains(&m.station))
            .filter(|m| {
                let day = m.timestamp.date_naive();
                filter.start_date.map_or(true, |start| day >= start)
                    && filter.end_date.map_or(true, |end| day <= end)
            })
            .cloned()
            .collect())
    }
}
