//! Query execution against the measurement store

use crate::error::SeaLevelError;
use crate::models::QueryFilter;
use crate::planner::inclusive_days;
use crate::resource_manager::ResourceManager;
use crate::store::{normalise, MeasurementStore};
use crate::types::{AggregationLevel, Measurement};

use std::sync::Arc;
use tracing::{event, Level};

/// Fetches measurements for a filter at a planned aggregation level.
///
/// A multi-station request is served by a single store call. Results are deduplicated by
/// station and timestamp and ordered by timestamp then station.
#[derive(Clone, Debug)]
pub struct QueryExecutor {
    store: Arc<dyn MeasurementStore>,
}

impl QueryExecutor {
    /// Returns a QueryExecutor reading from `store`.
    pub fn new(store: Arc<dyn MeasurementStore>) -> Self {
        Self { store }
    }

    /// Fetch measurements matching `filter` at aggregation level `level`.
    ///
    /// # Arguments
    ///
    /// * `filter`: Stations, date range and data source to query
    /// * `level`: Aggregation level chosen by the planner
    /// * `resource_manager`: Bounds concurrent store queries
    #[tracing::instrument(level = "DEBUG", skip(self, resource_manager))]
    pub async fn execute(
        &self,
        filter: &QueryFilter,
        level: AggregationLevel,
        resource_manager: &ResourceManager,
    ) -> Result<Vec<Measurement>, SeaLevelError> {
        let _conn_permits = resource_manager.store_connection().await?;
        let rows = match level.bucket() {
            None => self.store.fetch_raw(filter).await?,
            Some(bucket) => self.store.fetch_aggregated(filter, bucket).await?,
        };
        let fetched = rows.len();
        let rows = normalise(rows);
        event!(
            Level::DEBUG,
            "Fetched {} rows ({} after deduplication) at level {}",
            fetched,
            rows.len(),
            level
        );
        if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
            event!(
                Level::DEBUG,
                "Expected at most {} rows per station",
                level.record_ceiling(inclusive_days(start, end))
            );
        }
        Ok(rows)
    }
}
