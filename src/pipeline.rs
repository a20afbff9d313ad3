//! Retrieval pipeline
//!
//! Orchestrates a request: plan the aggregation level, consult the cache, and on a miss fetch,
//! clean and optionally classify the data within the request time budget before caching it.

use crate::cache::{self, MemoryBackend, ResultCache};
use crate::cleaner::DataCleaner;
use crate::cli::CommandLineArgs;
use crate::error::SeaLevelError;
use crate::executor::QueryExecutor;
use crate::metrics::{AGGREGATION_LEVELS, OUTLIER_DETECTIONS};
use crate::models::QueryFilter;
use crate::outlier::{DetectionState, OutlierDetector};
use crate::planner::AggregationPlanner;
use crate::resource_manager::ResourceManager;
use crate::store::MeasurementStore;
use crate::types::{AggregationLevel, Measurement};

use std::sync::Arc;
use std::time::Duration;
use tracing::{event, Level};

/// Result of a pipeline run
#[derive(Debug)]
pub struct PipelineOutput {
    /// Aggregation level of the measurements
    pub level: AggregationLevel,
    /// Cleaned, and optionally classified, measurements ordered by timestamp then station
    pub measurements: Arc<Vec<Measurement>>,
    /// Whether the measurements came from the cache
    pub cache_hit: bool,
}

/// The retrieval pipeline shared by all requests.
#[derive(Debug)]
pub struct Pipeline {
    planner: AggregationPlanner,
    executor: QueryExecutor,
    cleaner: DataCleaner,
    detector: Arc<OutlierDetector>,
    cache: Option<ResultCache>,
    resource_manager: ResourceManager,
    request_timeout: Duration,
    use_rayon: bool,
}

impl Pipeline {
    /// Returns a new Pipeline.
    ///
    /// # Arguments
    ///
    /// * `args`: Command line arguments
    /// * `store`: Source of measurements
    /// * `detector`: Outlier detector
    pub fn new(
        args: &CommandLineArgs,
        store: Arc<dyn MeasurementStore>,
        detector: OutlierDetector,
    ) -> Self {
        let task_limit = args
            .thread_limit
            .unwrap_or_else(|| num_cpus::get().saturating_sub(1))
            .max(1);
        let cache = args.use_cache.then(|| {
            let ttl_raw = Duration::from_secs(args.cache_ttl);
            let ttl_aggregated = Duration::from_secs(args.cache_ttl_aggregated);
            ResultCache::new(
                Box::new(MemoryBackend::new(
                    args.cache_capacity,
                    ttl_raw.max(ttl_aggregated),
                )),
                ttl_raw,
                ttl_aggregated,
                args.single_flight,
            )
        });
        Self {
            planner: AggregationPlanner::new(args.aggregation_policy),
            executor: QueryExecutor::new(store),
            cleaner: DataCleaner::new(args.max_interpolation_gap),
            detector: Arc::new(detector),
            cache,
            resource_manager: ResourceManager::new(args.store_connection_limit, Some(task_limit)),
            request_timeout: Duration::from_secs(args.request_timeout),
            use_rayon: args.use_rayon,
        }
    }

    /// Returns the outlier detector.
    pub fn detector(&self) -> &OutlierDetector {
        &self.detector
    }

    /// Run the pipeline for `filter`.
    ///
    /// Returns `NoData` when nothing matches. Empty results are not cached.
    #[tracing::instrument(level = "DEBUG", skip(self))]
    pub async fn run(&self, filter: &QueryFilter) -> Result<PipelineOutput, SeaLevelError> {
        let (level, _) = self.planner.plan(filter.start_date, filter.end_date);
        AGGREGATION_LEVELS.with_label_values(&[level.as_str()]).inc();

        let Some(cache) = &self.cache else {
            let measurements = self.compute(filter, level).await?;
            return Ok(PipelineOutput {
                level,
                measurements: Arc::new(measurements),
                cache_hit: false,
            });
        };

        let key = cache::fingerprint(filter, level);
        let hit = |measurements| PipelineOutput {
            level,
            measurements,
            cache_hit: true,
        };
        if let Some(measurements) = cache.get(&key) {
            return Ok(hit(measurements));
        }
        let flight = cache.single_flight(&key).await;
        if flight.is_some() {
            // Another request may have filled the entry while this one waited.
            if let Some(measurements) = cache.get(&key) {
                return Ok(hit(measurements));
            }
        }
        let measurements = Arc::new(self.compute(filter, level).await?);
        cache.put(&key, measurements.clone(), cache.ttl_for(level));
        Ok(PipelineOutput {
            level,
            measurements,
            cache_hit: false,
        })
    }

    /// Fetch and process measurements within the request time budget.
    async fn compute(
        &self,
        filter: &QueryFilter,
        level: AggregationLevel,
    ) -> Result<Vec<Measurement>, SeaLevelError> {
        let seconds = self.request_timeout.as_secs();
        tokio::time::timeout(self.request_timeout, self.fetch_and_process(filter, level))
            .await
            .map_err(|_| {
                event!(
                    Level::WARN,
                    "Request exceeded its time budget of {} seconds",
                    seconds
                );
                SeaLevelError::ProcessingTimeout { seconds }
            })?
    }

    async fn fetch_and_process(
        &self,
        filter: &QueryFilter,
        level: AggregationLevel,
    ) -> Result<Vec<Measurement>, SeaLevelError> {
        let data = self
            .executor
            .execute(filter, level, &self.resource_manager)
            .await?;
        if data.is_empty() {
            return Err(SeaLevelError::NoData);
        }

        // Held by the job, so a timed out request does not free the slot of a running job.
        let task_permit = self.resource_manager.task().await?;
        let cleaner = self.cleaner;
        let detector = self.detector.clone();
        let include_outliers = filter.include_outliers;
        let work = move || {
            let _task_permit = task_permit;
            process(data, cleaner, &detector, include_outliers)
        };
        if self.use_rayon {
            Ok(tokio_rayon::spawn(work).await)
        } else {
            Ok(tokio::task::spawn_blocking(work).await?)
        }
    }
}

/// Clean `data` and, if requested, classify it.
fn process(
    mut data: Vec<Measurement>,
    cleaner: DataCleaner,
    detector: &OutlierDetector,
    include_outliers: bool,
) -> Vec<Measurement> {
    cleaner.clean(&mut data);
    if include_outliers {
        let state = detector.detect(&mut data);
        event!(Level::DEBUG, "Outlier detection finished: {}", state);
    } else {
        let label: &'static str = DetectionState::NotRequested.into();
        OUTLIER_DETECTIONS.with_label_values(&[label]).inc();
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StationSelection, DEFAULT_DATA_SOURCE};
    use crate::outlier::iqr::IqrRule;
    use crate::outlier::southern_baseline::SouthernBaseline;
    use crate::store_memory::MemoryStore;
    use crate::test_utils;
    use crate::types::AnomalyFlag;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn detector() -> OutlierDetector {
        OutlierDetector::new(
            Some(Box::new(SouthernBaseline::default())),
            Box::new(IqrRule::default()),
        )
    }

    fn store() -> Arc<dyn MeasurementStore> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut measurements =
            test_utils::series("Haifa", start, chrono::Duration::minutes(1), 2 * 1440, |i| {
                0.1 + (i % 7) as f64 * 0.001
            });
        measurements[100].value = Some(5.0);
        measurements[200].value = None;
        Arc::new(MemoryStore::with_measurements(measurements))
    }

    fn filter(include_outliers: bool) -> QueryFilter {
        QueryFilter {
            stations: StationSelection::single("Haifa"),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            data_source: DEFAULT_DATA_SOURCE.to_string(),
            include_outliers,
        }
    }

    fn pipeline(args: &[&str]) -> Pipeline {
        Pipeline::new(&test_utils::test_args(args), store(), detector())
    }

    #[tokio::test]
    async fn raw_day() {
        let pipeline = pipeline(&[]);
        let output = pipeline.run(&filter(false)).await.unwrap();
        assert_eq!(AggregationLevel::Raw, output.level);
        assert_eq!(1440, output.measurements.len());
        assert!(!output.cache_hit);
        // Interpolated by the cleaner.
        assert!(output.measurements[200].value.is_some());
        assert!(output
            .measurements
            .iter()
            .all(|m| m.anomaly == AnomalyFlag::Unknown));
    }

    #[tokio::test]
    async fn detection_skipped_when_not_requested() {
        let pipeline = pipeline(&[]);
        pipeline.run(&filter(false)).await.unwrap();
        assert_eq!(0, pipeline.detector().invocations());
    }

    #[tokio::test]
    async fn fallback_detection() {
        // No southern reference stations, so the IQR rule classifies the data.
        let pipeline = pipeline(&["--use-rayon"]);
        let output = pipeline.run(&filter(true)).await.unwrap();
        assert_eq!(1, pipeline.detector().invocations());
        assert_eq!(AnomalyFlag::Outlier, output.measurements[100].anomaly);
        assert_eq!(AnomalyFlag::Normal, output.measurements[101].anomaly);
    }

    #[tokio::test]
    async fn second_run_hits_cache() {
        let pipeline = pipeline(&[]);
        let first = pipeline.run(&filter(true)).await.unwrap();
        let second = pipeline.run(&filter(true)).await.unwrap();
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.measurements, second.measurements);
        assert_eq!(1, pipeline.detector().invocations());
    }

    #[tokio::test]
    async fn cache_disabled() {
        let pipeline = pipeline(&["--use-cache", "false"]);
        pipeline.run(&filter(true)).await.unwrap();
        let second = pipeline.run(&filter(true)).await.unwrap();
        assert!(!second.cache_hit);
        assert_eq!(2, pipeline.detector().invocations());
    }

    #[tokio::test]
    async fn no_data() {
        let pipeline = pipeline(&[]);
        let mut filter = filter(false);
        filter.stations = StationSelection::single("Eilat");
        match pipeline.run(&filter).await {
            Err(SeaLevelError::NoData) => (),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout() {
        let args = test_utils::test_args(&["--request-timeout", "1"]);
        let pipeline = Pipeline::new(&args, Arc::new(test_utils::SlowStore), detector());
        match pipeline.run(&filter(false)).await {
            Err(SeaLevelError::ProcessingTimeout { seconds }) => assert_eq!(1, seconds),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_flight_computes_once() {
        let pipeline = Arc::new(pipeline(&["--single-flight"]));
        let runs = (0..8).map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run(&filter(true)).await.unwrap() })
        });
        let mut outputs = Vec::new();
        for run in runs.collect::<Vec<_>>() {
            outputs.push(run.await.unwrap());
        }
        assert_eq!(1, pipeline.detector().invocations());
        assert_eq!(1, outputs.iter().filter(|o| !o.cache_hit).count());
        assert!(outputs
            .windows(2)
            .all(|w| w[0].measurements == w[1].measurements));
    }
}
