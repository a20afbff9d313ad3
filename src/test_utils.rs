use crate::cli::CommandLineArgs;
use crate::models::QueryFilter;
use crate::store::{MeasurementStore, StoreError};
use crate::types::Measurement;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use clap::Parser;

/// Returns `n` measurements for `station` spaced `step` apart from `start`, with values `f(i)`.
pub(crate) fn series(
    station: &str,
    start: DateTime<Utc>,
    step: Duration,
    n: usize,
    f: impl Fn(usize) -> f64,
) -> Vec<Measurement> {
    (0..n)
        .map(|i| {
            let offset = step * i32::try_from(i).unwrap();
            Measurement::new(station, start + offset, Some(f(i)), Some(20.0))
        })
        .collect()
}

/// Returns command line arguments parsed from `args`, with defaults for everything else.
pub(crate) fn test_args(args: &[&str]) -> CommandLineArgs {
    CommandLineArgs::parse_from(std::iter::once("sealevel").chain(args.iter().copied()))
}

/// A store that cannot be reached.
#[derive(Debug)]
pub(crate) struct FailingStore;

#[async_trait]
impl MeasurementStore for FailingStore {
    async fn fetch_raw(&self, _filter: &QueryFilter) -> Result<Vec<Measurement>, StoreError> {
        Err(StoreError::Connection("connection refused".to_string()))
    }
}

/// A store that takes longer to answer than any test's time budget.
#[derive(Debug)]
pub(crate) struct SlowStore;

#[async_trait]
impl MeasurementStore for SlowStore {
    async fn fetch_raw(&self, _filter: &QueryFilter) -> Result<Vec<Measurement>, StoreError> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}
