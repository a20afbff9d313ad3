//! Result cache
//!
//! Cleaned and classified results are cached under a fingerprint of the normalised query and the
//! planned aggregation level. The cache is best effort: a backend failure is logged and treated
//! as a miss, and the request is served from the store.

use crate::metrics::CACHE_LOOKUPS;
use crate::models::QueryFilter;
use crate::types::{AggregationLevel, Measurement};

use cached::{Cached, TimedSizedCache};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{event, Level};

/// Prefix of every cache key.
const KEY_PREFIX: &str = "data_cache:";

/// Errors returned by a [CacheBackend]
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend cannot be used
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// A cached result
#[derive(Clone, Debug)]
pub struct CacheEntry {
    /// Cleaned and classified measurements
    pub payload: Arc<Vec<Measurement>>,
    /// Time the entry was stored
    pub created_at: Instant,
    /// Lifetime of the entry
    pub ttl: Duration,
}

impl CacheEntry {
    /// Returns whether the entry has outlived its TTL.
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }
}

/// Storage for cached results.
pub trait CacheBackend: std::fmt::Debug + Send + Sync {
    /// Returns the entry stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Store `entry` under `key`, replacing any existing entry.
    fn put(&self, key: String, entry: CacheEntry) -> Result<(), CacheError>;
}

/// An in-process [CacheBackend] with a bounded number of entries.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: Mutex<TimedSizedCache<String, CacheEntry>>,
}

impl MemoryBackend {
    /// Returns a MemoryBackend.
    ///
    /// # Arguments
    ///
    /// * `capacity`: Maximum number of entries. The least recently used entry is evicted first.
    /// * `max_ttl`: Longest TTL of any entry. Entries are dropped after this regardless of their
    ///   own TTL.
    pub fn new(capacity: usize, max_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(TimedSizedCache::with_size_and_lifespan(
                capacity.max(1),
                max_ttl.as_secs().max(1),
            )),
        }
    }
}

impl CacheBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        Ok(entries.cache_get(key).cloned())
    }

    fn put(&self, key: String, entry: CacheEntry) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        entries.cache_set(key, entry);
        Ok(())
    }
}

/// Per-key locks used to collapse concurrent misses for one key into a single computation.
#[derive(Debug, Default)]
struct KeyLocks {
    locks: Mutex<hashbrown::HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Exclusive right to compute the result for a key. Released on drop.
pub struct FlightGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut locks) = self.locks.locks.lock() {
            // Held by the map, this guard and its mutex guard: nobody else is waiting.
            if Arc::strong_count(&self.lock) <= 3 {
                locks.remove(&self.key);
            }
        }
    }
}

/// Cache of pipeline results with TTLs per aggregation level.
#[derive(Debug)]
pub struct ResultCache {
    backend: Box<dyn CacheBackend>,
    ttl_raw: Duration,
    ttl_aggregated: Duration,
    flights: Option<KeyLocks>,
}

impl ResultCache {
    /// Returns a new ResultCache.
    ///
    /// # Arguments
    ///
    /// * `backend`: Storage for entries
    /// * `ttl_raw`: Lifetime of raw results
    /// * `ttl_aggregated`: Lifetime of aggregated results
    /// * `single_flight`: Whether [ResultCache::single_flight] serialises computations per key
    pub fn new(
        backend: Box<dyn CacheBackend>,
        ttl_raw: Duration,
        ttl_aggregated: Duration,
        single_flight: bool,
    ) -> Self {
        Self {
            backend,
            ttl_raw,
            ttl_aggregated,
            flights: single_flight.then(KeyLocks::default),
        }
    }

    /// Returns the TTL for results at `level`.
    pub fn ttl_for(&self, level: AggregationLevel) -> Duration {
        if level.is_aggregated() {
            self.ttl_aggregated
        } else {
            self.ttl_raw
        }
    }

    /// Returns the live entry for `key`, or `None` on a miss, an expired entry or a backend
    /// failure.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<Measurement>>> {
        let (result, payload) = match self.backend.get(key) {
            Ok(Some(entry)) if !entry.is_expired() => ("hit", Some(entry.payload)),
            Ok(_) => ("miss", None),
            Err(err) => {
                event!(Level::WARN, "Cache lookup failed, treating as a miss: {}", err);
                ("error", None)
            }
        };
        CACHE_LOOKUPS.with_label_values(&[result]).inc();
        event!(Level::DEBUG, "Cache {} for {}", result, key);
        payload
    }

    /// Store `payload` under `key` for `ttl`. Failures are logged and otherwise ignored.
    pub fn put(&self, key: &str, payload: Arc<Vec<Measurement>>, ttl: Duration) {
        let entry = CacheEntry {
            payload,
            created_at: Instant::now(),
            ttl,
        };
        if let Err(err) = self.backend.put(key.to_string(), entry) {
            event!(Level::WARN, "Cache store failed: {}", err);
        }
    }

    /// Wait for the exclusive right to compute the result for `key`.
    ///
    /// Returns `None` when single flight is disabled.
    pub async fn single_flight(&self, key: &str) -> Option<FlightGuard<'_>> {
        let locks = self.flights.as_ref()?;
        let lock = {
            let mut map = locks.locks.lock().ok()?;
            map.entry(key.to_string()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        Some(FlightGuard {
            locks,
            key: key.to_string(),
            lock,
            _guard: guard,
        })
    }
}

/// Fields identifying a result, in canonical form.
#[derive(Serialize)]
struct Fingerprint<'a> {
    stations: Option<Vec<&'a str>>,
    start_date: Option<String>,
    end_date: Option<String>,
    level: &'static str,
    data_source: &'a str,
    include_outliers: bool,
}

/// Returns the cache key for `filter` planned at `level`.
///
/// Requests that differ only in station order or duplication share a key.
pub fn fingerprint(filter: &QueryFilter, level: AggregationLevel) -> String {
    let fields = Fingerprint {
        stations: filter.stations.names(),
        start_date: filter.start_date.map(|date| date.to_string()),
        end_date: filter.end_date.map(|date| date.to_string()),
        level: level.as_str(),
        data_source: &filter.data_source,
        include_outliers: filter.include_outliers,
    };
    // Serialising strings, options and booleans cannot fail.
    let canonical = serde_json::to_string(&fields).unwrap_or_default();
    format!("{}{:x}", KEY_PREFIX, md5::compute(canonical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StationSelection, DEFAULT_DATA_SOURCE};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn filter(stations: &str) -> QueryFilter {
        QueryFilter {
            stations: StationSelection::from_csv(stations).unwrap(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 2),
            data_source: DEFAULT_DATA_SOURCE.to_string(),
            include_outliers: false,
        }
    }

    fn payload() -> Arc<Vec<Measurement>> {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Arc::new(vec![Measurement::new("Haifa", timestamp, Some(0.1), None)])
    }

    fn cache(single_flight: bool) -> ResultCache {
        ResultCache::new(
            Box::new(MemoryBackend::new(8, Duration::from_secs(60))),
            Duration::from_secs(60),
            Duration::from_secs(30),
            single_flight,
        )
    }

    #[derive(Debug)]
    struct BrokenBackend;

    impl CacheBackend for BrokenBackend {
        fn get(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
            Err(CacheError::Unavailable("connection reset".to_string()))
        }

        fn put(&self, _key: String, _entry: CacheEntry) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection reset".to_string()))
        }
    }

    #[test]
    fn fingerprint_format() {
        let key = fingerprint(&filter("Haifa"), AggregationLevel::Raw);
        assert!(key.starts_with(KEY_PREFIX));
        assert_eq!(KEY_PREFIX.len() + 32, key.len());
    }

    #[test]
    fn fingerprint_canonical_stations() {
        assert_eq!(
            fingerprint(&filter("Haifa,Acre"), AggregationLevel::Raw),
            fingerprint(&filter("Acre, Haifa,Acre"), AggregationLevel::Raw)
        );
    }

    #[test]
    fn fingerprint_distinguishes_fields() {
        let base = filter("Haifa");
        let key = fingerprint(&base, AggregationLevel::Raw);
        assert_ne!(key, fingerprint(&base, AggregationLevel::Hourly));
        assert_ne!(key, fingerprint(&filter("Acre"), AggregationLevel::Raw));
        let mut other = base.clone();
        other.include_outliers = true;
        assert_ne!(key, fingerprint(&other, AggregationLevel::Raw));
        let mut other = base.clone();
        other.data_source = "tides".to_string();
        assert_ne!(key, fingerprint(&other, AggregationLevel::Raw));
        let mut other = base.clone();
        other.end_date = None;
        assert_ne!(key, fingerprint(&other, AggregationLevel::Raw));
        let mut other = base;
        other.stations = StationSelection::All;
        assert_ne!(key, fingerprint(&other, AggregationLevel::Raw));
    }

    #[test]
    fn hit_after_put() {
        let cache = cache(false);
        assert!(cache.get("k").is_none());
        cache.put("k", payload(), Duration::from_secs(60));
        assert_eq!(Some(payload()), cache.get("k"));
    }

    #[test]
    fn expired_entry_is_miss() {
        let cache = cache(false);
        cache.put("k", payload(), Duration::ZERO);
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn ttl_per_level() {
        let cache = cache(false);
        assert_eq!(Duration::from_secs(60), cache.ttl_for(AggregationLevel::Raw));
        assert_eq!(Duration::from_secs(30), cache.ttl_for(AggregationLevel::Weekly));
    }

    #[test]
    fn capacity_evicts() {
        let backend = MemoryBackend::new(1, Duration::from_secs(60));
        let entry = CacheEntry {
            payload: payload(),
            created_at: Instant::now(),
            ttl: Duration::from_secs(60),
        };
        backend.put("a".to_string(), entry.clone()).unwrap();
        backend.put("b".to_string(), entry).unwrap();
        assert!(backend.get("a").unwrap().is_none());
        assert!(backend.get("b").unwrap().is_some());
    }

    #[test]
    fn broken_backend_is_miss() {
        let cache = ResultCache::new(
            Box::new(BrokenBackend),
            Duration::from_secs(60),
            Duration::from_secs(60),
            false,
        );
        cache.put("k", payload(), Duration::from_secs(60));
        assert!(cache.get("k").is_none());
    }

    #[tokio::test]
    async fn single_flight_disabled() {
        assert!(cache(false).single_flight("k").await.is_none());
    }

    #[tokio::test]
    async fn single_flight_serialises() {
        let cache = cache(true);
        let guard = cache.single_flight("k").await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(50), cache.single_flight("k"));
        assert!(waiting.await.is_err());
        // Other keys are independent.
        assert!(cache.single_flight("other").await.is_some());
        drop(guard);
        assert!(cache.single_flight("k").await.is_some());
        let flights = cache.flights.as_ref().unwrap();
        assert!(flights.locks.lock().unwrap().is_empty());
    }
}
