//! Bucket reduction of raw samples
//!
//! Buckets are anchored to a fixed Monday origin so that weekly buckets start on Mondays and every
//! other bucket width divides evenly into the day.

use crate::types::{Measurement, TideSummary};

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;

/// Returns the origin of all bucket boundaries, Monday 2000-01-03T00:00:00Z.
pub fn bucket_origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 3, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Returns the start of the bucket of width `bucket` containing `timestamp`.
pub fn bucket_start(timestamp: DateTime<Utc>, bucket: Duration) -> DateTime<Utc> {
    let origin = bucket_origin();
    let step = bucket.num_seconds().max(1);
    let offset = (timestamp - origin).num_seconds();
    origin + Duration::seconds(offset.div_euclid(step) * step)
}

/// Running mean of the present values in a bucket.
#[derive(Default)]
struct Mean {
    sum: f64,
    count: u32,
}

impl Mean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(value) = value {
            self.sum += value;
            self.count += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }
}

/// Running means of the tide summaries in a bucket.
#[derive(Default)]
struct TideMeans {
    high: Mean,
    high_temperature: Mean,
    low: Mean,
    low_temperature: Mean,
    measurement_count: Option<u32>,
}

impl TideMeans {
    fn push(&mut self, summary: &TideSummary) {
        self.high.push(summary.high);
        self.high_temperature.push(summary.high_temperature);
        self.low.push(summary.low);
        self.low_temperature.push(summary.low_temperature);
        if let Some(count) = summary.measurement_count {
            self.measurement_count = Some(self.measurement_count.unwrap_or(0).saturating_add(count));
        }
    }

    /// Tide times do not survive reduction.
    fn get(&self) -> TideSummary {
        TideSummary {
            high: self.high.get(),
            high_time: None,
            high_temperature: self.high_temperature.get(),
            low: self.low.get(),
            low_time: None,
            low_temperature: self.low_temperature.get(),
            measurement_count: self.measurement_count,
        }
    }
}

#[derive(Default)]
struct Bucket {
    value: Mean,
    secondary_value: Mean,
    tide: Option<TideMeans>,
    rows: u32,
}

/// Reduce samples into buckets of width `bucket`.
///
/// Each output measurement carries the bucket start as its timestamp, the mean of the present
/// values in the bucket and the number of rows folded into it. Tide summaries are reduced field
/// by field in the same way, with measurement counts summed. Buckets without rows are omitted.
/// The output is ordered by timestamp then station.
pub fn reduce(samples: &[Measurement], bucket: Duration) -> Vec<Measurement> {
    let mut buckets: BTreeMap<(DateTime<Utc>, &str), Bucket> = BTreeMap::new();
    for sample in samples {
        let key = (bucket_start(sample.timestamp, bucket), sample.station.as_str());
        let entry = buckets.entry(key).or_default();
        entry.value.push(sample.value);
        entry.secondary_value.push(sample.secondary_value);
        if let Some(summary) = &sample.tide {
            entry.tide.get_or_insert_with(TideMeans::default).push(summary);
        }
        entry.rows += 1;
    }
    buckets
        .into_iter()
        .map(|((timestamp, station), bucket)| {
            let mut measurement = Measurement::new(
                station,
                timestamp,
                bucket.value.get(),
                bucket.secondary_value.get(),
            );
            measurement.sample_count = Some(bucket.rows);
            measurement.tide = bucket.tide.as_ref().map(TideMeans::get);
            measurement
        })
        .collect()
}
