//! Cleaning of fetched measurements
//!
//! Non-finite readings are removed, and short runs of missing readings between two valid
//! neighbours of the same station are filled by linear interpolation in time. Longer runs, and
//! runs at either end of a station's series, are left missing. Tide summaries only have
//! non-finite fields removed, since consecutive days are not interpolated.

use crate::types::Measurement;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Default longest run of missing readings filled by interpolation.
pub const DEFAULT_MAX_GAP: usize = 10;

/// Cleans measurement series in place.
#[derive(Clone, Copy, Debug)]
pub struct DataCleaner {
    max_gap: usize,
}

impl Default for DataCleaner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_GAP)
    }
}

impl DataCleaner {
    /// Returns a DataCleaner filling runs of at most `max_gap` missing readings.
    pub fn new(max_gap: usize) -> Self {
        Self { max_gap }
    }

    /// Clean `data` in place.
    ///
    /// Order, station and timestamp of every measurement are preserved, so cleaning is
    /// idempotent. Stations are cleaned independently and in parallel.
    pub fn clean(&self, data: &mut [Measurement]) {
        for measurement in data.iter_mut() {
            measurement.value = measurement.value.filter(|v| v.is_finite());
            measurement.secondary_value = measurement.secondary_value.filter(|v| v.is_finite());
            if let Some(summary) = &mut measurement.tide {
                summary.remove_non_finite();
            }
        }

        let view: &[Measurement] = data;
        // Indices of each station's measurements, in input order.
        let mut stations: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (index, measurement) in view.iter().enumerate() {
            stations
                .entry(measurement.station.as_str())
                .or_default()
                .push(index);
        }

        let fills: Vec<(usize, Option<f64>, Option<f64>)> = stations
            .into_par_iter()
            .flat_map_iter(|(_, indices)| {
                let times: Vec<DateTime<Utc>> = indices.iter().map(|&i| view[i].timestamp).collect();
                let values: Vec<Option<f64>> = indices.iter().map(|&i| view[i].value).collect();
                let secondary: Vec<Option<f64>> =
                    indices.iter().map(|&i| view[i].secondary_value).collect();
                let values = fill_gaps(&times, &values, self.max_gap);
                let secondary = fill_gaps(&times, &secondary, self.max_gap);
                indices
                    .into_iter()
                    .zip(values.into_iter().zip(secondary))
                    .map(|(index, (value, secondary))| (index, value, secondary))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (index, value, secondary_value) in fills {
            data[index].value = value;
            data[index].secondary_value = secondary_value;
        }
    }
}

/// Returns `values` with interior runs of at most `max_gap` missing entries interpolated.
///
/// Interpolation is linear in time between the valid neighbours, or linear in position when the
/// neighbours share a timestamp.
fn fill_gaps(times: &[DateTime<Utc>], values: &[Option<f64>], max_gap: usize) -> Vec<Option<f64>> {
    let mut filled = values.to_vec();
    let mut previous: Option<usize> = None;
    for (index, value) in values.iter().enumerate() {
        if value.is_none() {
            continue;
        }
        if let Some(before) = previous {
            let gap = index - before - 1;
            if gap > 0 && gap <= max_gap {
                let (v0, v1) = (values[before].unwrap_or_default(), values[index].unwrap_or_default());
                let span = (times[index] - times[before]).num_milliseconds() as f64;
                for missing in before + 1..index {
                    let fraction = if span > 0.0 {
                        (times[missing] - times[before]).num_milliseconds() as f64 / span
                    } else {
                        (missing - before) as f64 / (index - before) as f64
                    };
                    filled[missing] = Some(v0 + (v1 - v0) * fraction);
                }
            }
        }
        previous = Some(index);
    }
    filled
}
