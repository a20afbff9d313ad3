//! Aggregation planning
//!
//! Long date ranges of one-minute samples make payloads that grow linearly with the range. The
//! planner trades temporal detail for a bounded payload by choosing a coarser aggregation level
//! as the range grows.

use crate::types::AggregationLevel;

use chrono::{Duration, NaiveDate};
use tracing::{event, Level};

/// Policy used to choose an aggregation level.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum AggregationPolicy {
    /// Choose a level from the length of the requested range.
    #[default]
    Adaptive,
    /// Always return raw samples regardless of range, at the cost of latency.
    AlwaysRaw,
}

/// Maps a requested date range to an aggregation level.
#[derive(Clone, Copy, Debug, Default)]
pub struct AggregationPlanner {
    policy: AggregationPolicy,
}

impl AggregationPlanner {
    /// Returns a new AggregationPlanner using `policy`.
    pub fn new(policy: AggregationPolicy) -> Self {
        Self { policy }
    }

    /// Returns the configured policy.
    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    /// Plan the aggregation level for a date range.
    ///
    /// Returns the level and its bucket duration (`None` for raw data).
    /// Never fails: open ranges and inverted ranges degrade to raw data.
    ///
    /// # Arguments
    ///
    /// * `start`: Optional first day of the range
    /// * `end`: Optional last day of the range, inclusive
    pub fn plan(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> (AggregationLevel, Option<Duration>) {
        let level = match (self.policy, start, end) {
            (AggregationPolicy::AlwaysRaw, _, _) => AggregationLevel::Raw,
            (AggregationPolicy::Adaptive, Some(start), Some(end)) => {
                if end < start {
                    event!(
                        Level::WARN,
                        "Inverted date range {} to {}, falling back to raw data",
                        start,
                        end
                    );
                    AggregationLevel::Raw
                } else {
                    level_for_days(inclusive_days(start, end))
                }
            }
            // Without both ends of the range its size is unknown.
            (AggregationPolicy::Adaptive, _, _) => AggregationLevel::Raw,
        };
        (level, level.bucket())
    }
}

/// Returns the number of days in a range, counting both ends.
pub fn inclusive_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

/// Returns the aggregation level for a range of `days` days.
///
/// Each bound belongs to the row it closes, so a range of exactly 7 days is served at 5 minute
/// resolution and a range of 8 days at 15 minute resolution.
pub fn level_for_days(days: i64) -> AggregationLevel {
    match days {
        i64::MIN..=3 => AggregationLevel::Raw,
        4..=7 => AggregationLevel::FiveMinutes,
        8..=14 => AggregationLevel::FifteenMinutes,
        15..=30 => AggregationLevel::Hourly,
        31..=90 => AggregationLevel::ThreeHourly,
        91..=180 => AggregationLevel::Daily,
        _ => AggregationLevel::Weekly,
    }
}
