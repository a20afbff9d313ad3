pub mod aggregation_level;
pub mod measurement;
pub mod tide;

// Re-export types for convenience.
pub use crate::types::aggregation_level::AggregationLevel;
pub use crate::types::measurement::{AnomalyFlag, Measurement};
pub use crate::types::tide::TideSummary;
