//! This crate provides a sea level measurement server. It answers time range queries over tide
//! gauge stations, choosing the temporal resolution of each response from the length of the
//! requested range so that long ranges stay small enough to plot.
//!
//! Each request flows through a retrieval pipeline:
//!
//! * [planner] picks an aggregation level for the date range.
//! * [executor] fetches raw or bucketed measurements from a [store::MeasurementStore].
//! * [cleaner] repairs missing and non-finite values by interpolation.
//! * [outlier] optionally classifies values, with the southern baseline rules as the primary
//!   strategy and the interquartile range rule as the fallback.
//! * [cache] keeps processed results for a level-dependent time to live.
//! * [assembler] writes the records in the external JSON format.
//!
//! The server is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team.
//! * [Serde](serde) performs (de)serialisation of JSON fixtures and response data.
//! * [Rayon](rayon) parallelises cleaning across stations.
//! * [ndarray] and [ndarray_stats] compute the quantiles used by outlier detection.
//! * [SQLx](https://docs.rs/sqlx), behind the `postgres` feature, reads a PostgreSQL store.

pub mod aggregate;
pub mod app;
pub mod app_state;
pub mod assembler;
pub mod cache;
pub mod cleaner;
pub mod cli;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod models;
pub mod outlier;
pub mod pipeline;
pub mod planner;
pub mod resource_manager;
pub mod server;
pub mod store;
pub mod store_memory;
#[cfg(feature = "postgres")]
pub mod store_postgres;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod types;
pub mod validated_query;
