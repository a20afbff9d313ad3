//! Command Line Interface (CLI) arguments.

use crate::planner::AggregationPolicy;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Measurement store backends
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum StoreKind {
    /// Samples loaded from a JSON fixture file
    #[default]
    Memory,
    /// PostgreSQL tide gauge tables
    Postgres,
}

/// Sea level server command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "SEALEVEL_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8080, env = "SEALEVEL_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "SEALEVEL_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/sealevel/certs/cert.pem",
        env = "SEALEVEL_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/sealevel/certs/key.pem",
        env = "SEALEVEL_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for requests to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "SEALEVEL_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Whether to enable sending traces to Jaeger.
    #[arg(long, default_value_t = false, env = "SEALEVEL_ENABLE_JAEGER")]
    pub enable_jaeger: bool,
    /// How to choose the aggregation level of a response.
    #[arg(
        long,
        value_enum,
        default_value_t = AggregationPolicy::Adaptive,
        env = "SEALEVEL_AGGREGATION_POLICY"
    )]
    pub aggregation_policy: AggregationPolicy,
    /// Longest date range accepted, in days.
    #[arg(long, default_value_t = 365, env = "SEALEVEL_MAX_RANGE_DAYS")]
    pub max_range_days: i64,
    /// Time budget in seconds for querying and processing a request.
    #[arg(long, default_value_t = 25, env = "SEALEVEL_REQUEST_TIMEOUT")]
    pub request_timeout: u64,
    /// Measurement store backend.
    #[arg(long, value_enum, default_value_t = StoreKind::Memory, env = "SEALEVEL_STORE")]
    pub store: StoreKind,
    /// JSON fixture file for the memory store.
    #[arg(long, env = "SEALEVEL_FIXTURE_FILE")]
    pub fixture_file: Option<PathBuf>,
    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,
    /// Size of the PostgreSQL connection pool.
    #[arg(long, default_value_t = 10, env = "SEALEVEL_DATABASE_POOL_SIZE")]
    pub database_pool_size: u32,
    /// Maximum number of concurrent store queries.
    #[arg(long, env = "SEALEVEL_STORE_CONNECTION_LIMIT")]
    pub store_connection_limit: Option<usize>,
    /// Maximum number of concurrent CPU-bound processing tasks. Defaults to the number of CPUs
    /// minus one.
    #[arg(long, env = "SEALEVEL_THREAD_LIMIT")]
    pub thread_limit: Option<usize>,
    /// Whether to use Rayon for execution of CPU-bound tasks.
    #[arg(long, default_value_t = false, env = "SEALEVEL_USE_RAYON")]
    pub use_rayon: bool,
    /// Whether to cache results.
    #[arg(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        env = "SEALEVEL_USE_CACHE"
    )]
    pub use_cache: bool,
    /// Lifetime in seconds of cached raw results.
    #[arg(long, default_value_t = 120, env = "SEALEVEL_CACHE_TTL")]
    pub cache_ttl: u64,
    /// Lifetime in seconds of cached aggregated results.
    #[arg(long, default_value_t = 120, env = "SEALEVEL_CACHE_TTL_AGGREGATED")]
    pub cache_ttl_aggregated: u64,
    /// Maximum number of cached results.
    #[arg(long, default_value_t = 256, env = "SEALEVEL_CACHE_CAPACITY")]
    pub cache_capacity: usize,
    /// Whether concurrent requests for the same result should wait for a single computation.
    #[arg(long, default_value_t = false, env = "SEALEVEL_SINGLE_FLIGHT")]
    pub single_flight: bool,
    /// Longest run of missing samples filled by interpolation.
    #[arg(long, default_value_t = 10, env = "SEALEVEL_MAX_INTERPOLATION_GAP")]
    pub max_interpolation_gap: usize,
    /// Multiple of the interquartile range beyond which the fallback detector flags outliers.
    #[arg(long, default_value_t = 1.5, env = "SEALEVEL_IQR_MULTIPLIER")]
    pub iqr_multiplier: f64,
    /// Whether to skip the southern baseline rules and detect outliers with the IQR rule only.
    #[arg(long, default_value_t = false, env = "SEALEVEL_DISABLE_BASELINE_RULES")]
    pub disable_baseline_rules: bool,
    /// JSON file replacing the built-in southern baseline reference table.
    #[arg(long, env = "SEALEVEL_BASELINE_FILE")]
    pub baseline_file: Option<PathBuf>,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
