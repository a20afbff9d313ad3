use crate::cli::{CommandLineArgs, StoreKind};
use crate::outlier::iqr::IqrRule;
use crate::outlier::southern_baseline::{BaselineTable, SouthernBaseline};
use crate::outlier::{OutlierDetector, OutlierStrategy};
use crate::pipeline::Pipeline;
use crate::store::{MeasurementStore, StoreError};
use crate::store_memory::MemoryStore;

use std::sync::Arc;
use tracing::{event, Level};

/// Shared application state passed to each request handler.
#[derive(Debug)]
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Retrieval pipeline.
    pub pipeline: Pipeline,
}

impl AppState {
    /// Create and return an [AppState], opening the store configured by `args`.
    pub fn new(args: &CommandLineArgs) -> Result<Self, StoreError> {
        Ok(Self::with_store(args, open_store(args)?))
    }

    /// Create and return an [AppState] reading from `store`.
    pub fn with_store(args: &CommandLineArgs, store: Arc<dyn MeasurementStore>) -> Self {
        let detector = build_detector(args);
        Self {
            args: args.clone(),
            pipeline: Pipeline::new(args, store, detector),
        }
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;

/// Open the measurement store selected by `args`.
fn open_store(args: &CommandLineArgs) -> Result<Arc<dyn MeasurementStore>, StoreError> {
    match args.store {
        StoreKind::Memory => match &args.fixture_file {
            Some(path) => Ok(Arc::new(MemoryStore::from_file(path)?)),
            None => {
                event!(
                    Level::WARN,
                    "No fixture file configured, serving an empty memory store"
                );
                Ok(Arc::new(MemoryStore::new()))
            }
        },
        StoreKind::Postgres => open_postgres(args),
    }
}

#[cfg(feature = "postgres")]
fn open_postgres(args: &CommandLineArgs) -> Result<Arc<dyn MeasurementStore>, StoreError> {
    let url = args
        .database_url
        .as_deref()
        .ok_or_else(|| StoreError::Connection("no database URL configured".to_string()))?;
    Ok(Arc::new(crate::store_postgres::PostgresStore::connect_lazy(
        url,
        args.database_pool_size,
    )?))
}

#[cfg(not(feature = "postgres"))]
fn open_postgres(_args: &CommandLineArgs) -> Result<Arc<dyn MeasurementStore>, StoreError> {
    Err(StoreError::Connection(
        "built without the postgres feature".to_string(),
    ))
}

/// Build the outlier detector configured by `args`.
///
/// A baseline table that fails to load disables the southern baseline rules rather than failing
/// startup; detection then relies on the IQR rule.
fn build_detector(args: &CommandLineArgs) -> OutlierDetector {
    let primary: Option<Box<dyn OutlierStrategy>> = if args.disable_baseline_rules {
        None
    } else {
        match &args.baseline_file {
            None => Some(Box::new(SouthernBaseline::default())),
            Some(path) => match BaselineTable::from_file(path) {
                Ok(table) => Some(Box::new(SouthernBaseline::new(table))),
                Err(err) => {
                    event!(
                        Level::WARN,
                        "Southern baseline rules unavailable, using the IQR rule only: {}",
                        err
                    );
                    None
                }
            },
        }
    };
    OutlierDetector::new(primary, Box::new(IqrRule::new(args.iqr_multiplier)))
}
