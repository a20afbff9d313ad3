//! This file defines the sealevel binary entry point.

use sealevel::app;
use sealevel::app_state::AppState;
use sealevel::cli;
use sealevel::metrics;
use sealevel::server;
use sealevel::tracing;

use std::process::exit;
use std::sync::Arc;

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing(&args);
    ::tracing::debug!("{:?}", args);
    metrics::register_metrics();
    let state = match AppState::new(&args) {
        Ok(state) => state,
        Err(err) => {
            ::tracing::error!("Failed to open the measurement store: {}", err);
            exit(1)
        }
    };
    let service = app::service(Arc::new(state));
    server::serve(&args, service).await;
    tracing::shutdown_tracing();
}
