//! Web server

use crate::app::Service;
use crate::cli::CommandLineArgs;

use std::{
    net::SocketAddr,
    path::PathBuf,
    process::exit,
    str::FromStr,
    time::Duration,
};

use axum::ServiceExt;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use expanduser::expanduser;
use tokio::signal;
use tracing::{event, Level};

/// Serve the sea level API until a shutdown signal arrives
///
/// # Arguments
///
/// * `args`: Command line arguments
/// * `service`: The [Service] to serve
pub async fn serve(args: &CommandLineArgs, service: Service) {
    let addr = SocketAddr::from_str(&format!("{}:{}", args.host, args.port))
        .expect("invalid host name, IP address or port number");

    // Catch ctrl+c and try to shutdown gracefully
    let handle = Handle::new();
    tokio::spawn(shutdown_signal(
        handle.clone(),
        args.graceful_shutdown_timeout,
    ));

    let result = if args.https {
        let tls_config = RustlsConfig::from_pem_file(
            resolve_file(&args.cert_file, "TLS certificate"),
            resolve_file(&args.key_file, "TLS key"),
        )
        .await
        .expect("Failed to load TLS certificate files");
        event!(Level::INFO, "Listening on https://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(service.into_make_service())
            .await
    } else {
        event!(Level::INFO, "Listening on http://{}", addr);
        axum_server::bind(addr)
            .handle(handle)
            .serve(service.into_make_service())
            .await
    };
    if let Err(err) = result {
        event!(Level::ERROR, "Server failed: {}", err);
        exit(1)
    }
}

/// Expand `~` in `path` and make it absolute, exiting if the file does not exist.
fn resolve_file(path: &str, what: &str) -> PathBuf {
    let resolved = expanduser(path)
        .expect("Failed to expand ~ to user name. Please provide an absolute path instead.");
    match resolved.canonicalize() {
        Ok(absolute) if absolute.exists() => absolute,
        _ => {
            event!(
                Level::ERROR,
                "{} file expected at '{}' but not found.",
                what,
                resolved.display()
            );
            exit(1)
        }
    }
}

/// Graceful shutdown handler
///
/// Installs signal handlers to catch Ctrl-C or SIGTERM and trigger a graceful shutdown.
async fn shutdown_signal(handle: Handle, timeout: u64) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    event!(
        Level::INFO,
        "Signal received, shutting down within {} seconds",
        timeout
    );
    handle.graceful_shutdown(Some(Duration::from_secs(timeout)));
}
