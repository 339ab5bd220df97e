//! Bulwark server binary.

use std::sync::Arc;

use anyhow::Context as _;
use bulwark_core::{ClockSource, SystemClock};
use bulwark_server::admission::AdmissionController;
use bulwark_server::background::build_notifier;
use bulwark_server::config::ServerArgs;
use bulwark_server::network::{NetworkModule, Services};
use bulwark_server::storage::{
    MemoryMovieStore, MemoryPermissionStore, MemoryTokenStore, MemoryUserStore,
};
use bulwark_server::telemetry;
use bulwark_server::traits::MovieStore;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    telemetry::init_tracing(args.log_format)?;

    if let Some(addr) = args.metrics_addr {
        telemetry::install_metrics_exporter(addr)?;
    }

    let limiter = args.limiter_config().context("invalid limiter settings")?;
    let clock: Arc<dyn ClockSource> = Arc::new(SystemClock);
    let notifier = build_notifier(&args.notifier_config())?;
    let movies = movie_store(&args, Arc::clone(&clock)).await?;

    info!(
        rps = limiter.refill_rate,
        burst = limiter.capacity,
        enabled = limiter.enabled,
        "rate limiter configured"
    );

    let services = Services {
        admission: Arc::new(AdmissionController::new(limiter, Arc::clone(&clock))),
        movies,
        users: Arc::new(MemoryUserStore::new(Arc::clone(&clock))),
        tokens: Arc::new(MemoryTokenStore::new(Arc::clone(&clock))),
        permissions: Arc::new(MemoryPermissionStore::new()),
        notifier,
        clock,
    };

    let mut module = NetworkModule::new(args.network_config(), services);
    module.start().await?;
    module.serve(shutdown_signal()).await?;

    info!("server stopped");
    Ok(())
}

#[cfg(feature = "postgres")]
async fn movie_store(
    args: &ServerArgs,
    clock: Arc<dyn ClockSource>,
) -> anyhow::Result<Arc<dyn MovieStore>> {
    use bulwark_server::storage::PostgresMovieStore;

    if let Some(dsn) = &args.db_dsn {
        let store = PostgresMovieStore::connect(dsn).await?;
        store.initialize().await?;
        return Ok(Arc::new(store));
    }
    Ok(Arc::new(MemoryMovieStore::new(clock)))
}

#[cfg(not(feature = "postgres"))]
#[allow(clippy::unused_async)]
async fn movie_store(
    _args: &ServerArgs,
    clock: Arc<dyn ClockSource>,
) -> anyhow::Result<Arc<dyn MovieStore>> {
    Ok(Arc::new(MemoryMovieStore::new(clock)))
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
