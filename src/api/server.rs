use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::{
    services::{download, health, index, stats, upload},
    state::{AppState, StoreOpenError, Stores},
};
use crate::config::Config;
use crate::ledger::LedgerError;
use crate::reclaimer::spawn_reclaimer;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Open(#[from] StoreOpenError),
    #[error("failed to flush ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// HTTP routes over the given state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/operators/health", get(health))
        .route("/operators/stats", get(stats))
        .route("/{name}", get(download).put(upload))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run the upload/download service and the reclaimer until `shutdown` fires.
///
/// On shutdown the listener stops accepting connections, the reclaimer stops
/// after its current candidate, in-flight requests get
/// `server.shutdown_grace_secs` to finish and the ledger is flushed to disk.
/// An unexpected server exit cancels `shutdown` itself.
pub async fn run(
    config: Config,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let stores = Stores::open(&config)?;
    let grace = config.server.shutdown_grace();
    let reclaim_interval = config.retention.reclaim_interval();
    let state = AppState::from_stores(config, &stores);

    let reclaimer = spawn_reclaimer(
        Arc::new(state.reclaimer()),
        reclaim_interval,
        shutdown.clone(),
    );

    let address = listener.local_addr()?;
    info!(%address, "hako listening");

    let server = axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let mut serving = tokio::spawn(async move { server.await });

    let served = tokio::select! {
        result = &mut serving => result,
        _ = shutdown.cancelled() => {
            match tokio::time::timeout(grace, &mut serving).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(grace_secs = grace.as_secs(), "In-flight requests outlived shutdown grace, aborting");
                    serving.abort();
                    Ok(Ok(()))
                }
            }
        }
    };
    shutdown.cancel();

    if let Err(e) = reclaimer.await {
        error!(error = %e, "Reclaimer task failed");
    }

    stores.ledger.persist()?;
    info!("Shutdown complete");

    served??;
    Ok(())
}
