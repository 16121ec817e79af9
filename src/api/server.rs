use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::{
    services::{
        cleanup_jobs, delete_job, download_artifact, get_job, health, list_job_files, list_jobs,
        metrics, pause_job, restart_job, resume_job, submit_job,
    },
    state::AppState,
};
use crate::config::{Config, EngineKind};
use crate::engine::{SimulatedEngine, TransferEngine};
use crate::ledger::FjallStore;
use crate::observability::Metrics;
use crate::service::JobService;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All routes, with request decompression and HTTP tracing
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/{job_id}", get(get_job).delete(delete_job))
        .route("/jobs/{job_id}/pause", post(pause_job))
        .route("/jobs/{job_id}/resume", post(resume_job))
        .route("/jobs/{job_id}/restart", post(restart_job))
        .route("/jobs/{job_id}/files", get(list_job_files))
        .route("/jobs/{job_id}/artifact", get(download_artifact))
        .route("/operators/cleanup/{status}", post(cleanup_jobs))
        .route("/operators/metrics", get(metrics))
        .route("/operators/health", get(health))
        .route("/health", get(health))
        .with_state(state)
        // Automatically decompress gzip request bodies
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Engine selected by `engine.kind`
pub fn build_engine(config: &Config) -> Arc<dyn TransferEngine> {
    match config.engine.kind {
        EngineKind::Simulated => Arc::new(SimulatedEngine::new(config.engine.simulated.clone())),
    }
}

/// Open the ledger, wire the service, recover interrupted jobs and serve
/// until SIGINT/SIGTERM.
pub async fn run(config: Config, engine: Arc<dyn TransferEngine>) -> Result<(), AnyError> {
    info!(path = %config.server.fjall_path.display(), "Opening Fjall store");
    let store = FjallStore::open(&config.server.fjall_path)
        .map_err(|e| format!("Failed to open Fjall store: {}", e))?;

    tokio::fs::create_dir_all(&config.downloads.download_dir)
        .await
        .map_err(|e| {
            format!(
                "Failed to create download dir {}: {}",
                config.downloads.download_dir.display(),
                e
            )
        })?;

    let service = JobService::build(
        store.clone(),
        engine,
        Arc::new(Metrics::new()),
        config.orchestrator_config(),
        &config.downloads.archive_suffix,
        config.service_settings(),
    );

    if let Err(err) = service.prune_idempotency_keys() {
        warn!(error = %err, "Idempotency pruning failed");
    }

    if config.downloads.recover_on_startup {
        service
            .recover()
            .map_err(|e| format!("Startup recovery failed: {}", e))?;
    }

    let address = config.server.bind_addr;
    let state = AppState::new(config, service);
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "Seedbox API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.persist()?;
    info!("Ledger persisted, bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
