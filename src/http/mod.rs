//! HTTP surface: routing, shared state and server bootstrap.

mod api;
mod build;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::DaemonConfig;
use crate::history::BuildHistory;
use crate::queue::BuildQueue;
use crate::runner::{CommandRunner, ProcessRunner};

pub struct AppState {
    pub config: DaemonConfig,
    pub queue: Arc<BuildQueue>,
    pub history: BuildHistory,
    pub runner: Arc<dyn CommandRunner>,
    /// Served by `/v1/key`.
    pub public_key: PathBuf,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: DaemonConfig, runner: Arc<dyn CommandRunner>) -> SharedState {
        let public_key = dirs::home_dir()
            .unwrap_or_default()
            .join(".ssh")
            .join("id_rsa.pub");
        Self::with_public_key(config, runner, public_key)
    }

    pub fn with_public_key(
        config: DaemonConfig,
        runner: Arc<dyn CommandRunner>,
        public_key: PathBuf,
    ) -> SharedState {
        Arc::new(Self {
            history: BuildHistory::new(config.keep),
            queue: BuildQueue::new(),
            config,
            runner,
            public_key,
        })
    }
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(api::index))
        .route("/v1/builds", get(api::list_builds))
        .route("/v1/builds/", get(api::list_builds))
        .route("/v1/key", get(api::public_key))
        .route("/v1/key/", get(api::public_key))
        .route("/v1/build/{*repo_url}", get(build::trigger_build))
        .fallback(api::fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds the configured address and serves until Ctrl-C or SIGTERM.
pub async fn serve(config: DaemonConfig) -> Result<()> {
    let runner = Arc::new(ProcessRunner::new(config.identity.clone()));
    let state = AppState::new(config, runner);

    let address = state.config.address.clone();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;

    serve_on(listener, state, shutdown_signal()).await
}

/// Serves `state` on an already bound listener until `shutdown` resolves.
pub async fn serve_on<F>(listener: TcpListener, state: SharedState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr().context("Failed to read listener address")?;
    tracing::info!(
        address = %local_addr,
        workdir = %state.config.workdir.display(),
        user = state.config.identity.name(),
        "listening"
    );

    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    tracing::info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "can't listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "can't listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutting down");
}
