pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod media;
pub mod model;
pub mod store;

use std::sync::Arc;
use tokio::net::TcpListener;

pub use api::{create_app, create_router, AppContext, AppState};
pub use error::{ErrorResponse, PortfolioError};
pub use logic::PortfolioService;
pub use model::*;
pub use store::{MemoryStore, PortfolioStore, PostgresStore};

use crate::config::{AppConfig, MediaConfig};
use crate::media::{
    ContentStorage, FfmpegProber, FileCleanup, LocalContentStorage, MediaIngestor, MediaProber,
};

/// Wire the service and ingestion pipeline around an opened store.
pub fn build_state<S: PortfolioStore + 'static>(
    store: Arc<S>,
    storage: Arc<dyn ContentStorage>,
    prober: Arc<dyn MediaProber>,
    media: &MediaConfig,
) -> AppState<S> {
    let cleanup = FileCleanup::new(Arc::clone(&storage));
    let ingestor = MediaIngestor::new(
        storage,
        prober,
        media.public_prefix.clone(),
        media.thumbnail_width,
    );

    Arc::new(AppContext {
        service: PortfolioService::new(store, cleanup),
        ingestor,
    })
}

/// Serve the application on the configured address until Ctrl+C or SIGTERM.
/// The store stays owned by the caller, who closes it afterwards.
pub async fn run_server<S: PortfolioStore + 'static>(
    store: Arc<S>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let storage = Arc::new(LocalContentStorage::new(&config.media.upload_dir));
    storage.ensure_dir().await?;

    let prober = Arc::new(FfmpegProber::new(
        &config.media.ffprobe_path,
        &config.media.ffmpeg_path,
        config.media.probe_timeout(),
    ));

    let state = build_state(store, storage, prober, &config.media);
    let app = create_app(state, config);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!(
        "portfolio server listening on http://{} uploads={} served_at={}",
        bind_address,
        config.media.upload_dir,
        config.media.public_prefix
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                log::error!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("received Ctrl+C"),
        _ = terminate => log::info!("received terminate signal"),
    }

    log::info!("shutting down gracefully");
}
