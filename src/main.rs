use portfolio_media::config::{AppConfig, StoreBackend};
use portfolio_media::store::{MemoryStore, PortfolioStore, PostgresStore};
use portfolio_media::run_server;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::{Builder, Env};
    use log::LevelFilter;

    Builder::from_env(Env::default().default_filter_or("info"))
        .filter_module("sqlx", LevelFilter::Warn)
        .init();

    let config = AppConfig::load()?;
    log::info!(
        "configuration loaded: server={} backend={:?}",
        config.server_address(),
        config.database.backend
    );

    match config.database.backend {
        StoreBackend::Postgres => {
            log::info!("connecting to PostgreSQL");
            let store = PostgresStore::new(&config.database_url(), config.max_connections()).await?;
            store.migrate().await?;
            serve(Arc::new(store), &config).await
        }
        StoreBackend::Memory => {
            log::warn!("using the in-memory store; data is lost on restart");
            serve(Arc::new(MemoryStore::new()), &config).await
        }
    }
}

async fn serve<S: PortfolioStore + 'static>(store: Arc<S>, config: &AppConfig) -> anyhow::Result<()> {
    let result = run_server(Arc::clone(&store), config).await;
    store.close().await;
    log::info!("store closed");
    result
}
