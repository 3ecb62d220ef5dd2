use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use glowlisting_server::{
    config::{Config, StorageBackend},
    create_app,
    handlers::AppState,
    services::{
        GeoLocator, HttpEnhancer, HttpGeoLocator, ImageEnhancer, NoopGeoLocator,
        PassthroughEnhancer,
    },
    storage::ImageVault,
    store::{LedgerStore, MemoryLedgerStore, PgLedgerStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn LedgerStore> = match config.storage_backend {
        StorageBackend::Postgres => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                anyhow::anyhow!("DATABASE_URL is required for the postgres backend")
            })?;
            let store = PgLedgerStore::connect(url).await?;
            store.migrate().await?;
            tracing::info!("connected to postgres ledger store");
            Arc::new(store)
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory ledger store; state will not survive a restart");
            Arc::new(MemoryLedgerStore::new())
        }
    };

    let enhancer: Arc<dyn ImageEnhancer> = match &config.enhancer_url {
        Some(url) => Arc::new(HttpEnhancer::new(
            url.clone(),
            config.enhancer_api_key.clone(),
            config.enhancer_timeout_secs,
        )?),
        None => {
            tracing::warn!("ENHANCER_URL not set; enhancements will pass images through unchanged");
            Arc::new(PassthroughEnhancer)
        }
    };

    let geo: Arc<dyn GeoLocator> = match &config.geo_lookup_url {
        Some(url) => Arc::new(HttpGeoLocator::new(url.clone())),
        None => Arc::new(NoopGeoLocator),
    };

    let vault = Arc::new(ImageVault::new(&config.vault_dir)?);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState {
        store,
        enhancer,
        geo,
        vault,
        config,
    };
    let app = create_app(state);

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
