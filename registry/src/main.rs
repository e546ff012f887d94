use gateway_registry::config::{Config, StorageBackend};
use gateway_registry::db::{self, PgDeviceRepository, PgGatewayRepository};
use gateway_registry::memory::MemoryStore;
use gateway_registry::repository::{DeviceRepository, GatewayRepository};
use gateway_registry::service::GatewayService;
use gateway_registry::{metrics, rest};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    info!("Starting gateway registry");
    info!("HTTP server: {}", config.http_addr);
    info!("Storage: {:?}", config.storage);
    info!("Max devices per gateway: {}", config.max_devices_per_gateway);

    metrics::init_metrics()?;

    let (gateways, devices): (Arc<dyn GatewayRepository>, Arc<dyn DeviceRepository>) =
        match config.storage {
            StorageBackend::Postgres => {
                info!("Database: {}", config.redacted_database_url());
                let pool = match db::make_pool(
                    &config.database_url,
                    config.db_max_connections,
                    config.db_acquire_timeout,
                )
                .await
                {
                    Ok(pool) => pool,
                    Err(e) => {
                        error!("Failed to connect to database: {}", e);
                        std::process::exit(1);
                    }
                };
                let gateways: Arc<dyn GatewayRepository> =
                    Arc::new(PgGatewayRepository::new(pool.clone()));
                let devices: Arc<dyn DeviceRepository> = Arc::new(PgDeviceRepository::new(pool));
                (gateways, devices)
            }
            StorageBackend::Memory => {
                warn!("Using in-memory storage; data is lost on shutdown");
                let store = MemoryStore::new();
                let gateways: Arc<dyn GatewayRepository> = Arc::new(store.gateways());
                let devices: Arc<dyn DeviceRepository> = Arc::new(store.devices());
                (gateways, devices)
            }
        };

    let service = GatewayService::new(gateways, devices, config.max_devices_per_gateway);
    let app = rest::create_router(service, config.cors_origin.as_deref());

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");
        })
        .await?;

    info!("Shutting down");
    Ok(())
}
