use std::sync::Arc;
use std::time::Duration;

use filament_sync_service::api::{combined_routes, AppState};
use filament_sync_service::clients::cloud::CloudClientHttp;
use filament_sync_service::clients::inv::InvClientHttp;
use filament_sync_service::config::ConfigStore;
use filament_sync_service::db::cache::LocalCache;
use filament_sync_service::db::create_pool;
use filament_sync_service::reconciler::Reconciler;
use filament_sync_service::scheduler::Scheduler;
use filament_sync_service::status::StatusReporter;
use poem::listener::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), std::io::Error> {
    let config = filament_sync_service::app_config::load()
        .map_err(|e| std::io::Error::other(format!("config error: {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config))
}

async fn async_main(config: filament_sync_service::app_config::AppConfig) -> Result<(), std::io::Error> {
    info!(environment = %config.environment, "starting filament sync service");

    let pool = create_pool(&config.db_path)
        .await
        .map_err(|e| std::io::Error::other(format!("db init error: {e}")))?;

    let config_store = ConfigStore::new(pool.clone());
    let cache = LocalCache::new(pool);

    let inv_base = config_store
        .inv_base()
        .await
        .map_err(|e| std::io::Error::other(format!("config error: {e}")))?;
    let cloud_base = config_store
        .cloud_base()
        .await
        .map_err(|e| std::io::Error::other(format!("config error: {e}")))?;
    let cloud_org_id = config_store
        .cloud_org_id()
        .await
        .map_err(|e| std::io::Error::other(format!("config error: {e}")))?;
    let cloud_token = config_store
        .cloud_token()
        .await
        .map_err(|e| std::io::Error::other(format!("config error: {e}")))?;

    let inv_client = Arc::new(InvClientHttp::new(&inv_base));
    let cloud_client = Arc::new(CloudClientHttp::new(
        &cloud_base,
        &cloud_org_id,
        cloud_token.expose().to_string(),
    ));
    let status = Arc::new(StatusReporter::new());

    let reconciler = Arc::new(Reconciler::new(
        inv_client,
        cloud_client,
        cache,
        config_store.clone(),
        status.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(reconciler));

    let interval_seconds = config_store
        .sync_interval_seconds()
        .await
        .map_err(|e| std::io::Error::other(format!("config error: {e}")))?;
    scheduler.start(Duration::from_secs(interval_seconds));

    let state = AppState {
        scheduler: scheduler.clone(),
        status,
    };

    let http_port = config.http_port;
    let app = combined_routes(&state);

    let mut shutdown = Box::pin(tokio::signal::ctrl_c());
    let server = poem::Server::new(TcpListener::bind(format!("0.0.0.0:{http_port}")));

    info!(http_port, "listening");
    tokio::select! {
        result = server.run(app) => {
            result?;
        }
        _ = &mut shutdown => {
            info!("shutdown signal received");
            scheduler.stop();
        }
    }

    Ok(())
}
