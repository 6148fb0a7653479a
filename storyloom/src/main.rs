use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use storyloom::api::server::MEDIA_MOUNT;
use storyloom::api::{ApiServer, AppState};
use storyloom::config::AppConfig;
use storyloom::database::{
    self,
    repositories::{SqlxArtifactRepository, SqlxGenerationLogRepository},
};
use storyloom::pipeline::{GenerationManager, InMemoryTaskRegistry, Pipelines, ProviderSet};
use storyloom::providers::{HttpAssetDownloader, HttpGateway, RetryPolicy, gateway};
use storyloom::storage::{LocalStorage, ObjectStorage, OrphanReclaimer};
use storyloom::{logging, panic_hook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut config = AppConfig::from_env().context("invalid configuration")?;

    let (logging_config, _log_guard) =
        logging::init_logging(&config.log_dir).context("failed to initialize logging")?;
    panic_hook::install();

    let shutdown = CancellationToken::new();
    logging_config.start_retention_cleanup(config.log_retention_days, shutdown.clone());

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let logs = Arc::new(SqlxGenerationLogRepository::new(pool.clone()));
    let artifacts = Arc::new(SqlxArtifactRepository::new(pool.clone()));

    let client = gateway::build_http_client(config.request_timeout)?;
    let gateway = Arc::new(HttpGateway::new(config.gateway_config(), client.clone())?);
    let providers = ProviderSet {
        text: gateway.clone(),
        images: gateway.clone(),
        speech: gateway.clone(),
        music: gateway.clone(),
        video: gateway.clone(),
        enhancer: gateway.clone(),
        analyzer: gateway,
        downloader: Arc::new(HttpAssetDownloader::new(client, RetryPolicy::default())),
    };

    let storage: Arc<dyn ObjectStorage> = Arc::new(LocalStorage::new(
        &config.storage_dir,
        config.media_base_url.clone(),
    ));
    if config.media_base_url.trim_end_matches('/') == MEDIA_MOUNT {
        config.api.media_dir = Some(config.storage_dir.clone());
    }

    let pipelines = Pipelines::new(&providers, Arc::clone(&storage), &config.pipeline_settings());
    let manager = Arc::new(GenerationManager::new(
        pipelines,
        Arc::new(InMemoryTaskRegistry::new()),
        logs,
        artifacts.clone(),
    ));

    let reclaimer = Arc::new(OrphanReclaimer::new(
        storage,
        artifacts,
        config.reclaimer_config(),
    ));
    let reclaimer_task = reclaimer.start_background_task(shutdown.clone());

    let server = ApiServer::new(
        config.api.clone(),
        AppState::new(Arc::clone(&manager), reclaimer).with_logging_config(logging_config),
        shutdown.clone(),
    );

    let ctrl_c = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        })
    };

    info!(version = env!("CARGO_PKG_VERSION"), "storyloom started");
    let served = server.run().await;

    shutdown.cancel();
    ctrl_c.abort();
    manager.shutdown().await;
    if let Some(handle) = reclaimer_task {
        let _ = handle.await;
    }
    pool.close().await;
    info!("storyloom stopped");

    served.map_err(Into::into)
}
