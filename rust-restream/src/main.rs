use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rust_restream::api::{ApiServer, AppState};
use rust_restream::config::AppConfig;
use rust_restream::database::{
    self, ChannelRecordRepository, InMemoryChannelRecordRepository, SqlxChannelRecordRepository,
};
use rust_restream::logging::init_logging;
use rust_restream::manager::ChannelManager;
use rust_restream::resolver::build_resolver;
use rust_restream::store::SegmentStore;
use rust_restream::transcoder::TranscodeSupervisor;
use rust_restream::utils::fs::ensure_dir_all;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env_or_default();
    config.validate().context("invalid configuration")?;

    let (logging_config, _log_guard) =
        init_logging(&config.log_dir).context("failed to initialize logging")?;
    let background = CancellationToken::new();
    logging_config.start_retention_cleanup(background.clone());

    let records: Arc<dyn ChannelRecordRepository> = if config.database_url.is_empty() {
        warn!("DATABASE_URL is empty, channel records are kept in memory");
        Arc::new(InMemoryChannelRecordRepository::new())
    } else {
        let pool = database::init_pool(&config.database_url)
            .await
            .context("failed to open database")?;
        database::run_migrations(&pool).await?;
        Arc::new(SqlxChannelRecordRepository::new(pool))
    };

    let store = SegmentStore::new(config.store.clone());
    ensure_dir_all(store.root()).await?;
    info!(root = %store.root().display(), "Segment store ready");

    let supervisor = Arc::new(TranscodeSupervisor::new(config.transcoder.clone(), store));
    let resolver = build_resolver(&config.resolver);
    info!(resolver = resolver.name(), "Locator resolver ready");

    let manager = Arc::new(ChannelManager::new(
        supervisor,
        resolver,
        records,
        config.retry.clone(),
        config.pipeline.clone(),
    ));

    let state = AppState::new(manager.clone()).with_logging_config(logging_config);
    let server = ApiServer::new(config.api.clone(), state);

    let server_token = server.cancel_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Ctrl-C received, shutting down");
        server_token.cancel();
    });

    let served = server.run().await;

    manager.shutdown().await;
    background.cancel();
    info!("rust-restream stopped");

    served?;
    Ok(())
}
