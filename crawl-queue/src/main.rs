use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crawl_queue::api::{ApiServer, AppState};
use crawl_queue::config::AppConfig;
use crawl_queue::crawler::DockerArchiveRunner;
use crawl_queue::database::{self, repositories::SqlxJobRepository};
use crawl_queue::logging::init_logging;
use crawl_queue::publisher::ResultPublisher;
use crawl_queue::scheduler::Scheduler;
use crawl_queue::utils::fs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let (logging_config, _log_guard) = init_logging(&config.log_dir)?;

    if config.api_token.is_none() {
        warn!("API_TOKEN is not set; every protected API request will be rejected");
    }
    match &config.publish {
        Some(publish) => info!(bucket = %publish.bucket, "Publishing crawl output to object storage"),
        None => info!("S3_BUCKET is not set; crawl output stays on local disk"),
    }

    fs::ensure_dir_all_with_op("creating crawls directory", &config.crawler.crawls_dir).await?;

    let pool = database::init_pool(&config.database_url)
        .await
        .context("cannot open record store")?;
    database::run_migrations(&pool).await?;
    let write_pool = database::init_write_pool(&config.database_url)
        .await
        .context("cannot open record store for writing")?;
    let repository = Arc::new(SqlxJobRepository::new(pool, write_pool));

    let shutdown = CancellationToken::new();
    logging_config.start_retention_cleanup(shutdown.child_token());

    let scheduler = Arc::new(Scheduler::new(
        config.scheduler.clone(),
        repository.clone(),
        Arc::new(DockerArchiveRunner::new(config.crawler.clone())),
        Arc::new(ResultPublisher::from_config(config.publish.as_ref())),
        shutdown.child_token(),
    ));

    if let Some(older_than) = config.orphan_timeout {
        scheduler.reconcile_orphans(older_than).await?;
    }

    let state = AppState::new(repository)
        .with_api_token(config.api_token.clone())
        .with_publish(config.publish.clone())
        .with_logging_config(logging_config);
    let server = ApiServer::new(config.api.clone(), state).with_cancel_token(shutdown.child_token());

    let scheduler_task = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Received shutdown signal");
            shutdown.cancel();
        }
    });

    let served = server.run().await;
    shutdown.cancel();

    if let Err(e) = scheduler_task.await {
        error!("Scheduler task ended abnormally: {}", e);
    }

    info!("crawl-queue stopped");
    served.map_err(Into::into)
}
