use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use judge_pipeline::config::WorkerConfig;
use judge_pipeline::contest::RedisScoreboard;
use judge_pipeline::core::languages::LanguageTable;
use judge_pipeline::engine::executer::DockerExecutor;
use judge_pipeline::engine::sandbox::DockerRuntime;
use judge_pipeline::jobs::{self, judger::SubmissionWorker};
use judge_pipeline::queue::RedisJobQueue;
use judge_pipeline::redis_manager::RedisManager;
use judge_pipeline::store::RedisSubmissionStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("judge_pipeline=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env()?;
    info!("Starting judge worker {}...", config.worker_id);

    let languages = Arc::new(LanguageTable::load(config.languages_config.as_deref())?);
    match &config.languages_config {
        Some(path) => info!("Loaded language overrides from {}", path.display()),
        None => info!("Using built-in language table"),
    }

    // Fail fast when the Docker daemon is unreachable
    let runtime = DockerRuntime::connect(config.docker_socket.as_deref())?;
    runtime
        .ping()
        .await
        .context("Docker daemon is not reachable")?;
    info!("Connected to Docker");

    let redis = RedisManager::connect(&config.redis_url, &config.worker_id).await?;

    let queue = Arc::new(RedisJobQueue::new(&redis, config.queue_settings()).await);
    let store = Arc::new(RedisSubmissionStore::new(&redis));
    let scoreboard = Arc::new(RedisScoreboard::new(&redis));
    let executor = Arc::new(DockerExecutor::new(
        Arc::new(runtime),
        languages,
        config.sandbox.clone(),
    ));
    let worker = Arc::new(SubmissionWorker::new(executor, store, scoreboard));

    info!(
        "Sandbox settings: pids_limit={}, grace={}s, auto_remove={}",
        config.sandbox.pids_limit,
        config.sandbox.grace.as_secs(),
        config.sandbox.auto_remove
    );
    info!("Waiting for jobs...");

    jobs::run_consumer(queue, worker, config.consumer_settings(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    })
    .await
}
