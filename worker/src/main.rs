//! Blockchain Task Queue Worker
//!
//! Runs the whitelist, faucet and auto-invest queues against a shared SQLite
//! database. Several workers may point at the same database; each one stamps
//! its rows with its own worker id while it holds them.

mod config;
mod gateway;

use chain_queue::shutdown::spawn_ctrl_c_handler;
use chain_queue::{
    db, run_scheduled, AutoInvestQueue, AutoInvestStore, ChainGateway, FaucetQueue,
    PendingItems, QueueConfig, QueueKind, QueueWorker, RandomIds, Schedule, ShutdownSignal,
    SystemClock, TaskStore, TaskSubmitter, WhitelistQueue,
};
use clap::Parser;
use config::Config;
use gateway::JsonRpcGateway;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chain_queue=debug")),
        )
        .with_target(false)
        .init();

    let cli = Config::parse();
    let worker_id = cli.worker_id();

    info!("Chain queue worker starting...");
    info!("Worker id: {}", worker_id);
    info!("Config: {}", cli.config.display());

    let config = QueueConfig::load(&cli.config)?;
    for chain in &config.chains {
        info!(
            "  - Chain {} {} (whitelist: {}, faucet: {}, auto-invest: {})",
            chain.id, chain.name, chain.whitelist, chain.faucet, chain.auto_invest
        );
    }

    info!("Initializing database...");
    let pool = db::init_db(&cli.database_url, cli.max_connections).await?;
    info!("Database initialized");

    let clock = Arc::new(SystemClock);
    let ids = Arc::new(RandomIds);
    let gateway: Arc<dyn ChainGateway> = Arc::new(JsonRpcGateway::new(
        &config.chains,
        Duration::from_secs(cli.rpc_timeout_secs),
    )?);

    let tasks = TaskStore::new(pool.clone(), clock.clone(), ids.clone(), worker_id.clone());
    let pending = PendingItems::new(pool.clone(), clock.clone(), tasks.clone());

    let shutdown = ShutdownSignal::new();
    spawn_ctrl_c_handler(shutdown.clone());

    let mut handles: Vec<JoinHandle<u64>> = Vec::new();

    // Whitelist
    if config.whitelist.enabled {
        let submitter = WhitelistQueue::new(
            gateway.clone(),
            pending.clone(),
            config.chains_for(QueueKind::Whitelist),
        );
        let worker = QueueWorker::new(submitter, tasks.clone(), pending.clone(), &config)?;
        handles.push(spawn_queue_worker(worker, shutdown.clone()));
    } else {
        warn!("{} disabled", QueueKind::Whitelist);
    }

    // Faucet
    if config.faucet.enabled {
        let submitter = FaucetQueue::new(
            gateway.clone(),
            pending.clone(),
            config.chains_for(QueueKind::Faucet),
        );
        let worker = QueueWorker::new(submitter, tasks.clone(), pending.clone(), &config)?;
        handles.push(spawn_queue_worker(worker, shutdown.clone()));
    } else {
        warn!("{} disabled", QueueKind::Faucet);
    }

    // Auto-invest
    if config.auto_invest.queue.enabled {
        let store = AutoInvestStore::new(pool.clone(), clock.clone(), ids.clone(), worker_id.clone());
        let queue = AutoInvestQueue::new(
            store,
            gateway.clone(),
            config.auto_invest.clone(),
            config.chains_for(QueueKind::AutoInvest),
        )?;
        let schedule = Schedule::from(&config.auto_invest.queue);
        let signal = shutdown.clone();
        handles.push(tokio::spawn(async move {
            run_scheduled(QueueKind::AutoInvest.name(), schedule, signal, || queue.tick()).await
        }));
    } else {
        warn!("{} disabled", QueueKind::AutoInvest);
    }

    if handles.is_empty() {
        warn!("Every queue is disabled, nothing to do");
        return Ok(());
    }

    info!("Running {} queue(s), press Ctrl+C to stop", handles.len());

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!("Queue task panicked: {}", e);
        }
    }

    pool.close().await;
    info!("Shutdown complete");
    Ok(())
}

fn spawn_queue_worker<S>(worker: QueueWorker<S>, shutdown: ShutdownSignal) -> JoinHandle<u64>
where
    S: TaskSubmitter + 'static,
{
    let schedule = Schedule::from(worker.settings());
    let name = worker.submitter().queue().name();
    tokio::spawn(async move { run_scheduled(name, schedule, shutdown, || worker.tick()).await })
}
