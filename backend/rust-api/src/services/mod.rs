use std::sync::Arc;
use std::time::Duration;

use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::Result;
use crate::storage::{
    migrations, AttemptStore, MemoryAttemptStore, MemoryProgressStore, MemoryQuotaStore,
    MongoAttemptStore, MongoProgressStore, ProgressStore, QuotaStore, RedisQuotaStore,
};
use crate::utils::time::{Clock, SystemClock};

pub mod attempt_manager;
pub mod event_bus;
pub mod event_gateway;
pub mod progress_service;
pub mod quota_ledger;
pub mod rank_table;
pub mod sweep_worker;

use attempt_manager::AttemptManager;
use progress_service::{run_reward_consumer, ProgressService};
use quota_ledger::QuotaLedger;
use rank_table::RankTable;

pub struct AppState {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub attempts: Arc<dyn AttemptStore>,
    pub quotas: Arc<dyn QuotaStore>,
    pub progress_store: Arc<dyn ProgressStore>,
    pub attempt_manager: AttemptManager,
    pub quota_ledger: Arc<QuotaLedger>,
    pub progress: Arc<ProgressService>,
    pub rank_table: Arc<RankTable>,
}

/// Opens the Redis connection manager and checks it with a PING.
pub async fn connect_redis(redis_client: redis::Client) -> anyhow::Result<ConnectionManager> {
    tracing::info!("Attempting to connect to Redis...");

    let redis = tokio::time::timeout(
        Duration::from_secs(30),
        ConnectionManager::new(redis_client),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    tracing::info!("Redis ConnectionManager created, testing with PING...");

    let mut conn = redis.clone();
    tokio::time::timeout(
        Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo: Database = mongo_client.database(&config.mongo_database);
        let redis = connect_redis(redis_client).await?;

        if config.attempts.run_migrations_on_start {
            let applied = migrations::apply_migrations(&mongo).await?;
            tracing::info!(?applied, "Startup migrations applied");
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let attempts = Arc::new(MongoAttemptStore::new(&mongo, clock.clone()));
        let quotas = Arc::new(RedisQuotaStore::new(redis));
        let progress_store = Arc::new(MongoProgressStore::new(&mongo));

        Ok(Self::assemble(
            config,
            clock,
            attempts,
            quotas,
            progress_store,
        )?)
    }

    /// State backed entirely by in-process stores. No external services needed.
    pub fn in_memory(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let attempts = Arc::new(MemoryAttemptStore::new(clock.clone()));
        let quotas = Arc::new(MemoryQuotaStore::new());
        let progress_store = Arc::new(MemoryProgressStore::new());
        Self::assemble(config, clock, attempts, quotas, progress_store)
    }

    /// Wires the services over the given stores and spawns the reward consumer,
    /// so it must run inside a tokio runtime.
    pub fn assemble(
        config: Config,
        clock: Arc<dyn Clock>,
        attempts: Arc<dyn AttemptStore>,
        quotas: Arc<dyn QuotaStore>,
        progress_store: Arc<dyn ProgressStore>,
    ) -> Result<Self> {
        let rank_table = Arc::new(RankTable::standard()?);
        let quota_ledger = Arc::new(QuotaLedger::new(
            quotas.clone(),
            config.quotas.clone(),
            clock.clone(),
        ));
        let progress = Arc::new(ProgressService::new(
            progress_store.clone(),
            rank_table.clone(),
        ));

        let (rewards_tx, rewards_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_reward_consumer(progress.clone(), rewards_rx));

        let attempt_manager = AttemptManager::new(
            attempts.clone(),
            quota_ledger.clone(),
            config.attempts.quota_resource.clone(),
            config.attempts.conflict_retries,
            rewards_tx,
        );

        Ok(Self {
            config,
            clock,
            attempts,
            quotas,
            progress_store,
            attempt_manager,
            quota_ledger,
            progress,
            rank_table,
        })
    }
}
