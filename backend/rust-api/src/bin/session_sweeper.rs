use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::fmt::init;

use quizarena_api::{
    config::Config,
    services::sweep_worker::SweepWorker,
    storage::MongoAttemptStore,
    utils::time::{Clock, SystemClock},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load().context("Failed to load configuration")?;

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .context("Failed to connect to MongoDB")?;
    let db = mongo_client.database(&config.mongo_database);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(MongoAttemptStore::new(&db, clock.clone()));

    let worker = SweepWorker::new(store, clock, config.attempts.clone());
    worker.run().await
}
