use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::fmt::init;

use quizarena_api::{
    config::Config,
    services::{connect_redis, event_bus::RedisEventBus, event_gateway::EventGateway},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load().context("Failed to load configuration")?;

    let redis_client =
        redis::Client::open(config.redis_uri.clone()).context("Failed to create Redis client")?;
    let publisher = connect_redis(redis_client.clone()).await?;

    let gateway = Arc::new(EventGateway::new(config.gateway.clone()));
    let bus = RedisEventBus::new(redis_client, publisher, config.gateway);

    bus.run(gateway).await
}
