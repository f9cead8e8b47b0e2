use anyhow::Context;
use tracing_subscriber::fmt::init;

use quizarena_api::{config::Config, storage::migrations};

/// Applies pending index migrations. `--status` lists pending versions only.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load().context("Failed to load configuration")?;
    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .context("Failed to connect to MongoDB")?;
    let db = mongo_client.database(&config.mongo_database);

    if std::env::args().any(|arg| arg == "--status") {
        let applied = migrations::applied_versions(&db).await?;
        let pending = migrations::pending(migrations::MIGRATIONS, &applied);
        if pending.is_empty() {
            tracing::info!("Schema is up to date");
        }
        for migration in pending {
            tracing::info!(version = migration.version, name = migration.name, "Pending");
        }
        return Ok(());
    }

    let applied = migrations::apply_migrations(&db).await?;
    tracing::info!(count = applied.len(), ?applied, "Migrations applied");
    Ok(())
}
