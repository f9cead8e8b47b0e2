//! Index migrations, applied in version order and recorded in
//! `schema_migrations` so reruns are no-ops.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};
use std::collections::HashSet;

use super::mongo_attempts::ATTEMPTS_COLLECTION;
use super::mongo_progress::PROGRESS_COLLECTION;
use crate::utils::time::chrono_to_bson;

pub const MIGRATIONS_COLLECTION: &str = "schema_migrations";

pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub collection: &'static str,
    pub index: fn() -> IndexModel,
}

fn index(name: &str, keys: Document, unique: bool, partial: Option<Document>) -> IndexModel {
    let options = IndexOptions::builder()
        .name(name.to_string())
        .unique(unique)
        .partial_filter_expression(partial)
        .build();
    IndexModel::builder().keys(keys).options(options).build()
}

// At most one in-progress attempt per (user, quiz); terminal rows are unconstrained.
fn uniq_active_attempt() -> IndexModel {
    index(
        "uniq_active_attempt",
        doc! { "user_id": 1, "quiz_id": 1 },
        true,
        Some(doc! { "status": "in_progress" }),
    )
}

fn attempt_lookup() -> IndexModel {
    index(
        "attempt_lookup",
        doc! { "user_id": 1, "quiz_id": 1, "status": 1 },
        false,
        None,
    )
}

fn attempt_idle_scan() -> IndexModel {
    index(
        "attempt_idle_scan",
        doc! { "status": 1, "last_activity_at": 1 },
        false,
        None,
    )
}

fn progress_leaderboard() -> IndexModel {
    index("progress_leaderboard", doc! { "xp": -1, "_id": 1 }, false, None)
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "uniq_active_attempt",
        collection: ATTEMPTS_COLLECTION,
        index: uniq_active_attempt,
    },
    Migration {
        version: 2,
        name: "attempt_lookup",
        collection: ATTEMPTS_COLLECTION,
        index: attempt_lookup,
    },
    Migration {
        version: 3,
        name: "attempt_idle_scan",
        collection: ATTEMPTS_COLLECTION,
        index: attempt_idle_scan,
    },
    Migration {
        version: 4,
        name: "progress_leaderboard",
        collection: PROGRESS_COLLECTION,
        index: progress_leaderboard,
    },
];

/// Versions already recorded in `schema_migrations`.
pub async fn applied_versions(db: &Database) -> Result<HashSet<u32>> {
    let applied: HashSet<u32> = db
        .collection::<Document>(MIGRATIONS_COLLECTION)
        .find(doc! {})
        .await
        .context("Failed to read schema_migrations")?
        .try_collect::<Vec<Document>>()
        .await
        .context("Failed to read schema_migrations")?
        .iter()
        .filter_map(|d| {
            d.get_i64("_id")
                .ok()
                .or_else(|| d.get_i32("_id").ok().map(i64::from))
        })
        .filter_map(|v| u32::try_from(v).ok())
        .collect();
    Ok(applied)
}

/// Applies every migration not yet recorded. Returns the versions applied by this call.
pub async fn apply_migrations(db: &Database) -> Result<Vec<u32>> {
    let records = db.collection::<Document>(MIGRATIONS_COLLECTION);
    let applied = applied_versions(db).await?;

    let mut newly_applied = Vec::new();
    for migration in pending(MIGRATIONS, &applied) {
        db.collection::<Document>(migration.collection)
            .create_index((migration.index)())
            .await
            .with_context(|| {
                format!(
                    "Migration {} ({}) failed",
                    migration.version, migration.name
                )
            })?;

        records
            .insert_one(doc! {
                "_id": i64::from(migration.version),
                "name": migration.name,
                "applied_at": chrono_to_bson(Utc::now()),
            })
            .await
            .context("Failed to record migration")?;

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Migration applied"
        );
        newly_applied.push(migration.version);
    }

    Ok(newly_applied)
}

pub fn pending<'a>(all: &'a [Migration], applied: &HashSet<u32>) -> Vec<&'a Migration> {
    let mut pending: Vec<&Migration> = all
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .collect();
    pending.sort_by_key(|m| m.version);
    pending
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_unique_and_ascending() {
        let versions: Vec<u32> = MIGRATIONS.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn active_attempt_index_is_partial_and_unique() {
        let model = (MIGRATIONS[0].index)();
        let options = model.options.expect("options");
        assert_eq!(options.unique, Some(true));
        assert_eq!(
            options.partial_filter_expression,
            Some(doc! { "status": "in_progress" })
        );
    }

    #[test]
    fn recorded_versions_are_skipped() {
        let applied: HashSet<u32> = [1, 3].into_iter().collect();
        let pending: Vec<u32> = pending(MIGRATIONS, &applied)
            .into_iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(pending, vec![2, 4]);
    }
}
