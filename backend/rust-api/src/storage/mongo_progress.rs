use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::{FindOptions, ReturnDocument};
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};

use super::ProgressStore;
use crate::error::{ArenaError, Result};
use crate::metrics::track_db_operation;
use crate::models::UserProgress;

pub const PROGRESS_COLLECTION: &str = "user_progress";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProgressDocument {
    #[serde(rename = "_id")]
    user_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    xp: i64,
}

impl From<ProgressDocument> for UserProgress {
    fn from(d: ProgressDocument) -> Self {
        UserProgress {
            user_id: d.user_id,
            name: d.name,
            xp: u64::try_from(d.xp).unwrap_or(0),
        }
    }
}

pub struct MongoProgressStore {
    db: Database,
    collection: Collection<ProgressDocument>,
}

impl MongoProgressStore {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            collection: db.collection(PROGRESS_COLLECTION),
        }
    }
}

#[async_trait]
impl ProgressStore for MongoProgressStore {
    async fn add_xp(&self, user_id: &str, name: &str, amount: u64) -> Result<UserProgress> {
        let amount = i64::try_from(amount)
            .map_err(|_| ArenaError::validation(format!("xp amount {} out of range", amount)))?;

        let updated = track_db_operation("add_xp", PROGRESS_COLLECTION, async {
            self.collection
                .find_one_and_update(
                    doc! { "_id": user_id },
                    doc! { "$inc": { "xp": amount }, "$set": { "name": name } },
                )
                .upsert(true)
                .return_document(ReturnDocument::After)
                .await
        })
        .await?;

        updated
            .map(UserProgress::from)
            .ok_or_else(|| ArenaError::storage("upsert returned no document"))
    }

    async fn get(&self, user_id: &str) -> Result<Option<UserProgress>> {
        let found = track_db_operation("find_one", PROGRESS_COLLECTION, async {
            self.collection.find_one(doc! { "_id": user_id }).await
        })
        .await?;
        Ok(found.map(UserProgress::from))
    }

    async fn top(&self, offset: u64, limit: u32) -> Result<Vec<UserProgress>> {
        let options = FindOptions::builder()
            .sort(doc! { "xp": -1, "_id": 1 })
            .skip(offset)
            .limit(i64::from(limit))
            .build();

        let documents: Vec<ProgressDocument> =
            track_db_operation("leaderboard", PROGRESS_COLLECTION, async {
                self.collection
                    .find(doc! {})
                    .with_options(options)
                    .await?
                    .try_collect()
                    .await
            })
            .await?;

        Ok(documents.into_iter().map(UserProgress::from).collect())
    }

    async fn ping(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}
