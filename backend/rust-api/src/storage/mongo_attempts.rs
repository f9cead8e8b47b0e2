use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, DateTime as BsonDateTime};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOptions, ReturnDocument};
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{AttemptStore, Completion};
use crate::error::{ArenaError, Result};
use crate::metrics::track_db_operation;
use crate::models::{Answer, AttemptSession, AttemptStatus};
use crate::utils::time::{bson_to_chrono, chrono_to_bson, Clock};

pub const ATTEMPTS_COLLECTION: &str = "attempt_sessions";

const DUPLICATE_KEY: i32 = 11000;

/// On-disk shape of an attempt. Timestamps are native BSON dates so the
/// idle-cutoff range queries can use the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AttemptDocument {
    #[serde(rename = "_id")]
    id: String,
    user_id: String,
    quiz_id: String,
    status: AttemptStatus,
    started_at: BsonDateTime,
    last_activity_at: BsonDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<BsonDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    abandoned_at: Option<BsonDateTime>,
    #[serde(default)]
    answers: Vec<Answer>,
}

impl From<AttemptDocument> for AttemptSession {
    fn from(d: AttemptDocument) -> Self {
        AttemptSession {
            id: d.id,
            user_id: d.user_id,
            quiz_id: d.quiz_id,
            status: d.status,
            started_at: bson_to_chrono(d.started_at),
            last_activity_at: bson_to_chrono(d.last_activity_at),
            completed_at: d.completed_at.map(bson_to_chrono),
            abandoned_at: d.abandoned_at.map(bson_to_chrono),
            answers: d.answers,
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref we)) if we.code == DUPLICATE_KEY
    )
}

fn encode<T: Serialize>(value: &T) -> Result<mongodb::bson::Bson> {
    to_bson(value).map_err(|e| ArenaError::storage(format!("failed to encode document: {}", e)))
}

pub struct MongoAttemptStore {
    db: Database,
    collection: Collection<AttemptDocument>,
    clock: Arc<dyn Clock>,
}

impl MongoAttemptStore {
    pub fn new(db: &Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            db: db.clone(),
            collection: db.collection(ATTEMPTS_COLLECTION),
            clock,
        }
    }

    /// Runs a guarded update on an in-progress row. When the guard misses, the row
    /// is re-read to tell a missing attempt from one in the wrong status.
    async fn update_in_progress(
        &self,
        operation: &str,
        session_id: &str,
        extra_filter: mongodb::bson::Document,
        update: mongodb::bson::Document,
    ) -> Result<Option<AttemptSession>> {
        let mut filter = doc! { "_id": session_id, "status": AttemptStatus::InProgress.as_str() };
        filter.extend(extra_filter);

        let updated = track_db_operation(operation, ATTEMPTS_COLLECTION, async {
            self.collection
                .find_one_and_update(filter, update)
                .return_document(ReturnDocument::After)
                .await
        })
        .await?;

        Ok(updated.map(AttemptSession::from))
    }

    async fn explain_miss(&self, session_id: &str) -> ArenaError {
        match self.get(session_id).await {
            Ok(current) => ArenaError::InvalidState {
                session_id: current.id,
                status: current.status,
                expected: AttemptStatus::InProgress,
            },
            Err(err) => err,
        }
    }
}

#[async_trait]
impl AttemptStore for MongoAttemptStore {
    async fn create_if_absent(&self, user_id: &str, quiz_id: &str) -> Result<AttemptSession> {
        let now = chrono_to_bson(self.clock.now());
        let document = AttemptDocument {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            quiz_id: quiz_id.to_string(),
            status: AttemptStatus::InProgress,
            started_at: now,
            last_activity_at: now,
            completed_at: None,
            abandoned_at: None,
            answers: Vec::new(),
        };

        let inserted = track_db_operation("insert_one", ATTEMPTS_COLLECTION, async {
            self.collection.insert_one(&document).await
        })
        .await;

        match inserted {
            Ok(_) => Ok(document.into()),
            Err(err) if is_duplicate_key(&err) => Err(ArenaError::Conflict {
                user_id: user_id.to_string(),
                quiz_id: quiz_id.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn find_active(&self, user_id: &str, quiz_id: &str) -> Result<Option<AttemptSession>> {
        let found = track_db_operation("find_one", ATTEMPTS_COLLECTION, async {
            self.collection
                .find_one(doc! {
                    "user_id": user_id,
                    "quiz_id": quiz_id,
                    "status": AttemptStatus::InProgress.as_str(),
                })
                .await
        })
        .await?;
        Ok(found.map(AttemptSession::from))
    }

    async fn get(&self, session_id: &str) -> Result<AttemptSession> {
        track_db_operation("find_one", ATTEMPTS_COLLECTION, async {
            self.collection.find_one(doc! { "_id": session_id }).await
        })
        .await?
        .map(AttemptSession::from)
        .ok_or_else(|| ArenaError::not_found(format!("Attempt {}", session_id)))
    }

    async fn append_answer(&self, session_id: &str, answer: Answer) -> Result<AttemptSession> {
        let now = chrono_to_bson(self.clock.now());
        let update = doc! {
            "$push": { "answers": encode(&answer)? },
            "$set": { "last_activity_at": now },
        };
        match self
            .update_in_progress("append_answer", session_id, doc! {}, update)
            .await?
        {
            Some(session) => Ok(session),
            None => Err(self.explain_miss(session_id).await),
        }
    }

    async fn complete(&self, session_id: &str, final_answers: Vec<Answer>) -> Result<Completion> {
        let now = chrono_to_bson(self.clock.now());
        let update = doc! {
            "$push": { "answers": { "$each": encode(&final_answers)? } },
            "$set": {
                "status": AttemptStatus::Completed.as_str(),
                "completed_at": now,
                "last_activity_at": now,
            },
        };
        if let Some(session) = self
            .update_in_progress("complete", session_id, doc! {}, update)
            .await?
        {
            return Ok(Completion {
                session,
                newly_completed: true,
            });
        }

        let current = self.get(session_id).await?;
        match current.status {
            AttemptStatus::Completed => Ok(Completion {
                session: current,
                newly_completed: false,
            }),
            status => Err(ArenaError::InvalidState {
                session_id: current.id,
                status,
                expected: AttemptStatus::InProgress,
            }),
        }
    }

    async fn abandon(&self, session_id: &str) -> Result<AttemptSession> {
        let now = chrono_to_bson(self.clock.now());
        let update = doc! {
            "$set": { "status": AttemptStatus::Abandoned.as_str(), "abandoned_at": now },
        };
        match self
            .update_in_progress("abandon", session_id, doc! {}, update)
            .await?
        {
            Some(session) => Ok(session),
            None => Err(self.explain_miss(session_id).await),
        }
    }

    async fn abandon_if_idle(
        &self,
        session_id: &str,
        idle_cutoff: DateTime<Utc>,
    ) -> Result<AttemptSession> {
        let now = chrono_to_bson(self.clock.now());
        let update = doc! {
            "$set": { "status": AttemptStatus::Abandoned.as_str(), "abandoned_at": now },
        };
        let guard = doc! { "last_activity_at": { "$lt": chrono_to_bson(idle_cutoff) } };
        if let Some(session) = self
            .update_in_progress("abandon_idle", session_id, guard, update)
            .await?
        {
            return Ok(session);
        }

        let current = self.get(session_id).await?;
        if current.is_active() {
            Err(ArenaError::InvalidTransition(format!(
                "attempt {} had activity after the idle cutoff",
                session_id
            )))
        } else {
            Err(ArenaError::InvalidState {
                session_id: current.id,
                status: current.status,
                expected: AttemptStatus::InProgress,
            })
        }
    }

    async fn find_stale(
        &self,
        idle_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AttemptSession>> {
        let options = FindOptions::builder()
            .sort(doc! { "last_activity_at": 1 })
            .limit(limit)
            .build();

        let documents: Vec<AttemptDocument> =
            track_db_operation("find_stale", ATTEMPTS_COLLECTION, async {
                self.collection
                    .find(doc! {
                        "status": AttemptStatus::InProgress.as_str(),
                        "last_activity_at": { "$lt": chrono_to_bson(idle_cutoff) },
                    })
                    .with_options(options)
                    .await?
                    .try_collect()
                    .await
            })
            .await?;

        Ok(documents.into_iter().map(AttemptSession::from).collect())
    }

    async fn ping(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnswerValue;

    #[test]
    fn document_maps_to_session() {
        let at = BsonDateTime::from_millis(1_700_000_000_000);
        let document = AttemptDocument {
            id: "a-1".to_string(),
            user_id: "u1".to_string(),
            quiz_id: "q1".to_string(),
            status: AttemptStatus::Completed,
            started_at: at,
            last_activity_at: at,
            completed_at: Some(at),
            abandoned_at: None,
            answers: vec![Answer {
                question_id: "q".to_string(),
                answer: AnswerValue::Number(4.0),
                is_correct: Some(true),
                time_spent: None,
            }],
        };

        let session = AttemptSession::from(document);
        assert_eq!(session.status, AttemptStatus::Completed);
        assert_eq!(session.completed_at, Some(bson_to_chrono(at)));
        assert_eq!(session.answers.len(), 1);
    }

    #[test]
    fn answers_encode_as_bson_array() {
        let answers = vec![Answer {
            question_id: "q".to_string(),
            answer: AnswerValue::Choices(vec!["a".to_string(), "b".to_string()]),
            is_correct: None,
            time_spent: Some(12),
        }];
        assert!(matches!(
            encode(&answers).unwrap(),
            mongodb::bson::Bson::Array(ref items) if items.len() == 1
        ));
    }
}
