//! Persistence seams. Each trait has a MongoDB/Redis implementation for
//! deployments and an in-memory one for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Answer, AttemptSession, QuotaRule, QuotaSnapshot, UserProgress};

pub mod memory;
pub mod migrations;
pub mod mongo_attempts;
pub mod mongo_progress;
pub mod redis_quota;

pub use memory::{MemoryAttemptStore, MemoryProgressStore, MemoryQuotaStore};
pub use mongo_attempts::MongoAttemptStore;
pub use mongo_progress::MongoProgressStore;
pub use redis_quota::RedisQuotaStore;

/// Result of a completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub session: AttemptSession,
    /// True only for the call that moved the attempt out of in-progress.
    pub newly_completed: bool,
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Inserts a fresh in-progress attempt. Fails with `ArenaError::Conflict` when
    /// the partial unique constraint on (user, quiz, in_progress) rejects the row.
    async fn create_if_absent(&self, user_id: &str, quiz_id: &str) -> Result<AttemptSession>;

    async fn find_active(&self, user_id: &str, quiz_id: &str) -> Result<Option<AttemptSession>>;

    async fn get(&self, session_id: &str) -> Result<AttemptSession>;

    async fn append_answer(&self, session_id: &str, answer: Answer) -> Result<AttemptSession>;

    /// Idempotent: completing a completed attempt returns the stored record.
    async fn complete(&self, session_id: &str, final_answers: Vec<Answer>) -> Result<Completion>;

    async fn abandon(&self, session_id: &str) -> Result<AttemptSession>;

    /// Abandons only if no activity was recorded at or after `idle_cutoff`.
    async fn abandon_if_idle(
        &self,
        session_id: &str,
        idle_cutoff: DateTime<Utc>,
    ) -> Result<AttemptSession>;

    async fn find_stale(
        &self,
        idle_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AttemptSession>>;

    async fn ping(&self) -> Result<()>;
}

/// Identifies one quota counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaKey {
    pub user_id: String,
    pub resource: String,
}

impl QuotaKey {
    pub fn new(user_id: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            resource: resource.into(),
        }
    }

    pub fn redis_key(&self) -> String {
        format!("quota:{}:{}", self.resource, self.user_id)
    }
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Atomically resets an elapsed window, then grants `cost` units if they fit.
    async fn consume(
        &self,
        key: &QuotaKey,
        cost: u32,
        rule: &QuotaRule,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot>;

    /// Read-only view of the counter as of `now`.
    async fn peek(&self, key: &QuotaKey, rule: &QuotaRule, now: DateTime<Utc>)
        -> Result<QuotaSnapshot>;

    /// Gives back units consumed in the current window. Never goes below zero.
    async fn refund(
        &self,
        key: &QuotaKey,
        cost: u32,
        rule: &QuotaRule,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot>;

    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn add_xp(&self, user_id: &str, name: &str, amount: u64) -> Result<UserProgress>;

    async fn get(&self, user_id: &str) -> Result<Option<UserProgress>>;

    /// Ordered by xp descending, then user id ascending.
    async fn top(&self, offset: u64, limit: u32) -> Result<Vec<UserProgress>>;

    async fn ping(&self) -> Result<()>;
}
