//! In-process backends. Every operation takes one mutex for its whole
//! read-check-write, which is what makes them atomic; nothing awaits while
//! holding it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{AttemptStore, Completion, ProgressStore, QuotaKey, QuotaStore};
use crate::error::{ArenaError, Result};
use crate::models::{
    Answer, AttemptSession, AttemptStatus, QuotaRecord, QuotaRule, QuotaSnapshot, UserProgress,
};
use crate::utils::time::Clock;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| ArenaError::storage("in-memory store poisoned"))
}

#[derive(Default)]
struct AttemptTable {
    rows: HashMap<String, AttemptSession>,
    /// (user_id, quiz_id) -> session id of the in-progress row
    active: HashMap<(String, String), String>,
}

impl AttemptTable {
    fn row_mut(&mut self, session_id: &str) -> Result<&mut AttemptSession> {
        self.rows
            .get_mut(session_id)
            .ok_or_else(|| ArenaError::not_found(format!("Attempt {}", session_id)))
    }

    fn release(&mut self, session: &AttemptSession) {
        let slot = (session.user_id.clone(), session.quiz_id.clone());
        if self.active.get(&slot) == Some(&session.id) {
            self.active.remove(&slot);
        }
    }
}

fn expect_in_progress(session: &AttemptSession) -> Result<()> {
    if session.status == AttemptStatus::InProgress {
        Ok(())
    } else {
        Err(ArenaError::InvalidState {
            session_id: session.id.clone(),
            status: session.status,
            expected: AttemptStatus::InProgress,
        })
    }
}

pub struct MemoryAttemptStore {
    table: Mutex<AttemptTable>,
    clock: Arc<dyn Clock>,
}

impl MemoryAttemptStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Mutex::new(AttemptTable::default()),
            clock,
        }
    }

    /// Number of stored attempts for a pair, in any status.
    pub fn count_for(&self, user_id: &str, quiz_id: &str) -> usize {
        self.table
            .lock()
            .map(|t| {
                t.rows
                    .values()
                    .filter(|s| s.user_id == user_id && s.quiz_id == quiz_id)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn create_if_absent(&self, user_id: &str, quiz_id: &str) -> Result<AttemptSession> {
        let now = self.clock.now();
        let mut table = lock(&self.table)?;
        let slot = (user_id.to_string(), quiz_id.to_string());
        if table.active.contains_key(&slot) {
            return Err(ArenaError::Conflict {
                user_id: user_id.to_string(),
                quiz_id: quiz_id.to_string(),
            });
        }

        let session = AttemptSession {
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
        table.active.insert(slot, session.id.clone());
        table.rows.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn find_active(&self, user_id: &str, quiz_id: &str) -> Result<Option<AttemptSession>> {
        let table = lock(&self.table)?;
        let slot = (user_id.to_string(), quiz_id.to_string());
        Ok(table
            .active
            .get(&slot)
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn get(&self, session_id: &str) -> Result<AttemptSession> {
        let table = lock(&self.table)?;
        table
            .rows
            .get(session_id)
            .cloned()
            .ok_or_else(|| ArenaError::not_found(format!("Attempt {}", session_id)))
    }

    async fn append_answer(&self, session_id: &str, answer: Answer) -> Result<AttemptSession> {
        let now = self.clock.now();
        let mut table = lock(&self.table)?;
        let session = table.row_mut(session_id)?;
        expect_in_progress(session)?;
        session.answers.push(answer);
        session.last_activity_at = now;
        Ok(session.clone())
    }

    async fn complete(&self, session_id: &str, final_answers: Vec<Answer>) -> Result<Completion> {
        let now = self.clock.now();
        let mut table = lock(&self.table)?;
        let session = table.row_mut(session_id)?;
        match session.status {
            AttemptStatus::Completed => Ok(Completion {
                session: session.clone(),
                newly_completed: false,
            }),
            AttemptStatus::Abandoned => Err(ArenaError::InvalidState {
                session_id: session.id.clone(),
                status: session.status,
                expected: AttemptStatus::InProgress,
            }),
            AttemptStatus::InProgress => {
                session.answers.extend(final_answers);
                session.status = AttemptStatus::Completed;
                session.completed_at = Some(now);
                session.last_activity_at = now;
                let session = session.clone();
                table.release(&session);
                Ok(Completion {
                    session,
                    newly_completed: true,
                })
            }
        }
    }

    async fn abandon(&self, session_id: &str) -> Result<AttemptSession> {
        let now = self.clock.now();
        let mut table = lock(&self.table)?;
        let session = table.row_mut(session_id)?;
        expect_in_progress(session)?;
        session.status = AttemptStatus::Abandoned;
        session.abandoned_at = Some(now);
        let session = session.clone();
        table.release(&session);
        Ok(session)
    }

    async fn abandon_if_idle(
        &self,
        session_id: &str,
        idle_cutoff: DateTime<Utc>,
    ) -> Result<AttemptSession> {
        let now = self.clock.now();
        let mut table = lock(&self.table)?;
        let session = table.row_mut(session_id)?;
        expect_in_progress(session)?;
        if session.last_activity_at >= idle_cutoff {
            return Err(ArenaError::InvalidTransition(format!(
                "attempt {} had activity after the idle cutoff",
                session_id
            )));
        }
        session.status = AttemptStatus::Abandoned;
        session.abandoned_at = Some(now);
        let session = session.clone();
        table.release(&session);
        Ok(session)
    }

    async fn find_stale(
        &self,
        idle_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AttemptSession>> {
        let table = lock(&self.table)?;
        let mut stale: Vec<AttemptSession> = table
            .rows
            .values()
            .filter(|s| s.is_active() && s.last_activity_at < idle_cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.last_activity_at.cmp(&b.last_activity_at));
        stale.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(stale)
    }

    async fn ping(&self) -> Result<()> {
        lock(&self.table).map(|_| ())
    }
}

#[derive(Default)]
pub struct MemoryQuotaStore {
    records: Mutex<HashMap<QuotaKey, QuotaRecord>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: &QuotaKey) -> Option<QuotaRecord> {
        self.records.lock().ok().and_then(|r| r.get(key).copied())
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn consume(
        &self,
        key: &QuotaKey,
        cost: u32,
        rule: &QuotaRule,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot> {
        let now_ms = now.timestamp_millis();
        let mut records = lock(&self.records)?;
        let stored = records.get(key).copied();
        let (start, reset) = rule.current_window(stored.map(|r| r.window_start_ms), now_ms);
        let record = records.entry(key.clone()).or_insert(QuotaRecord {
            used: 0,
            window_start_ms: start,
            total_consumed: 0,
        });
        if reset {
            record.used = 0;
            record.window_start_ms = start;
        }

        let granted = record.used.saturating_add(cost) <= rule.limit;
        if granted {
            record.used += cost;
            record.total_consumed += u64::from(cost);
        }

        Ok(QuotaSnapshot {
            granted,
            used: record.used,
            window_start_ms: record.window_start_ms,
        })
    }

    async fn peek(
        &self,
        key: &QuotaKey,
        rule: &QuotaRule,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot> {
        let now_ms = now.timestamp_millis();
        let records = lock(&self.records)?;
        let stored = records.get(key);
        let (start, reset) = rule.current_window(stored.map(|r| r.window_start_ms), now_ms);
        let used = match stored {
            Some(r) if !reset => r.used,
            _ => 0,
        };
        Ok(QuotaSnapshot {
            granted: used < rule.limit,
            used,
            window_start_ms: start,
        })
    }

    async fn refund(
        &self,
        key: &QuotaKey,
        cost: u32,
        rule: &QuotaRule,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot> {
        let now_ms = now.timestamp_millis();
        let mut records = lock(&self.records)?;
        let Some(record) = records.get_mut(key) else {
            let (start, _) = rule.current_window(None, now_ms);
            return Ok(QuotaSnapshot {
                granted: true,
                used: 0,
                window_start_ms: start,
            });
        };

        let (start, reset) = rule.current_window(Some(record.window_start_ms), now_ms);
        if reset {
            // units from an elapsed window are already gone
            return Ok(QuotaSnapshot {
                granted: true,
                used: 0,
                window_start_ms: start,
            });
        }
        let refunded = cost.min(record.used);
        record.used -= refunded;
        record.total_consumed = record.total_consumed.saturating_sub(u64::from(refunded));
        Ok(QuotaSnapshot {
            granted: true,
            used: record.used,
            window_start_ms: record.window_start_ms,
        })
    }

    async fn ping(&self) -> Result<()> {
        lock(&self.records).map(|_| ())
    }
}

#[derive(Default)]
pub struct MemoryProgressStore {
    users: Mutex<HashMap<String, UserProgress>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn add_xp(&self, user_id: &str, name: &str, amount: u64) -> Result<UserProgress> {
        let mut users = lock(&self.users)?;
        let entry = users
            .entry(user_id.to_string())
            .or_insert_with(|| UserProgress {
                user_id: user_id.to_string(),
                name: name.to_string(),
                xp: 0,
            });
        entry.xp = entry.xp.saturating_add(amount);
        Ok(entry.clone())
    }

    async fn get(&self, user_id: &str) -> Result<Option<UserProgress>> {
        Ok(lock(&self.users)?.get(user_id).cloned())
    }

    async fn top(&self, offset: u64, limit: u32) -> Result<Vec<UserProgress>> {
        let users = lock(&self.users)?;
        let mut all: Vec<UserProgress> = users.values().cloned().collect();
        all.sort_by(|a, b| b.xp.cmp(&a.xp).then_with(|| a.user_id.cmp(&b.user_id)));
        Ok(all
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        lock(&self.users).map(|_| ())
    }
}
