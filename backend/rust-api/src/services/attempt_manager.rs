use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{ArenaError, Result};
use crate::metrics::{
    ANSWERS_SUBMITTED_TOTAL, ATTEMPTS_TOTAL, START_CONFLICTS_TOTAL,
};
use crate::models::{Answer, AttemptSession, XpReward};
use crate::services::progress_service::xp_for_answers;
use crate::services::quota_ledger::QuotaLedger;
use crate::storage::AttemptStore;
use crate::utils::retry::{retry_async_when, RetryConfig};

const MAX_ID_LEN: usize = 128;

fn validate_id(field: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.len() > MAX_ID_LEN {
        return Err(ArenaError::validation(format!(
            "{} must be 1-{} characters",
            field, MAX_ID_LEN
        )));
    }
    Ok(())
}

/// Start, resume, answer and finish attempts. Owns the orchestration between
/// the attempt store and the quota ledger; uniqueness itself is the store's job.
pub struct AttemptManager {
    store: Arc<dyn AttemptStore>,
    ledger: Arc<QuotaLedger>,
    quota_resource: Option<String>,
    conflict_retries: usize,
    rewards: mpsc::UnboundedSender<XpReward>,
}

impl AttemptManager {
    pub fn new(
        store: Arc<dyn AttemptStore>,
        ledger: Arc<QuotaLedger>,
        quota_resource: Option<String>,
        conflict_retries: usize,
        rewards: mpsc::UnboundedSender<XpReward>,
    ) -> Self {
        Self {
            store,
            ledger,
            quota_resource,
            conflict_retries: conflict_retries.max(1),
            rewards,
        }
    }

    /// Returns the caller's in-progress attempt for the quiz, creating one if
    /// none exists. The flag is true only for the call that inserted the row.
    pub async fn start_or_resume(
        &self,
        user_id: &str,
        quiz_id: &str,
    ) -> Result<(AttemptSession, bool)> {
        validate_id("userId", user_id)?;
        validate_id("quizId", quiz_id)?;

        retry_async_when(
            RetryConfig::conflict_resolution(self.conflict_retries),
            |e: &ArenaError| matches!(e, ArenaError::Conflict { .. }),
            || self.try_start(user_id, quiz_id),
        )
        .await
    }

    async fn try_start(&self, user_id: &str, quiz_id: &str) -> Result<(AttemptSession, bool)> {
        if let Some(existing) = self.store.find_active(user_id, quiz_id).await? {
            ATTEMPTS_TOTAL.with_label_values(&["resumed"]).inc();
            tracing::debug!(session_id = %existing.id, user_id, quiz_id, "Attempt resumed");
            return Ok((existing, false));
        }

        if let Some(resource) = &self.quota_resource {
            match self.ledger.require(user_id, resource, 1).await {
                Ok(_) => {}
                // a concurrent start may have spent the last unit on this very quiz
                Err(denied @ ArenaError::QuotaExceeded { .. }) => {
                    return match self.store.find_active(user_id, quiz_id).await? {
                        Some(winner) => {
                            ATTEMPTS_TOTAL.with_label_values(&["resumed"]).inc();
                            Ok((winner, false))
                        }
                        None => Err(denied),
                    };
                }
                Err(e) => return Err(e),
            }
        }

        match self.store.create_if_absent(user_id, quiz_id).await {
            Ok(session) => {
                ATTEMPTS_TOTAL.with_label_values(&["created"]).inc();
                tracing::info!(session_id = %session.id, user_id, quiz_id, "Attempt created");
                Ok((session, true))
            }
            Err(conflict @ ArenaError::Conflict { .. }) => {
                START_CONFLICTS_TOTAL.inc();
                tracing::debug!(user_id, quiz_id, "Lost attempt insert race, re-reading");
                self.refund_start(user_id).await;

                match self.store.find_active(user_id, quiz_id).await? {
                    Some(winner) => {
                        ATTEMPTS_TOTAL.with_label_values(&["resumed"]).inc();
                        Ok((winner, false))
                    }
                    // the winner already finished; go around again
                    None => Err(conflict),
                }
            }
            Err(e) => {
                self.refund_start(user_id).await;
                Err(e)
            }
        }
    }

    async fn refund_start(&self, user_id: &str) {
        if let Some(resource) = &self.quota_resource {
            if let Err(e) = self.ledger.refund(user_id, resource, 1).await {
                tracing::warn!(user_id, resource = %resource, error = %e, "Quota refund failed");
            }
        }
    }

    /// Loads an attempt and hides other users' attempts behind `NotFound`.
    pub async fn get_owned(&self, user_id: &str, session_id: &str) -> Result<AttemptSession> {
        let session = self.store.get(session_id).await?;
        if session.user_id != user_id {
            return Err(ArenaError::not_found(format!("Attempt {}", session_id)));
        }
        Ok(session)
    }

    pub async fn submit_answer(
        &self,
        user_id: &str,
        session_id: &str,
        answer: Answer,
    ) -> Result<AttemptSession> {
        self.get_owned(user_id, session_id).await?;
        let correct = match answer.is_correct {
            Some(true) => "true",
            Some(false) => "false",
            None => "ungraded",
        };
        let session = self.store.append_answer(session_id, answer).await?;
        ANSWERS_SUBMITTED_TOTAL.with_label_values(&[correct]).inc();
        Ok(session)
    }

    /// Completes the attempt. Repeating the call returns the stored record and
    /// emits no second reward.
    pub async fn finish(
        &self,
        user_id: &str,
        name: &str,
        session_id: &str,
        final_answers: Vec<Answer>,
    ) -> Result<AttemptSession> {
        self.get_owned(user_id, session_id).await?;
        let completion = self.store.complete(session_id, final_answers).await?;
        if !completion.newly_completed {
            tracing::debug!(session_id, "Finish repeated on completed attempt");
            return Ok(completion.session);
        }

        ATTEMPTS_TOTAL.with_label_values(&["completed"]).inc();

        let session = completion.session;
        let reward = XpReward {
            user_id: session.user_id.clone(),
            name: name.to_string(),
            session_id: session.id.clone(),
            amount: xp_for_answers(&session.answers),
        };
        tracing::info!(
            session_id = %session.id,
            user_id,
            answers = session.answers.len(),
            xp = reward.amount,
            "Attempt completed"
        );
        if self.rewards.send(reward).is_err() {
            tracing::error!(session_id = %session.id, "Reward consumer gone, XP not recorded");
        }
        Ok(session)
    }

    pub async fn abandon(&self, user_id: &str, session_id: &str) -> Result<AttemptSession> {
        self.get_owned(user_id, session_id).await?;
        let session = self.store.abandon(session_id).await?;
        ATTEMPTS_TOTAL.with_label_values(&["abandoned"]).inc();
        tracing::info!(session_id, user_id, "Attempt abandoned");
        Ok(session)
    }
}
