use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    config::AttemptSettings,
    metrics::{ATTEMPTS_TOTAL, SWEEP_WORKER_TICKS_TOTAL},
    storage::AttemptStore,
    utils::time::Clock,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub abandoned: usize,
    /// Candidates that saw activity or finished between the scan and the write.
    pub skipped: usize,
}

/// Abandons attempts that went idle so their (user, quiz) slot frees up.
pub struct SweepWorker {
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
    settings: AttemptSettings,
}

impl SweepWorker {
    pub fn new(
        store: Arc<dyn AttemptStore>,
        clock: Arc<dyn Clock>,
        settings: AttemptSettings,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let interval = Duration::from_secs(self.settings.sweep_interval_secs.max(1));
        info!(
            "Starting idle sweep loop (interval {}s, idle timeout {}s)",
            interval.as_secs(),
            self.settings.idle_timeout_secs
        );

        loop {
            match self.run_once().await {
                Ok(report) => {
                    SWEEP_WORKER_TICKS_TOTAL
                        .with_label_values(&["success"])
                        .inc();
                    if report.scanned > 0 {
                        info!(
                            scanned = report.scanned,
                            abandoned = report.abandoned,
                            skipped = report.skipped,
                            "Idle sweep tick completed"
                        );
                    }
                }
                Err(err) => {
                    SWEEP_WORKER_TICKS_TOTAL.with_label_values(&["error"]).inc();
                    warn!(error = %err, "Idle sweep tick failed");
                }
            }

            sleep(interval).await;
        }
    }

    pub async fn run_once(&self) -> Result<SweepReport> {
        let idle = i64::try_from(self.settings.idle_timeout_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(idle)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
        let candidates = self
            .store
            .find_stale(cutoff, self.settings.sweep_batch_size.max(1))
            .await?;

        let mut report = SweepReport {
            scanned: candidates.len(),
            ..SweepReport::default()
        };

        for session in candidates {
            match self.store.abandon_if_idle(&session.id, cutoff).await {
                Ok(_) => {
                    ATTEMPTS_TOTAL.with_label_values(&["abandoned_idle"]).inc();
                    debug!(
                        session_id = %session.id,
                        user_id = %session.user_id,
                        "Idle attempt abandoned"
                    );
                    report.abandoned += 1;
                }
                Err(e) if e.is_invalid_state() => {
                    debug!(session_id = %session.id, reason = %e, "Sweep lost race, skipping");
                    report.skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Answer, AnswerValue, AttemptStatus};
    use crate::storage::MemoryAttemptStore;
    use crate::utils::time::ManualClock;
    use chrono::Utc;

    fn settings() -> AttemptSettings {
        AttemptSettings {
            idle_timeout_secs: 1800,
            ..AttemptSettings::default()
        }
    }

    #[tokio::test]
    async fn only_idle_attempts_are_abandoned() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryAttemptStore::new(clock.clone()));
        let worker = SweepWorker::new(store.clone(), clock.clone(), settings());

        let idle = store.create_if_absent("u1", "q1").await.unwrap();
        clock.advance(chrono::Duration::minutes(20));
        let busy = store.create_if_absent("u2", "q1").await.unwrap();
        clock.advance(chrono::Duration::minutes(15));
        store
            .append_answer(
                &busy.id,
                Answer {
                    question_id: "q".to_string(),
                    answer: AnswerValue::Flag(true),
                    is_correct: None,
                    time_spent: None,
                },
            )
            .await
            .unwrap();

        let report = worker.run_once().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                scanned: 1,
                abandoned: 1,
                skipped: 0
            }
        );
        assert_eq!(
            store.get(&idle.id).await.unwrap().status,
            AttemptStatus::Abandoned
        );
        assert!(store.get(&busy.id).await.unwrap().is_active());

        // the slot is free again
        store.create_if_absent("u1", "q1").await.unwrap();
    }

    #[tokio::test]
    async fn nothing_to_do_is_an_empty_report() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryAttemptStore::new(clock.clone()));
        let worker = SweepWorker::new(store, clock, settings());
        assert_eq!(worker.run_once().await.unwrap(), SweepReport::default());
    }
}
