use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ArenaError, Result};
use crate::metrics::record_quota_decision;
use crate::models::{QuotaRule, QuotaSnapshot, QuotaStatus};
use crate::storage::{QuotaKey, QuotaStore};
use crate::utils::time::{millis_to_chrono, Clock};

/// Per-user, per-resource usage windows. Fails closed: when the store cannot
/// be reached every request is denied and flagged `unavailable`.
pub struct QuotaLedger {
    store: Arc<dyn QuotaStore>,
    rules: HashMap<String, QuotaRule>,
    clock: Arc<dyn Clock>,
}

impl QuotaLedger {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        rules: HashMap<String, QuotaRule>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            rules,
            clock,
        }
    }

    pub fn rule(&self, resource: &str) -> Result<&QuotaRule> {
        self.rules
            .get(resource)
            .ok_or_else(|| {
                ArenaError::validation(format!("Unknown quota resource: {}", resource))
            })
    }

    fn status(
        resource: &str,
        rule: &QuotaRule,
        snapshot: QuotaSnapshot,
        allowed: bool,
    ) -> QuotaStatus {
        QuotaStatus {
            resource: resource.to_string(),
            allowed,
            used: snapshot.used,
            limit: rule.limit,
            remaining: rule.limit.saturating_sub(snapshot.used),
            reset_at: millis_to_chrono(rule.reset_at_ms(snapshot.window_start_ms)),
            unavailable: false,
        }
    }

    fn unavailable(resource: &str, rule: &QuotaRule, now: DateTime<Utc>) -> QuotaStatus {
        let (start, _) = rule.current_window(None, now.timestamp_millis());
        QuotaStatus {
            resource: resource.to_string(),
            allowed: false,
            used: 0,
            limit: rule.limit,
            remaining: 0,
            reset_at: millis_to_chrono(rule.reset_at_ms(start)),
            unavailable: true,
        }
    }

    pub async fn check_and_consume(
        &self,
        user_id: &str,
        resource: &str,
        cost: u32,
    ) -> Result<QuotaStatus> {
        if cost == 0 {
            return Err(ArenaError::validation("cost must be at least 1"));
        }
        let rule = self.rule(resource)?;
        let key = QuotaKey::new(user_id, resource);
        let now = self.clock.now();

        match self.store.consume(&key, cost, rule, now).await {
            Ok(snapshot) => {
                let status = Self::status(resource, rule, snapshot, snapshot.granted);
                if status.allowed {
                    record_quota_decision(resource, "granted");
                } else {
                    record_quota_decision(resource, "denied");
                    tracing::info!(
                        user_id,
                        resource,
                        used = status.used,
                        limit = status.limit,
                        reset_at = %status.reset_at,
                        "Quota denied"
                    );
                }
                Ok(status)
            }
            Err(e) => {
                record_quota_decision(resource, "unavailable");
                tracing::error!(
                    user_id,
                    resource,
                    error = %e,
                    "Quota store unavailable, denying"
                );
                Ok(Self::unavailable(resource, rule, now))
            }
        }
    }

    /// Read-only view. `allowed` tells whether one more unit would be granted.
    pub async fn peek(&self, user_id: &str, resource: &str) -> Result<QuotaStatus> {
        let rule = self.rule(resource)?;
        let key = QuotaKey::new(user_id, resource);
        let now = self.clock.now();

        match self.store.peek(&key, rule, now).await {
            Ok(snapshot) => Ok(Self::status(resource, rule, snapshot, snapshot.granted)),
            Err(e) => {
                tracing::error!(user_id, resource, error = %e, "Quota store unavailable on peek");
                Ok(Self::unavailable(resource, rule, now))
            }
        }
    }

    pub async fn refund(&self, user_id: &str, resource: &str, cost: u32) -> Result<QuotaStatus> {
        let rule = self.rule(resource)?;
        let key = QuotaKey::new(user_id, resource);
        let snapshot = self.store.refund(&key, cost, rule, self.clock.now()).await?;
        tracing::debug!(user_id, resource, cost, used = snapshot.used, "Quota refunded");
        Ok(Self::status(resource, rule, snapshot, snapshot.used < rule.limit))
    }

    /// Consumes or fails: a denial becomes `QuotaExceeded`, an unreachable
    /// store becomes `StorageUnavailable`.
    pub async fn require(&self, user_id: &str, resource: &str, cost: u32) -> Result<QuotaStatus> {
        let status = self.check_and_consume(user_id, resource, cost).await?;
        if status.unavailable {
            return Err(ArenaError::StorageUnavailable(format!(
                "quota store for {} unreachable",
                resource
            )));
        }
        if !status.allowed {
            return Err(ArenaError::QuotaExceeded {
                resource: resource.to_string(),
                reset_at: status.reset_at,
            });
        }
        Ok(status)
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}
