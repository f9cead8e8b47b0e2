use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a quota window is positioned in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
    /// Window opens at the first use after the previous one elapsed.
    #[default]
    Rolling,
    /// Window boundaries are multiples of the duration since the Unix epoch.
    Fixed,
}

impl WindowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowPolicy::Rolling => "rolling",
            WindowPolicy::Fixed => "fixed",
        }
    }
}

/// Configured limit for one resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaRule {
    pub limit: u32,
    pub window_secs: u64,
    #[serde(default)]
    pub policy: WindowPolicy,
}

/// Persisted counter state for one (user, resource) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaRecord {
    pub used: u32,
    pub window_start_ms: i64,
    pub total_consumed: u64,
}

/// What the store reports back after an atomic consume or a peek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub granted: bool,
    pub used: u32,
    pub window_start_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub resource: String,
    pub allowed: bool,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Set when the backing store could not be reached and the ledger failed closed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unavailable: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConsumeQuotaQuery {
    #[serde(default = "default_cost")]
    pub cost: u32,
}

fn default_cost() -> u32 {
    1
}

impl QuotaRule {
    pub fn window_ms(&self) -> i64 {
        i64::try_from(self.window_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    /// Returns the start of the window that contains `now_ms` and whether the stored
    /// window has to be reset to reach it.
    pub fn current_window(&self, stored_start_ms: Option<i64>, now_ms: i64) -> (i64, bool) {
        let window = self.window_ms().max(1);
        match self.policy {
            WindowPolicy::Rolling => match stored_start_ms {
                Some(start) if now_ms < start.saturating_add(window) => (start, false),
                _ => (now_ms, true),
            },
            WindowPolicy::Fixed => {
                let aligned = now_ms - now_ms.rem_euclid(window);
                match stored_start_ms {
                    Some(start) if start >= aligned => (start, false),
                    _ => (aligned, true),
                }
            }
        }
    }

    pub fn reset_at_ms(&self, window_start_ms: i64) -> i64 {
        window_start_ms.saturating_add(self.window_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(policy: WindowPolicy) -> QuotaRule {
        QuotaRule {
            limit: 3,
            window_secs: 3600,
            policy,
        }
    }

    #[test]
    fn rolling_window_opens_at_first_use() {
        let r = rule(WindowPolicy::Rolling);
        assert_eq!(r.current_window(None, 5_000), (5_000, true));
        assert_eq!(r.current_window(Some(5_000), 5_000 + 3_599_999), (5_000, false));
        assert_eq!(
            r.current_window(Some(5_000), 5_000 + 3_600_000),
            (3_605_000, true)
        );
    }

    #[test]
    fn fixed_window_is_epoch_aligned() {
        let r = rule(WindowPolicy::Fixed);
        assert_eq!(r.current_window(None, 3_700_000), (3_600_000, true));
        assert_eq!(r.current_window(Some(3_600_000), 7_199_999), (3_600_000, false));
        assert_eq!(r.current_window(Some(3_600_000), 7_200_000), (7_200_000, true));
    }
}
