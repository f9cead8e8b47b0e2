use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use redis::aio::ConnectionManager;

use super::{QuotaKey, QuotaStore};
use crate::error::Result;
use crate::metrics::track_cache_operation;
use crate::models::{QuotaRule, QuotaSnapshot};

/// Shared by both scripts: resolves `start` and `reset` for the window that
/// contains `now`. ARGV[3] = now_ms, ARGV[4] = window_ms, ARGV[5] = policy.
const WINDOW_LUA: &str = r#"
    local key = KEYS[1]
    local now = tonumber(ARGV[3])
    local window = tonumber(ARGV[4])
    local stored = redis.call('HGET', key, 'window_start')
    local start = now
    local reset = true
    if ARGV[5] == 'fixed' then
        start = now - (now % window)
        if stored and tonumber(stored) >= start then
            start = tonumber(stored)
            reset = false
        end
    elseif stored and now < tonumber(stored) + window then
        start = tonumber(stored)
        reset = false
    end
    local used = 0
    if not reset then
        used = tonumber(redis.call('HGET', key, 'used') or '0')
    end
"#;

/// ARGV[1] = limit, ARGV[2] = cost
const CONSUME_LUA: &str = r#"
    local limit = tonumber(ARGV[1])
    local cost = tonumber(ARGV[2])
    local granted = 0
    if used + cost <= limit then
        used = used + cost
        granted = 1
        redis.call('HINCRBY', key, 'total', cost)
    end
    redis.call('HSET', key, 'used', used, 'window_start', start)
    return {granted, used, start}
"#;

/// ARGV[2] = cost
const REFUND_LUA: &str = r#"
    if reset then
        return {1, 0, start}
    end
    local refund = math.min(tonumber(ARGV[2]), used)
    used = used - refund
    redis.call('HSET', key, 'used', used)
    redis.call('HINCRBY', key, 'total', -refund)
    return {1, used, start}
"#;

lazy_static! {
    static ref CONSUME_SCRIPT: redis::Script =
        redis::Script::new(&format!("{}{}", WINDOW_LUA, CONSUME_LUA));
    static ref REFUND_SCRIPT: redis::Script =
        redis::Script::new(&format!("{}{}", WINDOW_LUA, REFUND_LUA));
}

/// Quota counters in Redis hashes (`quota:{resource}:{user}`), one script call
/// per decision so concurrent consumers cannot overdraw a window.
pub struct RedisQuotaStore {
    redis: ConnectionManager,
}

impl RedisQuotaStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    async fn run(
        &self,
        operation: &str,
        script: &redis::Script,
        key: &QuotaKey,
        cost: u32,
        rule: &QuotaRule,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot> {
        let mut conn = self.redis.clone();
        let (granted, used, window_start): (i64, i64, i64) =
            track_cache_operation(operation, async {
                script
                    .key(key.redis_key())
                    .arg(rule.limit)
                    .arg(cost)
                    .arg(now.timestamp_millis())
                    .arg(rule.window_ms().max(1))
                    .arg(rule.policy.as_str())
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        Ok(QuotaSnapshot {
            granted: granted == 1,
            used: u32::try_from(used.max(0)).unwrap_or(u32::MAX),
            window_start_ms: window_start,
        })
    }
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    async fn consume(
        &self,
        key: &QuotaKey,
        cost: u32,
        rule: &QuotaRule,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot> {
        self.run("quota_consume", &CONSUME_SCRIPT, key, cost, rule, now)
            .await
    }

    async fn peek(
        &self,
        key: &QuotaKey,
        rule: &QuotaRule,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot> {
        let mut conn = self.redis.clone();
        let (used, window_start): (Option<u32>, Option<i64>) =
            track_cache_operation("quota_peek", async {
                redis::cmd("HMGET")
                    .arg(key.redis_key())
                    .arg("used")
                    .arg("window_start")
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        let (start, reset) = rule.current_window(window_start, now.timestamp_millis());
        let used = if reset { 0 } else { used.unwrap_or(0) };
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
        self.run("quota_refund", &REFUND_SCRIPT, key, cost, rule, now)
            .await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
