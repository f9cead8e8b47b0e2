use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

use crate::models::{QuotaRule, WindowPolicy};

pub const AI_QUIZ_GENERATION: &str = "ai-quiz-generation";
pub const QUIZ_ATTEMPT: &str = "quiz-attempt";

#[derive(Debug, Clone)]
pub struct Config {
    pub env: String,
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    /// `user:password` expected on /metrics
    pub metrics_auth: String,
    pub server: ServerSettings,
    pub attempts: AttemptSettings,
    pub quotas: HashMap<String, QuotaRule>,
    pub gateway: GatewaySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttemptSettings {
    /// Attempts with no activity for this long are abandoned by the sweeper.
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: i64,
    /// Quota resource charged when a new attempt is created. `None` disables the check.
    pub quota_resource: Option<String>,
    pub conflict_retries: usize,
    pub run_migrations_on_start: bool,
}

impl Default for AttemptSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 60,
            sweep_batch_size: 200,
            quota_resource: Some(QUIZ_ATTEMPT.to_string()),
            conflict_retries: 3,
            run_migrations_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub inbound_channel: String,
    /// Room snapshots are published on `{outbound_prefix}{roomId}`.
    pub outbound_prefix: String,
    pub max_event_bytes: usize,
    pub room_queue_capacity: usize,
    /// A room with no events for this long is dropped; 0 keeps rooms forever.
    pub room_idle_secs: u64,
    pub modes: Vec<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            inbound_channel: "arena:events".to_string(),
            outbound_prefix: "arena:room:".to_string(),
            max_event_bytes: 4096,
            room_queue_capacity: 256,
            room_idle_secs: 15 * 60,
            modes: ["classic", "rapid", "survival", "multiplayer"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

pub fn default_quota_rules() -> HashMap<String, QuotaRule> {
    HashMap::from([
        (
            AI_QUIZ_GENERATION.to_string(),
            QuotaRule {
                limit: 10,
                window_secs: 3600,
                policy: WindowPolicy::Rolling,
            },
        ),
        (
            QUIZ_ATTEMPT.to_string(),
            QuotaRule {
                limit: 20,
                window_secs: 86_400,
                policy: WindowPolicy::Fixed,
            },
        ),
    ])
}

impl Default for Config {
    /// Local defaults with no external services configured. Used by tests and
    /// the in-memory backends.
    fn default() -> Self {
        Self {
            env: "dev".to_string(),
            mongo_uri: "mongodb://localhost:27017".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            mongo_database: "quizarena".to_string(),
            jwt_secret: "dev-secret-only-for-local-testing".to_string(),
            metrics_auth: "admin:changeme".to_string(),
            server: ServerSettings::default(),
            attempts: AttemptSettings::default(),
            quotas: default_quota_rules(),
            gateway: GatewaySettings::default(),
        }
    }
}

/// Reads an optional section; a missing key falls back to the section's defaults.
fn section<T: DeserializeOwned + Default>(
    settings: &config::Config,
    key: &str,
) -> Result<T, config::ConfigError> {
    match settings.get::<T>(key) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => Ok(T::default()),
        Err(e) => Err(e),
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml, then APP__SECTION__KEY overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let defaults = Config::default();

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or(defaults.mongo_uri);

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or(defaults.redis_uri);

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            Err(_) => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                defaults.jwt_secret
            }
        };

        let metrics_auth = settings
            .get_string("auth.metrics_auth")
            .or_else(|_| env::var("METRICS_AUTH"))
            .unwrap_or(defaults.metrics_auth);

        // Configured rules extend and override the built-in ones
        let mut quotas = default_quota_rules();
        quotas.extend(section::<HashMap<String, QuotaRule>>(&settings, "quotas")?);

        let config = Config {
            env: app_env,
            mongo_uri,
            redis_uri,
            mongo_database,
            jwt_secret,
            metrics_auth,
            server: section(&settings, "server")?,
            attempts: section(&settings, "attempts")?,
            quotas,
            gateway: section(&settings, "gateway")?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        for (resource, rule) in &self.quotas {
            if rule.limit == 0 || rule.window_secs == 0 {
                return Err(config::ConfigError::Message(format!(
                    "quota rule for {} needs a positive limit and window",
                    resource
                )));
            }
        }
        if let Some(resource) = &self.attempts.quota_resource {
            if !self.quotas.contains_key(resource) {
                return Err(config::ConfigError::Message(format!(
                    "attempts.quota_resource {} has no quota rule",
                    resource
                )));
            }
        }
        if self.gateway.modes.is_empty() {
            return Err(config::ConfigError::Message(
                "gateway.modes must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_carry_both_quota_rules() {
        let config = Config::default();
        assert_eq!(config.quotas[AI_QUIZ_GENERATION].limit, 10);
        assert_eq!(config.quotas[QUIZ_ATTEMPT].policy, WindowPolicy::Fixed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_window_is_rejected() {
        let mut config = Config::default();
        config.quotas.insert(
            "broken".to_string(),
            QuotaRule {
                limit: 1,
                window_secs: 0,
                policy: WindowPolicy::Rolling,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn attempt_resource_must_have_a_rule() {
        let mut config = Config::default();
        config.attempts.quota_resource = Some("unknown".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn env_overrides_nested_sections() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("APP__ATTEMPTS__IDLE_TIMEOUT_SECS", "900");
        env::set_var("APP__SERVER__PORT", "9090");

        let config = Config::load().unwrap();

        env::remove_var("APP__ATTEMPTS__IDLE_TIMEOUT_SECS");
        env::remove_var("APP__SERVER__PORT");
        env::remove_var("SKIP_ROOT_ENV");

        assert_eq!(config.attempts.idle_timeout_secs, 900);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.attempts.conflict_retries, 3);
    }
}
