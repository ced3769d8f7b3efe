use crate::error::ThrottleError;
use crate::redis::RedisStore;
use crate::state::State;
use crate::store::CounterStore;
use envconfig::Envconfig;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_PREFIX: &str = "speed_limiter";

/// Callback invoked with the attempt state whenever a call overflows its limit.
pub type OnThrottled = Arc<dyn Fn(&State) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Redis connection URL
    #[envconfig(from = "REDIS_URL", default = "redis://127.0.0.1:6379/0")]
    pub redis_url: String,

    /// Namespace prepended to every throttle key
    #[envconfig(from = "SPEED_LIMITER_PREFIX", default = "speed_limiter")]
    pub prefix: String,

    /// Skip throttling entirely
    #[envconfig(from = "SPEED_LIMITER_NO_LIMIT", default = "false")]
    pub no_limit: bool,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn validate(&self) -> Result<(), ThrottleError> {
        if self.redis_url.is_empty() {
            return Err(ThrottleError::Configuration(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ThrottleError::Configuration(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        if self.prefix.is_empty() {
            return Err(ThrottleError::Configuration(
                "Key prefix cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Resolved limiter configuration shared by every throttle call.
///
/// Built once at startup and handed around behind an `Arc`.
#[derive(Clone)]
pub struct LimiterConfig {
    store: Arc<dyn CounterStore>,
    prefix: String,
    no_limit: bool,
    on_throttled: Option<OnThrottled>,
}

impl LimiterConfig {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_PREFIX.to_string(),
            no_limit: false,
            on_throttled: None,
        }
    }

    /// Build a Redis backed configuration from environment settings.
    pub fn from_config(config: &Config) -> Result<Self, ThrottleError> {
        config.validate()?;
        let store = RedisStore::new(&config.redis_url)?;

        Ok(Self::new(Arc::new(store))
            .prefix(config.prefix.clone())
            .no_limit(config.no_limit))
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn no_limit(mut self, no_limit: bool) -> Self {
        self.no_limit = no_limit;
        self
    }

    /// Global callback, run before any per-call callback.
    pub fn on_throttled<F>(mut self, callback: F) -> Self
    where
        F: Fn(&State) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_throttled = Some(Arc::new(callback));
        self
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn key_prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_no_limit(&self) -> bool {
        self.no_limit
    }

    pub fn global_on_throttled(&self) -> Option<&OnThrottled> {
        self.on_throttled.as_ref()
    }
}

impl fmt::Debug for LimiterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterConfig")
            .field("prefix", &self.prefix)
            .field("no_limit", &self.no_limit)
            .field("on_throttled", &self.on_throttled.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn config(redis_url: &str, prefix: &str) -> Config {
        Config {
            redis_url: redis_url.to_string(),
            prefix: prefix.to_string(),
            no_limit: false,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(config("redis://localhost:6379", "speed_limiter").validate().is_ok());
        assert!(config("rediss://localhost:6379", "app").validate().is_ok());
    }

    #[test]
    fn test_invalid_redis_url() {
        assert!(config("", "speed_limiter").validate().is_err());
        assert!(config("http://localhost:6379", "speed_limiter").validate().is_err());
    }

    #[test]
    fn test_empty_prefix_rejected() {
        assert!(config("redis://localhost:6379", "").validate().is_err());
    }

    #[test]
    fn test_limiter_config_defaults() {
        let config = LimiterConfig::new(Arc::new(MemoryStore::new()));
        assert_eq!(config.key_prefix(), "speed_limiter");
        assert!(!config.is_no_limit());
        assert!(config.global_on_throttled().is_none());
    }

    #[test]
    fn test_limiter_config_from_env_settings() {
        let mut settings = config("redis://127.0.0.1:6379/0", "jobs");
        settings.no_limit = true;

        let config = LimiterConfig::from_config(&settings).unwrap();
        assert_eq!(config.key_prefix(), "jobs");
        assert!(config.is_no_limit());
    }
}
