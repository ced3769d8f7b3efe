use crate::config::{Config, LimiterConfig};
use crate::error::{ThrottleError, ThrottleResult};
use crate::params::ThrottleParams;
use crate::state::State;
use std::future::Future;
use std::sync::Arc;

/// Entry point for throttling operations against one configuration.
#[derive(Debug, Clone)]
pub struct SpeedLimiter {
    config: Arc<LimiterConfig>,
}

impl SpeedLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Redis backed limiter configured from the environment
    pub fn from_env() -> Result<Self, ThrottleError> {
        let config = Config::from_env()
            .map_err(|e| ThrottleError::Configuration(format!("Failed to load configuration: {}", e)))?;
        Ok(Self::new(LimiterConfig::from_config(&config)?))
    }

    pub fn config(&self) -> &Arc<LimiterConfig> {
        &self.config
    }

    /// Start building parameters for `key`.
    pub fn params(&self, key: impl Into<String>, limit: u64, period: u64) -> ThrottleParams {
        ThrottleParams::new(Arc::clone(&self.config), key, limit, period)
    }

    /// Run `operation` at most `limit` times per `period` seconds for `key`.
    pub async fn throttle<T, F, Fut>(
        &self,
        key: impl Into<String>,
        limit: u64,
        period: u64,
        operation: F,
    ) -> ThrottleResult<T>
    where
        F: FnMut(State) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.params(key, limit, period).build()?.call(operation).await
    }
}
