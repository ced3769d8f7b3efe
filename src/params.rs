use crate::config::{LimiterConfig, OnThrottled};
use crate::error::{LimitExceeded, ThrottleError};
use crate::retry::{RetryOptions, RetryPolicy};
use crate::state::State;
use crate::throttle::Throttle;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use validator::Validate;

type ErrorConstructor = Arc<dyn Fn(State) -> ThrottleError + Send + Sync>;

/// What to do when a call overflows its limit
#[derive(Clone, Default)]
pub enum RaiseOnThrottled {
    /// Wait for the window to reset and try again
    #[default]
    Never,
    Throttled,
    LimitExceeded,
    /// Raise whatever the constructor builds from the overflow state
    Custom(ErrorConstructor),
}

impl RaiseOnThrottled {
    /// Raise an `E` built from the overflow state.
    pub fn error<E>() -> Self
    where
        E: From<State> + std::error::Error + Send + Sync + 'static,
    {
        RaiseOnThrottled::Custom(Arc::new(|state: State| ThrottleError::Custom(Box::new(E::from(state)))))
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, RaiseOnThrottled::Never)
    }

    /// Error to raise for `state`, or `None` when overflow should wait.
    pub fn to_error(&self, state: State) -> Option<ThrottleError> {
        match self {
            RaiseOnThrottled::Never => None,
            RaiseOnThrottled::Throttled => Some(ThrottleError::Throttled(LimitExceeded::from(state))),
            RaiseOnThrottled::LimitExceeded => {
                Some(ThrottleError::LimitExceeded(LimitExceeded::from(state)))
            }
            RaiseOnThrottled::Custom(constructor) => Some(constructor(state)),
        }
    }
}

impl fmt::Debug for RaiseOnThrottled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaiseOnThrottled::Never => write!(f, "Never"),
            RaiseOnThrottled::Throttled => write!(f, "Throttled"),
            RaiseOnThrottled::LimitExceeded => write!(f, "LimitExceeded"),
            RaiseOnThrottled::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl From<bool> for RaiseOnThrottled {
    fn from(raise: bool) -> Self {
        if raise {
            RaiseOnThrottled::Throttled
        } else {
            RaiseOnThrottled::Never
        }
    }
}

/// `raise_on_throttled` as written in an options document
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RaiseOption {
    Flag(bool),
    Kind(String),
}

impl RaiseOption {
    fn into_policy(self) -> Result<RaiseOnThrottled, ThrottleError> {
        match self {
            RaiseOption::Flag(raise) => Ok(raise.into()),
            RaiseOption::Kind(kind) => match kind.as_str() {
                "throttled" => Ok(RaiseOnThrottled::Throttled),
                "limit_exceeded" => Ok(RaiseOnThrottled::LimitExceeded),
                other => Err(ThrottleError::Configuration(format!(
                    "Unknown raise_on_throttled kind '{}'",
                    other
                ))),
            },
        }
    }
}

/// Throttle options loaded from a serialized document.
///
/// Unknown option names are rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThrottleOptions {
    #[serde(default)]
    raise_on_throttled: Option<RaiseOption>,
    #[serde(default)]
    retry: Option<RetryOptions>,
}

impl ThrottleOptions {
    pub fn from_value(value: serde_json::Value) -> Result<Self, ThrottleError> {
        serde_json::from_value(value)
            .map_err(|e| ThrottleError::Configuration(format!("Invalid throttle options: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self, ThrottleError> {
        serde_json::from_str(json)
            .map_err(|e| ThrottleError::Configuration(format!("Invalid throttle options: {}", e)))
    }
}

/// Parameters of a throttled call.
///
/// Built with [`ThrottleParams::new`] and the option setters, then turned into
/// a [`Throttle`] with [`ThrottleParams::build`], which validates them.
#[derive(Clone, Validate)]
pub struct ThrottleParams {
    config: Arc<LimiterConfig>,
    #[validate(length(min = 1, message = "key cannot be empty"))]
    key: String,
    #[validate(range(min = 1, message = "limit must be greater than 0"))]
    limit: u64,
    #[validate(range(min = 1, message = "period must be greater than 0"))]
    period: u64,
    on_throttled: Option<OnThrottled>,
    raise_on_throttled: RaiseOnThrottled,
    retry: Option<RetryPolicy>,
}

impl ThrottleParams {
    /// `limit` calls per `period` seconds for `key`
    pub fn new(config: Arc<LimiterConfig>, key: impl Into<String>, limit: u64, period: u64) -> Self {
        Self {
            config,
            key: key.into(),
            limit,
            period,
            on_throttled: None,
            raise_on_throttled: RaiseOnThrottled::Never,
            retry: None,
        }
    }

    /// Per-call callback, run after the global one.
    pub fn on_throttled<F>(mut self, callback: F) -> Self
    where
        F: Fn(&State) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_throttled = Some(Arc::new(callback));
        self
    }

    pub fn raise_on_throttled(mut self, raise: impl Into<RaiseOnThrottled>) -> Self {
        self.raise_on_throttled = raise.into();
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn options(mut self, options: ThrottleOptions) -> Result<Self, ThrottleError> {
        if let Some(raise) = options.raise_on_throttled {
            self.raise_on_throttled = raise.into_policy()?;
        }
        if let Some(retry) = options.retry {
            self.retry = Some(retry.into());
        }
        Ok(self)
    }

    pub fn build(self) -> Result<Throttle, ThrottleError> {
        self.validate()
            .map_err(|e| ThrottleError::Configuration(e.to_string()))?;
        Ok(Throttle::new(Arc::new(self)))
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Caller supplied key, without prefix
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn callback(&self) -> Option<&OnThrottled> {
        self.on_throttled.as_ref()
    }

    pub fn raise_policy(&self) -> &RaiseOnThrottled {
        &self.raise_on_throttled
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// Namespaced key holding the counter in the store
    pub fn store_key(&self) -> String {
        format!("{}:{}", self.config.key_prefix(), self.key)
    }

    pub fn create_state(self: &Arc<Self>, count: Option<u64>, ttl: Option<f64>) -> State {
        State::new(Arc::clone(self), count, ttl)
    }
}

impl fmt::Debug for ThrottleParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleParams")
            .field("key", &self.key)
            .field("limit", &self.limit)
            .field("period", &self.period)
            .field("on_throttled", &self.on_throttled.is_some())
            .field("raise_on_throttled", &self.raise_on_throttled)
            .field("retry", &self.retry)
            .finish()
    }
}
