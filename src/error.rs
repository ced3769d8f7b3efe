use crate::state::State;
use thiserror::Error;

/// Errors raised while throttling an operation.
#[derive(Debug, Error)]
pub enum ThrottleError {
    /// Connectivity or protocol failure reported by the counter store
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    /// Invalid parameters or unknown options
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Raised for `RaiseOnThrottled::Throttled`
    #[error("{0}")]
    Throttled(LimitExceeded),

    /// Raised for `RaiseOnThrottled::LimitExceeded`
    #[error("{0}")]
    LimitExceeded(LimitExceeded),

    /// Raised by a caller supplied constructor
    #[error("{0}")]
    Custom(Box<dyn std::error::Error + Send + Sync>),

    /// An overflow callback failed
    #[error("Overflow callback failed: {0}")]
    Callback(anyhow::Error),

    /// The throttled operation itself failed
    #[error(transparent)]
    Operation(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ThrottleError {
    /// Attempt state carried by the built-in overflow errors.
    pub fn state(&self) -> Option<&State> {
        match self {
            ThrottleError::Throttled(err) | ThrottleError::LimitExceeded(err) => Some(err.state()),
            _ => None,
        }
    }

    /// Whether this error was raised because the limit was reached.
    pub fn is_overflow(&self) -> bool {
        matches!(
            self,
            ThrottleError::Throttled(_) | ThrottleError::LimitExceeded(_) | ThrottleError::Custom(_)
        )
    }
}

pub type ThrottleResult<T> = Result<T, ThrottleError>;

/// Overflow error built from the state observed when the limit was reached.
#[derive(Debug, Clone, Error)]
#[error(
    "{key} rate limit exceeded. Retry after {ttl} seconds. limit={limit}, count={count}, period={period}"
)]
pub struct LimitExceeded {
    key: String,
    count: u64,
    ttl: f64,
    limit: u64,
    period: u64,
    state: State,
}

impl LimitExceeded {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Seconds until the window resets, as observed when raising.
    pub fn ttl(&self) -> f64 {
        self.ttl
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn state(&self) -> &State {
        &self.state
    }
}

impl From<State> for LimitExceeded {
    fn from(state: State) -> Self {
        Self {
            key: state.key().to_string(),
            count: state.count().unwrap_or_default(),
            ttl: state.ttl().unwrap_or(-1.0),
            limit: state.limit(),
            period: state.period(),
            state,
        }
    }
}
