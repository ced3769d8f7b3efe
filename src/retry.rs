//! Retry policy for throttled operations
//!
//! Wraps the whole throttle-and-execute sequence. Only failures of the
//! operation or of an overflow callback are retried; overflow, store and
//! configuration errors always propagate.

use crate::error::ThrottleError;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TRIES: u32 = 2;
const DEFAULT_SLEEP: Duration = Duration::from_secs(1);

/// Wait between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(*max)
            }
        }
    }
}

type RetryPredicate = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Which operation failures are retried
#[derive(Clone, Default)]
pub enum RetryOn {
    #[default]
    Any,
    Matching(RetryPredicate),
}

impl RetryOn {
    fn matches(&self, err: &anyhow::Error) -> bool {
        match self {
            RetryOn::Any => true,
            RetryOn::Matching(predicate) => predicate(err),
        }
    }
}

impl fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryOn::Any => write!(f, "Any"),
            RetryOn::Matching(_) => write!(f, "Matching(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    tries: u32,
    backoff: Backoff,
    retry_on: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: DEFAULT_TRIES,
            backoff: Backoff::Fixed(DEFAULT_SLEEP),
            retry_on: RetryOn::Any,
        }
    }
}

impl RetryPolicy {
    pub fn new(tries: u32) -> Self {
        Self {
            tries: tries.max(1),
            ..Self::default()
        }
    }

    /// Retry only failures whose error is an `E`.
    pub fn on<E>() -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::default().retry_if(|err| err.is::<E>())
    }

    pub fn tries(mut self, tries: u32) -> Self {
        self.tries = tries.max(1);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.retry_on = RetryOn::Matching(Arc::new(predicate));
        self
    }

    pub fn max_tries(&self) -> u32 {
        self.tries
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Whether `err` from attempt number `attempt` earns another attempt.
    pub fn should_retry(&self, err: &ThrottleError, attempt: u32) -> bool {
        if attempt >= self.tries {
            return false;
        }

        match err {
            ThrottleError::Operation(err) | ThrottleError::Callback(err) => self.retry_on.matches(err),
            _ => false,
        }
    }
}

/// Serialized form of a retry policy, e.g. `{"tries": 3, "sleep": "500ms"}`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryOptions {
    #[serde(default = "default_tries")]
    pub tries: u32,
    #[serde(default = "default_sleep", with = "humantime_serde")]
    pub sleep: Duration,
}

fn default_tries() -> u32 {
    DEFAULT_TRIES
}

fn default_sleep() -> Duration {
    DEFAULT_SLEEP
}

impl From<RetryOptions> for RetryPolicy {
    fn from(options: RetryOptions) -> Self {
        let backoff = if options.sleep.is_zero() {
            Backoff::None
        } else {
            Backoff::Fixed(options.sleep)
        };

        RetryPolicy::new(options.tries).backoff(backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[derive(Debug, thiserror::Error)]
    #[error("connection reset")]
    struct ConnectionReset;

    #[test]
    fn test_exponential_backoff_caps() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(350),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(350));
    }

    #[test]
    fn test_retries_operation_errors_up_to_tries() {
        let policy = RetryPolicy::new(2);
        let err = ThrottleError::Operation(anyhow!("boom"));
        assert!(policy.should_retry(&err, 1));
        assert!(!policy.should_retry(&err, 2));
    }

    #[test]
    fn test_never_retries_throttling_errors() {
        let policy = RetryPolicy::new(5);
        assert!(!policy.should_retry(&ThrottleError::Configuration("x".into()), 1));
        assert!(!policy.should_retry(&ThrottleError::Internal("x".into()), 1));
    }

    #[test]
    fn test_retry_on_error_type() {
        let policy = RetryPolicy::on::<ConnectionReset>().tries(3);
        assert!(policy.should_retry(&ThrottleError::Operation(anyhow::Error::new(ConnectionReset)), 1));
        assert!(!policy.should_retry(&ThrottleError::Operation(anyhow!("other")), 1));
    }

    #[test]
    fn test_options_deserialize() {
        let options: RetryOptions = serde_json::from_value(serde_json::json!({
            "tries": 3,
            "sleep": "250ms"
        }))
        .unwrap();
        let policy = RetryPolicy::from(options);
        assert_eq!(policy.max_tries(), 3);
        assert_eq!(policy.delay(1), Duration::from_millis(250));

        let policy = RetryPolicy::from(serde_json::from_value::<RetryOptions>(serde_json::json!({})).unwrap());
        assert_eq!(policy.max_tries(), 2);
        assert_eq!(policy.delay(1), Duration::from_secs(1));
    }

    #[test]
    fn test_options_reject_unknown_fields() {
        let result = serde_json::from_value::<RetryOptions>(serde_json::json!({ "attempts": 3 }));
        assert!(result.is_err());
    }
}
