use crate::config::LimiterConfig;
use crate::params::{RaiseOnThrottled, ThrottleParams};
use crate::retry::RetryPolicy;
use std::fmt;
use std::sync::Arc;

/// Snapshot of a single throttle attempt.
///
/// `count` and `ttl` come from one store read and may be stale by the time
/// they are inspected. Both are `None` when throttling is bypassed.
#[derive(Clone)]
pub struct State {
    params: Arc<ThrottleParams>,
    count: Option<u64>,
    ttl: Option<f64>,
}

impl State {
    pub fn new(params: Arc<ThrottleParams>, count: Option<u64>, ttl: Option<f64>) -> Self {
        Self { params, count, ttl }
    }

    /// Counter value observed on this attempt
    pub fn count(&self) -> Option<u64> {
        self.count
    }

    /// Seconds until the window resets; negative when no window is active
    pub fn ttl(&self) -> Option<f64> {
        self.ttl
    }

    pub fn params(&self) -> &ThrottleParams {
        &self.params
    }

    pub fn config(&self) -> &LimiterConfig {
        self.params.config()
    }

    pub fn key(&self) -> &str {
        self.params.key()
    }

    pub fn limit(&self) -> u64 {
        self.params.limit()
    }

    pub fn period(&self) -> u64 {
        self.params.period()
    }

    pub fn raise_on_throttled(&self) -> &RaiseOnThrottled {
        self.params.raise_policy()
    }

    pub fn retry(&self) -> Option<&RetryPolicy> {
        self.params.retry_policy()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<State key={:?} count=", self.key())?;
        match self.count {
            Some(count) => write!(f, "{}", count)?,
            None => write!(f, "none")?,
        }
        write!(f, " ttl=")?;
        match self.ttl {
            Some(ttl) => write!(f, "{}>", ttl),
            None => write!(f, "none>"),
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn params() -> Arc<ThrottleParams> {
        let config = Arc::new(LimiterConfig::new(Arc::new(MemoryStore::new())));
        Arc::new(ThrottleParams::new(config, "test_key", 10, 60))
    }

    #[test]
    fn test_display() {
        let state = State::new(params(), Some(1), Some(2.0));
        assert_eq!(state.to_string(), "<State key=\"test_key\" count=1 ttl=2>");
        assert_eq!(format!("{:?}", state), state.to_string());
    }

    #[test]
    fn test_display_without_observation() {
        let state = State::new(params(), None, None);
        assert_eq!(state.to_string(), "<State key=\"test_key\" count=none ttl=none>");
    }

    #[test]
    fn test_delegates_to_params() {
        let state = State::new(params(), Some(5), Some(2.3));
        assert_eq!(state.key(), "test_key");
        assert_eq!(state.limit(), 10);
        assert_eq!(state.period(), 60);
        assert_eq!(state.count(), Some(5));
        assert_eq!(state.ttl(), Some(2.3));
        assert_eq!(state.config().key_prefix(), "speed_limiter");
        assert!(state.retry().is_none());
    }
}
