//! Counter store abstraction
//!
//! A counter store performs one atomic "increment and cap the window" step per
//! throttle attempt and reports how long the current window has left. Any store
//! exposing `INCR`, `EXPIRE`, `PTTL` and `TTL` with Redis semantics can back it.

use crate::error::ThrottleError;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.(\d+)").expect("version pattern is valid"));

/// First Redis release understanding `EXPIRE key seconds NX`
const CONDITIONAL_EXPIRY_MAJOR: u64 = 7;

/// Result of one increment round trip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Increment {
    /// Counter value after this increment
    pub count: u64,
    /// TTL in whole seconds read together with the increment, when the path reports one
    pub ttl: Option<i64>,
}

/// Shared counter store used to coordinate throttled callers.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` and make sure it expires after `period` seconds.
    async fn increment(&self, key: &str, period: u64) -> Result<Increment, ThrottleError>;

    /// Remaining window time in seconds; negative when the key has no expiry.
    async fn ttl(&self, key: &str) -> Result<f64, ThrottleError>;
}

/// Protocol used to set the window expiry on increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementPath {
    /// `INCR` + `TTL` in one transaction, then `EXPIRE` when no TTL was set.
    ///
    /// Two callers can both observe a missing TTL before either sets it; both
    /// then set the same expiry. Accepted for pre-7.0 servers.
    Legacy,
    /// `INCR` + `EXPIRE NX` in one transaction.
    ConditionalExpiry,
}

impl IncrementPath {
    /// Pick the path for a reported `redis_version`.
    pub fn for_version(version: &str) -> Self {
        let major = VERSION_PATTERN
            .captures(version.trim())
            .and_then(|caps| caps.get(1))
            .and_then(|major| major.as_str().parse::<u64>().ok());

        match major {
            Some(major) if major >= CONDITIONAL_EXPIRY_MAJOR => IncrementPath::ConditionalExpiry,
            _ => IncrementPath::Legacy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_versions() {
        assert_eq!(IncrementPath::for_version("6.2.14"), IncrementPath::Legacy);
        assert_eq!(IncrementPath::for_version("5.0.7"), IncrementPath::Legacy);
    }

    #[test]
    fn test_conditional_expiry_versions() {
        assert_eq!(IncrementPath::for_version("7.0.0"), IncrementPath::ConditionalExpiry);
        assert_eq!(IncrementPath::for_version("7.2.4"), IncrementPath::ConditionalExpiry);
        assert_eq!(IncrementPath::for_version("10.0.1"), IncrementPath::ConditionalExpiry);
    }

    #[test]
    fn test_unparseable_version_falls_back_to_legacy() {
        assert_eq!(IncrementPath::for_version(""), IncrementPath::Legacy);
        assert_eq!(IncrementPath::for_version("unknown"), IncrementPath::Legacy);
    }
}
