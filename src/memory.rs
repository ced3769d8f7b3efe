use crate::error::ThrottleError;
use crate::store::{CounterStore, Increment};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Single process counter store with Redis `INCR`/`EXPIRE NX`/`PTTL` semantics.
///
/// Expiry uses the tokio clock, so paused-time tests drive windows forward.
#[derive(Default)]
pub struct MemoryStore {
    counters: Mutex<HashMap<String, Counter>>,
    calls: AtomicUsize,
}

struct Counter {
    count: u64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store interactions served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Drop a key and its window.
    pub fn reset(&self, key: &str) -> Result<(), ThrottleError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Counter>>, ThrottleError> {
        self.counters
            .lock()
            .map_err(|_| ThrottleError::Internal("Failed to acquire lock on counters".to_string()))
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, period: u64) -> Result<Increment, ThrottleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let mut counters = self.lock()?;

        if counters.get(key).is_some_and(|counter| counter.is_expired(now)) {
            counters.remove(key);
        }

        let counter = counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: None,
        });
        counter.count += 1;

        // TTL rounds to the nearest second
        let ttl = match counter.expires_at {
            Some(at) => ((at.saturating_duration_since(now).as_millis() + 500) / 1000) as i64,
            None => {
                counter.expires_at = Some(now + Duration::from_secs(period));
                -1
            }
        };

        Ok(Increment {
            count: counter.count,
            ttl: Some(ttl),
        })
    }

    async fn ttl(&self, key: &str) -> Result<f64, ThrottleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let counters = self.lock()?;

        let millis = match counters.get(key) {
            Some(counter) if counter.is_expired(now) => -2,
            Some(Counter {
                expires_at: Some(at),
                ..
            }) => at.saturating_duration_since(now).as_millis() as i64,
            Some(_) => -1,
            None => -2,
        };

        Ok(millis as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_increment_counts_within_window() {
        let store = MemoryStore::new();

        let first = store.increment("k", 1).await.unwrap();
        assert_eq!(first, Increment { count: 1, ttl: Some(-1) });

        let second = store.increment("k", 1).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(store.ttl("k").await.unwrap(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expires() {
        let store = MemoryStore::new();
        store.increment("k", 1).await.unwrap();
        store.increment("k", 1).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        let ttl = store.ttl("k").await.unwrap();
        assert!((0.59..=0.6).contains(&ttl), "ttl was {}", ttl);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(store.ttl("k").await.unwrap() < 0.0);
        assert_eq!(store.increment("k", 1).await.unwrap().count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_ttl_rounds_to_nearest_second() {
        let store = MemoryStore::new();
        store.increment("k", 1).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.increment("k", 1).await.unwrap().ttl, Some(1));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.increment("k", 1).await.unwrap().ttl, Some(0));
    }

    #[tokio::test]
    async fn test_missing_key_has_negative_ttl() {
        let store = MemoryStore::new();
        assert_eq!(store.ttl("missing").await.unwrap(), -0.002);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_without_expiry() {
        let store = MemoryStore::new();
        store.counters.lock().unwrap().insert(
            "k".to_string(),
            Counter {
                count: 3,
                expires_at: None,
            },
        );

        assert_eq!(store.ttl("k").await.unwrap(), -0.001);

        let increment = store.increment("k", 5).await.unwrap();
        assert_eq!(increment, Increment { count: 4, ttl: Some(-1) });
        assert_eq!(store.ttl("k").await.unwrap(), 5.0);
    }

    #[tokio::test]
    async fn test_reset_and_call_counter() {
        let store = MemoryStore::new();
        store.increment("k", 60).await.unwrap();
        store.reset("k").unwrap();

        assert_eq!(store.increment("k", 60).await.unwrap().count, 1);
        assert_eq!(store.calls(), 2);
    }
}
