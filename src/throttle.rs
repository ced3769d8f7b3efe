use crate::error::{ThrottleError, ThrottleResult};
use crate::params::ThrottleParams;
use crate::state::State;
use crate::store::CounterStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fixed-window throttle for one key.
///
/// Cheap to clone; every clone shares the same parameters and store handle.
#[derive(Debug, Clone)]
pub struct Throttle {
    params: Arc<ThrottleParams>,
}

impl Throttle {
    pub(crate) fn new(params: Arc<ThrottleParams>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ThrottleParams {
        &self.params
    }

    /// Run `operation` once the key has room in its current window.
    ///
    /// Overflowing calls wait for the window to reset unless the parameters
    /// ask to raise. With a retry policy, failures of the operation rerun the
    /// whole sequence.
    pub async fn call<T, F, Fut>(&self, mut operation: F) -> ThrottleResult<T>
    where
        F: FnMut(State) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let Some(policy) = self.params.retry_policy() else {
            return self.throttle(&mut operation).await;
        };

        let mut attempt = 1;
        loop {
            match self.throttle(&mut operation).await {
                Err(err) if policy.should_retry(&err, attempt) => {
                    let delay = policy.delay(attempt);
                    warn!(
                        key = %self.params.key(),
                        attempt,
                        max_tries = policy.max_tries(),
                        error = %err,
                        "Throttled operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn throttle<T, F, Fut>(&self, operation: &mut F) -> ThrottleResult<T>
    where
        F: FnMut(State) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let config = self.params.config();
        if config.is_no_limit() {
            return operation(self.params.create_state(None, None))
                .await
                .map_err(ThrottleError::Operation);
        }

        let store = config.store();
        let store_key = self.params.store_key();
        let limit = self.params.limit();

        loop {
            let increment = store.increment(&store_key, self.params.period()).await?;

            if increment.count <= limit {
                debug!(key = %store_key, count = increment.count, limit, "Admitted");
                let state = self
                    .params
                    .create_state(Some(increment.count), increment.ttl.map(|ttl| ttl as f64));
                return operation(state).await.map_err(ThrottleError::Operation);
            }

            self.wait_for_interval(store.as_ref(), &store_key, increment.count)
                .await?;
        }
    }

    /// Handle an overflowing attempt and wait out the current window.
    ///
    /// Returns immediately when the store reports that the window is already
    /// gone, so the caller increments again instead of sleeping on a stale TTL.
    async fn wait_for_interval(
        &self,
        store: &dyn CounterStore,
        store_key: &str,
        count: u64,
    ) -> ThrottleResult<()> {
        let ttl = store.ttl(store_key).await?;
        if ttl < 0.0 {
            return Ok(());
        }

        let state = self.params.create_state(Some(count), Some(ttl));
        if let Some(err) = self.params.raise_policy().to_error(state.clone()) {
            debug!(key = %store_key, count, ttl, "Limit exceeded, raising");
            return Err(err);
        }

        if let Some(callback) = self.params.config().global_on_throttled() {
            callback(&state).map_err(ThrottleError::Callback)?;
        }
        if let Some(callback) = self.params.callback() {
            callback(&state).map_err(ThrottleError::Callback)?;
        }

        let ttl = store.ttl(store_key).await?;
        if ttl < 0.0 {
            return Ok(());
        }

        info!(key = %store_key, count, ttl, "Limit exceeded, waiting for window reset");
        tokio::time::sleep(Duration::from_secs_f64(ttl)).await;
        Ok(())
    }
}
