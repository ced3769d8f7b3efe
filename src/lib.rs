pub mod config;
pub mod error;
pub mod limiter;
pub mod memory;
pub mod params;
pub mod redis;
pub mod retry;
pub mod state;
pub mod store;
pub mod throttle;

pub use config::{Config, LimiterConfig, OnThrottled};
pub use error::{LimitExceeded, ThrottleError, ThrottleResult};
pub use limiter::SpeedLimiter;
pub use memory::MemoryStore;
pub use params::{RaiseOnThrottled, ThrottleOptions, ThrottleParams};
pub use crate::redis::RedisStore;
pub use retry::{Backoff, RetryPolicy};
pub use state::State;
pub use store::{CounterStore, Increment, IncrementPath};
pub use throttle::Throttle;
