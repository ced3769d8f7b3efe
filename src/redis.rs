use crate::error::ThrottleError;
use crate::store::{CounterStore, Increment, IncrementPath};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, InfoDict};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Counter store backed by a Redis server.
///
/// The connection and the increment path are each resolved once per handle
/// and shared by every concurrent caller afterwards.
pub struct RedisStore {
    client: Client,
    connection: OnceCell<MultiplexedConnection>,
    increment_path: OnceCell<IncrementPath>,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self, ThrottleError> {
        let client = Client::open(redis_url)?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            increment_path: OnceCell::new(),
        })
    }

    /// Pin the increment path instead of probing the server version.
    pub fn with_increment_path(mut self, path: IncrementPath) -> Self {
        self.increment_path = OnceCell::new_with(Some(path));
        self
    }

    async fn connection(&self) -> Result<MultiplexedConnection, ThrottleError> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                debug!("Opening Redis connection");
                self.client.get_multiplexed_tokio_connection().await
            })
            .await?;

        Ok(conn.clone())
    }

    /// Increment path for this server, read from `INFO server` on first use.
    pub async fn increment_path(&self) -> Result<IncrementPath, ThrottleError> {
        let path = self
            .increment_path
            .get_or_try_init(|| async {
                let mut conn = self.connection().await?;
                let info: InfoDict = redis::cmd("INFO").arg("server").query_async(&mut conn).await?;

                let path = match info.get::<String>("redis_version") {
                    Some(version) => {
                        let path = IncrementPath::for_version(&version);
                        debug!(version = %version, path = ?path, "Selected increment path");
                        path
                    }
                    None => {
                        warn!("Redis did not report a version, using legacy increment path");
                        IncrementPath::Legacy
                    }
                };

                Ok::<_, ThrottleError>(path)
            })
            .await?;

        Ok(*path)
    }

    pub async fn ping(&self) -> Result<String, ThrottleError> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, period: u64) -> Result<Increment, ThrottleError> {
        let path = self.increment_path().await?;
        let mut conn = self.connection().await?;

        match path {
            IncrementPath::ConditionalExpiry => {
                let (count, _): (u64, i64) = redis::pipe()
                    .atomic()
                    .cmd("INCR")
                    .arg(key)
                    .cmd("EXPIRE")
                    .arg(key)
                    .arg(period)
                    .arg("NX")
                    .query_async(&mut conn)
                    .await?;

                Ok(Increment { count, ttl: None })
            }
            IncrementPath::Legacy => {
                let (count, ttl): (u64, i64) = redis::pipe()
                    .atomic()
                    .cmd("INCR")
                    .arg(key)
                    .cmd("TTL")
                    .arg(key)
                    .query_async(&mut conn)
                    .await?;

                if ttl < 0 {
                    let _: i64 = redis::cmd("EXPIRE")
                        .arg(key)
                        .arg(period)
                        .query_async(&mut conn)
                        .await?;
                }

                Ok(Increment { count, ttl: Some(ttl) })
            }
        }
    }

    async fn ttl(&self, key: &str) -> Result<f64, ThrottleError> {
        let mut conn = self.connection().await?;
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(millis as f64 / 1000.0)
    }
}
