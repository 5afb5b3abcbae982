use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use redis::{aio::MultiplexedConnection, AsyncCommands};
use thiserror::Error;
use tokio::time;
use tracing::debug;

use super::DailyStats;

/// Outcome of a cache read. Only `Hit` short-circuits the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(DailyStats),
    Miss,
    Malformed(String),
    Unreachable(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("stats cache timed out after {0:?}")]
    Timeout(Duration),
    #[error("stats cache error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Key-value store holding precomputed daily snapshots.
#[async_trait]
pub trait StatsCache: Send + Sync {
    async fn read(&self, key: &str) -> CacheLookup;

    async fn write(&self, key: &str, stats: &DailyStats, ttl: Duration) -> Result<(), CacheError>;
}

pub fn daily_key(day: NaiveDate) -> String {
    format!("dashboard:daily:{day}")
}

/// Redis-backed [`StatsCache`]. Snapshots live in one hash per day.
///
/// The multiplexed connection is opened on first use and dropped after any
/// connection-level failure, so a cache that comes back is picked up again
/// without a restart. Every round trip, connecting included, is bounded by
/// `timeout`. The slot lock is only held to copy or replace the handle, never
/// across an await.
pub struct RedisStatsCache {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    timeout: Duration,
}

impl RedisStatsCache {
    /// Only validates the URL; no connection is made until the first call.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            conn: Mutex::new(None),
            timeout,
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        if let Some(conn) = self.cached() {
            return Ok(conn);
        }

        debug!("Opening stats cache connection");
        let conn = self.client.get_multiplexed_async_connection().await?;
        *self.slot() = Some(conn.clone());
        Ok(conn)
    }

    fn cached(&self) -> Option<MultiplexedConnection> {
        self.slot().clone()
    }

    fn slot(&self) -> MutexGuard<'_, Option<MultiplexedConnection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset(&self) {
        *self.slot() = None;
    }

    /// Run `op` under the timeout; drop the cached connection if it failed
    /// for any reason other than the data it returned.
    async fn bounded<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: std::future::Future<Output = Result<T, CacheError>>,
    {
        let result = match time::timeout(self.timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        };
        if let Err(e) = &result {
            if !is_type_mismatch(e) {
                self.reset();
            }
        }
        result
    }
}

/// The key exists but does not hold what we stored there.
fn is_type_mismatch(err: &CacheError) -> bool {
    match err {
        CacheError::Redis(e) => e.kind() == redis::ErrorKind::TypeError || e.code() == Some("WRONGTYPE"),
        CacheError::Timeout(_) => false,
    }
}

#[async_trait]
impl StatsCache for RedisStatsCache {
    async fn read(&self, key: &str) -> CacheLookup {
        let result = self
            .bounded(async {
                let mut conn = self.connection().await?;
                let fields: HashMap<String, String> = conn.hgetall(key).await?;
                Ok::<_, CacheError>(fields)
            })
            .await;

        match result {
            Ok(fields) if fields.is_empty() => CacheLookup::Miss,
            Ok(fields) => match DailyStats::from_cache_fields(&fields) {
                Ok(stats) => CacheLookup::Hit(stats),
                Err(reason) => CacheLookup::Malformed(reason),
            },
            Err(e) if is_type_mismatch(&e) => CacheLookup::Malformed(e.to_string()),
            Err(e) => CacheLookup::Unreachable(e.to_string()),
        }
    }

    async fn write(&self, key: &str, stats: &DailyStats, ttl: Duration) -> Result<(), CacheError> {
        let fields = stats.to_cache_fields();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);

        self.bounded(async {
            let mut conn = self.connection().await?;
            let _: () = redis::pipe()
                .atomic()
                .del(key)
                .ignore()
                .hset_multiple(key, fields.as_slice())
                .ignore()
                .expire(key, ttl_secs)
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok::<_, CacheError>(())
        })
        .await
    }
}
