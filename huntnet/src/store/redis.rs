//! Redis fleet store backed by a deadpool connection pool.

use std::future::Future;
use std::time::Duration;

use deadpool_redis::{Config, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use tokio::runtime::Handle;

use super::{FleetStore, Record, Result, StoreError};

/// Sync wrapper over an async Redis pool.
///
/// Calls block on the runtime the store was created in, so they must run on a
/// blocking-pool thread (`spawn_blocking`), never directly on a worker.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    handle: Handle,
    timeout: Duration,
}

impl RedisStore {
    /// Build a pool for `url`. Must be called from inside a tokio runtime.
    pub fn connect(url: &str, pool_max: usize, timeout: Duration) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let mut cfg = Config::from_url(url);
        cfg.pool = Some(PoolConfig::new(pool_max));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            pool,
            handle,
            timeout,
        })
    }

    fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.timeout;
        self.handle.block_on(async move {
            tokio::time::timeout(timeout, op)
                .await
                .map_err(|_| StoreError::Timeout(timeout))?
        })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn backend(e: redis::RedisError) -> StoreError {
    if e.is_connection_refusal() || e.is_io_error() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Backend(e.to_string())
    }
}

impl FleetStore for RedisStore {
    fn put(&self, key: &str, record: Record, ttl: Duration) -> Result<()> {
        self.run(async {
            let mut conn = self.conn().await?;
            let fields: Vec<(String, String)> = record.into_iter().collect();

            let mut pipe = redis::pipe();
            pipe.atomic().del(key);
            if !fields.is_empty() {
                pipe.hset_multiple(key, &fields);
            }
            pipe.pexpire(key, ttl.as_millis() as i64);
            pipe.query_async::<()>(&mut conn).await.map_err(backend)
        })
    }

    fn get(&self, key: &str) -> Result<Option<Record>> {
        self.run(async {
            let mut conn = self.conn().await?;
            let record: Record = conn.hgetall(key).await.map_err(backend)?;
            Ok((!record.is_empty()).then_some(record))
        })
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.run(async {
            let mut conn = self.conn().await?;
            let removed: i64 = conn.del(key).await.map_err(backend)?;
            Ok(removed > 0)
        })
    }

    fn take(&self, key: &str) -> Result<Option<Record>> {
        self.run(async {
            let mut conn = self.conn().await?;
            let (record, _): (Record, i64) = redis::pipe()
                .atomic()
                .hgetall(key)
                .del(key)
                .query_async(&mut conn)
                .await
                .map_err(backend)?;
            Ok((!record.is_empty()).then_some(record))
        })
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Record)>> {
        self.run(async {
            let mut conn = self.conn().await?;
            // The fleet keyspace is small; KEYS keeps this to one round trip.
            let mut keys: Vec<String> = conn.keys(format!("{prefix}*")).await.map_err(backend)?;
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            keys.sort();

            let mut pipe = redis::pipe();
            for key in &keys {
                pipe.hgetall(key);
            }
            let records: Vec<Record> = pipe.query_async(&mut conn).await.map_err(backend)?;

            Ok(keys
                .into_iter()
                .zip(records)
                .filter(|(_, record)| !record.is_empty())
                .collect())
        })
    }

    fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.run(async {
            let mut conn = self.conn().await?;
            let _: i64 = conn.publish(channel, message).await.map_err(backend)?;
            Ok(())
        })
    }
}
