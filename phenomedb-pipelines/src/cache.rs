//! Key-value cache for task payloads.
//!
//! Task outputs and input data sets are too large for the `task_run` row, so
//! they live in the cache under `TaskOutput::<id>` and `TaskData::<id>`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use phenomedb_core::domain::task_run::TaskRun;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

/// Expiry applied when a caller does not give one
pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Stores `value`, expiring after `ttl` (or [`DEFAULT_TTL`])
    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Output of a task run, preferring the cached payload over the inline column
pub async fn task_output(cache: &dyn Cache, task_run: &TaskRun) -> Result<Option<Value>, CacheError> {
    let key = task_run.output_cache_key();
    if cache.exists(&key).await? {
        return cache.get(&key).await;
    }
    Ok(task_run.output.clone())
}

/// Input data set staged for a task run, if any
pub async fn task_data(cache: &dyn Cache, task_run: &TaskRun) -> Result<Option<Value>, CacheError> {
    cache.get(&task_run.data_cache_key()).await
}

// =============================================================================
// Redis
// =============================================================================

pub struct RedisCache {
    /// Redis connection manager (handles reconnection automatically)
    redis: ConnectionManager,
}

impl RedisCache {
    /// Connects to Redis
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis })
    }

    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.redis.clone();
        Ok(conn.exists::<_, bool>(key).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(CacheError::from)
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let serialized = serde_json::to_string(value)?;
        let seconds = ttl.unwrap_or(DEFAULT_TTL).as_secs().max(1);
        let mut conn = self.redis.clone();

        redis::cmd("SET")
            .arg(key)
            .arg(serialized)
            .arg("EX")
            .arg(seconds)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Process-local cache honouring expiry times
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Value, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = self.entries.lock().await;
        let expired = matches!(entries.get(key), Some((_, expires)) if *expires <= Instant::now());
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires = Instant::now() + ttl.unwrap_or(DEFAULT_TTL);
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.clone(), expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
