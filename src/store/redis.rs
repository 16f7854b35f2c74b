//! Redis-backed coordination store.
//!
//! Shares counters, revocations and cached responses between every gateway
//! instance pointing at the same Redis. Conditional operations run as Lua
//! scripts so each one is a single atomic step on the server.
//!
//! Connections go through `redis::aio::ConnectionManager`, which reconnects
//! on its own; errors surface as [`StoreError::Unavailable`] and the calling
//! component applies its fail-open / fail-closed policy.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};

use crate::store::{BoundedIncrement, CoordinationStore, StoreError, StoreResult};

const CAS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if cur ~= ARGV[2] then return 0 end
else
  if cur then return 0 end
end
redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
return 1
"#;

const BOUNDED_INCR_SCRIPT: &str = r#"
local cur = tonumber(redis.call('GET', KEYS[1]) or '0')
local ceiling = tonumber(ARGV[1])
if cur >= ceiling then return {0, cur} end
local n = redis.call('INCR', KEYS[1])
if n == 1 then redis.call('PEXPIRE', KEYS[1], ARGV[2]) end
return {1, n}
"#;

/// Configuration for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix prepended to every key (default: "admission:")
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "admission:".to_string(),
        }
    }
}

pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    cas: Script,
    bounded_incr: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect with the default key prefix.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the first connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    pub async fn connect_with_config(url: &str, config: RedisStoreConfig) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            config,
            cas: Script::new(CAS_SCRIPT),
            bounded_incr: Script::new(BOUNDED_INCR_SCRIPT),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

fn map_err(err: RedisError) -> StoreError {
    tracing::warn!(error = %err, "Redis operation failed");
    StoreError::Unavailable(format!("{:?}", err.kind()))
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        conn.get(self.key(key)).await.map_err(map_err)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        conn.pset_ex::<_, _, ()>(self.key(key), value, ttl_millis(ttl))
            .await
            .map_err(map_err)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.key(key)).await.map_err(map_err)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.connection.clone();
        let (present, expected) = match expected {
            Some(bytes) => ("1", bytes.to_vec()),
            None => ("0", Vec::new()),
        };

        let swapped: i64 = self
            .cas
            .key(self.key(key))
            .arg(present)
            .arg(expected)
            .arg(new)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(swapped == 1)
    }

    async fn increment_bounded(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> StoreResult<BoundedIncrement> {
        let mut conn = self.connection.clone();
        let (incremented, value): (i64, u64) = self
            .bounded_incr
            .key(self.key(key))
            .arg(ceiling)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;

        Ok(if incremented == 1 {
            BoundedIncrement::Incremented(value)
        } else {
            BoundedIncrement::AtCeiling(value)
        })
    }
}
