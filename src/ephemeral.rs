//! Ephemeral store: short-TTL keyed values on Redis.
//!
//! Holds exactly two kinds of state, both self-expiring: auth challenge
//! nonces and rate-limit counters. `get_and_delete` is a single GETDEL
//! command, so reading a challenge is what destroys it; two verifiers can
//! never both consume the same nonce.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

#[derive(Clone)]
pub struct Ephemeral {
    manager: ConnectionManager,
}

impl Ephemeral {
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    /// Store `value` under `key` for `ttl`.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), redis::RedisError> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    /// Atomically fetch and remove `key`. `None` when the key never existed
    /// or already expired.
    pub async fn get_and_delete(&self, key: &str) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("GETDEL").arg(key).query_async(&mut conn).await
    }

    /// Increment the counter at `key`, creating it with the window TTL on
    /// first touch. Returns the count within the current window.
    pub async fn incr_with_window(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<u64, redis::RedisError> {
        let mut conn = self.manager.clone();
        let count: u64 = conn.incr(key, 1u64).await?;
        if count == 1 {
            let _: () = conn.expire(key, window.as_secs() as i64).await?;
        }
        Ok(count)
    }
}
