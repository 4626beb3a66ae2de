//! # Distributed Lock
//!
//! Purpose: Cross-process mutual exclusion keyed by a lock name, used to make
//! multi-command mutations appear atomic to other writers.
//!
//! ## Design Principles
//! 1. **Conditional Write**: Acquire is `SET lock:{name} token NX PX ttl`; only one
//!    caller can create the key, and the TTL frees locks of crashed holders.
//! 2. **Conditional Delete**: Release deletes the key only while it still holds
//!    this holder's token (WATCH + GET + MULTI/DEL/EXEC), so a lock that expired
//!    and was reassigned is left alone.
//! 3. **Backoff with Jitter**: Contended acquires sleep with exponential backoff
//!    plus jitter until the caller's deadline.
//! 4. **Best Effort**: Exclusion holds subject to expiry and clock behaviour on the
//!    node; this is not a consensus lock.
//!
//! ## State Machine
//!
//! ```text
//! Unlocked --acquire--> Locked --release | expiry--> Unlocked
//! ```

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::command::Command;
use crate::config::LockConfig;
use crate::error::{CacheError, CacheResult, ConnectionFault};
use crate::executor::ShardedPool;
use crate::pipeline::{Slot, Transaction};
use crate::pool::PooledConnection;

/// Prefix that keeps lock keys apart from data keys.
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Handle for acquiring one named lock.
#[derive(Clone)]
pub struct DistributedLock {
    pool: ShardedPool,
    name: String,
    key: String,
    config: LockConfig,
}

impl DistributedLock {
    pub fn new(pool: ShardedPool, name: impl Into<String>, config: LockConfig) -> Self {
        let name = name.into();
        DistributedLock {
            key: format!("{}{}", LOCK_KEY_PREFIX, name),
            pool,
            name,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cache key backing this lock.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Acquires with the configured default timeout.
    pub fn acquire(&self) -> CacheResult<LockGuard> {
        self.acquire_timeout(Duration::from_millis(self.config.acquire_timeout_ms))
    }

    /// Retries with backoff until acquired or `timeout` elapses.
    pub fn acquire_timeout(&self, timeout: Duration) -> CacheResult<LockGuard> {
        // An unrepresentable deadline means wait forever.
        let deadline = Instant::now().checked_add(timeout);
        let mut backoff_ms = self.config.initial_backoff_ms.max(1);

        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(guard);
            }

            let now = Instant::now();
            let remaining = match deadline {
                Some(deadline) if now >= deadline => {
                    return Err(CacheError::LockTimeout {
                        name: self.name.clone(),
                        waited: timeout,
                    });
                }
                Some(deadline) => deadline - now,
                None => Duration::MAX,
            };

            let jitter = rand::thread_rng().gen_range(0..=backoff_ms / 2);
            let sleep = Duration::from_millis(backoff_ms.saturating_add(jitter)).min(remaining);
            debug!(lock = %self.name, backoff_ms = sleep.as_millis() as u64, "lock held, backing off");
            thread::sleep(sleep);

            backoff_ms = next_backoff(backoff_ms, self.config.max_backoff_ms);
        }
    }

    /// Makes one attempt; `None` when another holder has the lock.
    pub fn try_acquire(&self) -> CacheResult<Option<LockGuard>> {
        let token = new_token();
        let command = Command::new("SET")
            .arg(&self.key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.config.ttl_ms.max(1).to_string());
        let acquired: bool = self.pool.execute(&self.key, |conn| conn.query(&command))?;
        if !acquired {
            return Ok(None);
        }

        debug!(lock = %self.name, ttl_ms = self.config.ttl_ms, "lock acquired");
        Ok(Some(LockGuard {
            pool: self.pool.clone(),
            name: self.name.clone(),
            key: self.key.clone(),
            token,
            released: false,
        }))
    }
}

/// A held lock. Release explicitly; dropping it releases on a best-effort basis.
pub struct LockGuard {
    pool: ShardedPool,
    name: String,
    key: String,
    token: String,
    released: bool,
}

// Never print the token.
impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("held", &!self.released)
            .finish()
    }
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique value this holder wrote into the lock key.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_held(&self) -> bool {
        !self.released
    }

    /// Releases the lock.
    ///
    /// Returns `false` when the key no longer carried this holder's token, i.e.
    /// the lock expired (and may now belong to someone else).
    pub fn release(mut self) -> CacheResult<bool> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> CacheResult<bool> {
        self.released = true;
        let key = self.key.as_str();
        let token = self.token.as_str();

        let deleted = self.pool.execute(key, |conn| -> CacheResult<bool> {
            let result = delete_if_owner(conn, key, token);
            if result.is_err() {
                // The connection may still be WATCHing the key; never reuse it.
                conn.discard();
            }
            result
        })?;

        if deleted {
            debug!(lock = %self.name, "lock released");
        } else {
            warn!(lock = %self.name, "lock expired before release");
        }
        Ok(deleted)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.release_inner() {
            warn!(lock = %self.name, error = %err, "failed to release lock on drop");
        }
    }
}

/// Doubles the backoff without overflowing, capped at `max_ms`.
fn next_backoff(current_ms: u64, max_ms: u64) -> u64 {
    current_ms.saturating_mul(2).min(max_ms.max(1))
}

/// WATCH, compare the token, then DEL inside MULTI/EXEC.
fn delete_if_owner(conn: &mut PooledConnection, key: &str, token: &str) -> CacheResult<bool> {
    let shard = conn.shard().to_string();
    let tag = |fault: ConnectionFault| CacheError::connection(&shard, fault);

    conn.query::<()>(&Command::new("WATCH").arg(key)).map_err(&tag)?;
    let current: Option<String> = conn.query(&Command::new("GET").arg(key)).map_err(&tag)?;
    if current.as_deref() != Some(token) {
        conn.query::<()>(&Command::new("UNWATCH")).map_err(&tag)?;
        return Ok(false);
    }

    let mut tx = Transaction::new();
    let removed: Slot<i64> = tx.add(Command::new("DEL").arg(key));
    match tx.execute(conn) {
        Ok(mut replies) => Ok(replies.take(removed).map_err(&tag)? == 1),
        // The key changed between GET and EXEC: expiry or a new holder.
        Err(CacheError::TransactionAborted { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}

fn new_token() -> String {
    format!("{:032x}", rand::thread_rng().gen::<u128>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, ShardEndpoint};

    #[test]
    fn debug_output_hides_token() {
        let config = ClientConfig::with_shards(vec![ShardEndpoint::new("127.0.0.1", 6379, "a")]);
        let guard = LockGuard {
            pool: ShardedPool::new(&config).unwrap(),
            name: "jobs".to_string(),
            key: "lock:jobs".to_string(),
            token: "feedface".to_string(),
            released: true,
        };
        let rendered = format!("{:?}", guard);
        assert!(rendered.contains("lock:jobs"));
        assert!(!rendered.contains("feedface"));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        assert_eq!(next_backoff(2, 20), 4);
        assert_eq!(next_backoff(16, 20), 20);
        assert_eq!(next_backoff(5, 0), 1);
        assert_eq!(next_backoff(u64::MAX / 2 + 1, u64::MAX), u64::MAX);
        assert_eq!(next_backoff(u64::MAX, u64::MAX), u64::MAX);
    }

    #[test]
    fn tokens_are_unique_hex() {
        let a = new_token();
        let b = new_token();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
