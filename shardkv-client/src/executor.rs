//! # Scoped Executor
//!
//! Purpose: Run one unit of work against the right shard with a borrowed
//! connection, and guarantee that the connection goes back on every exit path.
//!
//! ## Design Principles
//! 1. **Single Primitive**: Every client operation goes through `execute`/
//!    `execute_on`; nothing touches a pool directly.
//! 2. **Scope = Borrow**: The work closure gets `&mut PooledConnection` and cannot
//!    keep it; the guard is dropped when the closure returns or unwinds.
//! 3. **Uniform Errors**: Faults from acquisition or the work itself come back as
//!    `CacheError`, tagged with the shard label.

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::error::{CacheError, CacheResult, ConnectionFault};
use crate::pool::{PooledConnection, ShardPool};
use crate::router::{ShardId, ShardRouter};

/// Errors a unit of work may return; the executor tags them with the shard.
pub trait WorkError {
    fn into_cache_error(self, shard: &str) -> CacheError;
}

impl WorkError for ConnectionFault {
    fn into_cache_error(self, shard: &str) -> CacheError {
        CacheError::connection(shard, self)
    }
}

impl WorkError for CacheError {
    fn into_cache_error(self, _shard: &str) -> CacheError {
        self
    }
}

struct ShardedPoolInner {
    router: ShardRouter,
    pools: Vec<ShardPool>,
}

/// One pool per shard plus the router that picks between them.
#[derive(Clone)]
pub struct ShardedPool {
    inner: Arc<ShardedPoolInner>,
}

impl ShardedPool {
    /// Validates the configuration and builds one lazy pool per shard.
    pub fn new(config: &ClientConfig) -> CacheResult<Self> {
        config.validate()?;
        let router = ShardRouter::new(config.shards.clone())?;
        let pools = config
            .shards
            .iter()
            .map(|endpoint| ShardPool::new(endpoint.clone(), config.pool.clone()))
            .collect();
        Ok(ShardedPool {
            inner: Arc::new(ShardedPoolInner { router, pools }),
        })
    }

    pub fn router(&self) -> &ShardRouter {
        &self.inner.router
    }

    pub fn pool(&self, shard: ShardId) -> &ShardPool {
        &self.inner.pools[shard]
    }

    pub fn shard_count(&self) -> usize {
        self.inner.pools.len()
    }

    /// Checks out a connection to the shard that owns `key` for long-lived use.
    ///
    /// Unlike [`execute`](Self::execute) the caller holds the connection until
    /// it drops the guard, so the pool slot stays occupied for that long.
    pub fn checkout(&self, key: &str) -> CacheResult<PooledConnection> {
        let shard = self.inner.router.route(key);
        self.inner.pools[shard].acquire()
    }

    /// Runs `work` on a connection to the shard that owns `key`.
    pub fn execute<T, E, F>(&self, key: &str, work: F) -> CacheResult<T>
    where
        E: WorkError,
        F: FnOnce(&mut PooledConnection) -> Result<T, E>,
    {
        self.execute_on(self.inner.router.route(key), work)
    }

    /// Runs `work` on a connection to a specific shard.
    ///
    /// **Logic**:
    /// 1. Acquire from the shard's pool (may block up to `max_wait`).
    /// 2. Run the work.
    /// 3. Drop the guard, returning or discarding the connection.
    pub fn execute_on<T, E, F>(&self, shard: ShardId, work: F) -> CacheResult<T>
    where
        E: WorkError,
        F: FnOnce(&mut PooledConnection) -> Result<T, E>,
    {
        let pool = &self.inner.pools[shard];
        let mut conn = pool.acquire()?;
        let result = work(&mut conn);
        drop(conn);
        result.map_err(|err| err.into_cache_error(pool.label()))
    }

    /// Runs `work` once per shard, in table order, stopping at the first error.
    pub fn execute_all<T, E, F>(&self, mut work: F) -> CacheResult<Vec<T>>
    where
        E: WorkError,
        F: FnMut(&mut PooledConnection) -> Result<T, E>,
    {
        (0..self.inner.pools.len())
            .map(|shard| self.execute_on(shard, &mut work))
            .collect()
    }
}
