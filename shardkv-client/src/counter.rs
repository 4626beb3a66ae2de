//! # Atomic Counter / ID Generator
//!
//! Purpose: Allocate identifiers shared by every process using the cluster,
//! backed by the node's atomic `INCR`.
//!
//! ## Overflow Guard
//!
//! When an allocated id lands within `ID_RESERVED_MARGIN` of `i64::MAX`, the
//! generator resets the counter to zero with `GETSET` in the same scoped call.
//! Increments issued by other processes between our `INCR` and the reset still
//! succeed and may return ids above the threshold; the margin is the room left
//! for them. The guard is best effort: ids are unique and increasing between
//! resets, and callers never see an overflow error, but monotonicity does not
//! hold across a reset.

use tracing::warn;

use crate::command::Command;
use crate::error::{CacheResult, ConnectionFault};
use crate::executor::ShardedPool;

/// Headroom below `i64::MAX` reserved for increments racing the reset.
pub const ID_RESERVED_MARGIN: i64 = 75_807;

/// Returns true when `id` is close enough to `i64::MAX` to trigger a reset.
pub fn needs_reset(id: i64) -> bool {
    id >= i64::MAX - ID_RESERVED_MARGIN
}

/// Overflow-guarded identifier allocator.
#[derive(Clone)]
pub struct IdGenerator {
    pool: ShardedPool,
}

impl IdGenerator {
    pub fn new(pool: ShardedPool) -> Self {
        IdGenerator { pool }
    }

    /// Plain atomic increment without the overflow guard.
    pub fn increment(&self, key: &str) -> CacheResult<i64> {
        self.pool
            .execute(key, |conn| conn.query(&Command::new("INCR").arg(key)))
    }

    /// Allocates the next id for `key`, resetting the counter near overflow.
    pub fn make_id(&self, key: &str) -> CacheResult<i64> {
        self.pool.execute(key, |conn| {
            let id: i64 = conn.query(&Command::new("INCR").arg(key))?;
            if needs_reset(id) {
                warn!(key = %key, id, "id counter near i64::MAX, resetting to zero");
                conn.query::<Option<String>>(&Command::new("GETSET").arg(key).arg("0"))?;
            }
            Ok::<_, ConnectionFault>(id)
        })
    }
}
