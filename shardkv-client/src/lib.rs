//! # shardkv Sync Client
//!
//! Purpose: Spread keys over several Redis-compatible cache nodes and run
//! single, batched, transactional, and lock-protected operations against them
//! with bounded per-shard connection pools.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: One bounded pool per shard; connections are
//!    borrowed for exactly one unit of work.
//! 2. **Consistent Hashing**: A weighted ketama ring keeps key placement stable
//!    for the lifetime of the shard table.
//! 3. **Scoped Execution**: Every operation runs inside `ShardedPool::execute`,
//!    which guarantees release on every exit path.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod client;
mod command;
mod config;
mod counter;
mod error;
mod executor;
mod lock;
mod pipeline;
mod pool;
mod pubsub;
mod resp;
mod router;

pub use client::{KeyTtl, ShardedClient};
pub use command::{Command, FromReply};
pub use config::{ClientConfig, LockConfig, PoolConfig, ShardEndpoint};
pub use counter::{needs_reset, IdGenerator, ID_RESERVED_MARGIN};
pub use error::{CacheError, CacheResult, ConnectionFault, FaultResult};
pub use executor::{ShardedPool, WorkError};
pub use lock::{DistributedLock, LockGuard, LOCK_KEY_PREFIX};
pub use pipeline::{BatchEntry, Pipeline, PipelineReplies, Slot, Transaction};
pub use pool::{PoolStats, PooledConnection, ShardPool};
pub use pubsub::{Message, Subscription};
pub use resp::RespValue;
pub use router::{hash_tag, murmur_hash64a, ShardGroup, ShardId, ShardRouter};
