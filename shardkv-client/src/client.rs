//! # Sharded Client API
//!
//! Purpose: Expose a blocking, typed command surface over a sharded set of
//! cache nodes.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `ShardedClient` hides routing, pooling, and protocol
//!    details; every call goes through the scoped executor.
//! 2. **Same-Shard Composites**: "with_ttl" variants pipeline the operation with
//!    a `PEXPIRE` on the key's shard in one round trip.
//! 3. **Ordered Batches**: Multi-key batches fan out per shard and come back in
//!    the caller's order, one `BatchEntry` per input.
//! 4. **Explicit Atomicity**: Composite list rewrites run either under the
//!    distributed lock or inside a MULTI/EXEC transaction.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::command::{Command, FromReply};
use crate::config::{ClientConfig, LockConfig, ShardEndpoint};
use crate::counter::IdGenerator;
use crate::error::{CacheError, CacheResult, ConnectionFault, FaultResult};
use crate::executor::{ShardedPool, WorkError};
use crate::lock::DistributedLock;
use crate::pipeline::{BatchEntry, Pipeline, PipelineReplies, Transaction};
use crate::pool::PooledConnection;
use crate::pubsub::Subscription;
use crate::resp::RespValue;

/// TTL state returned by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

impl FromReply for KeyTtl {
    fn from_reply(value: RespValue) -> FaultResult<Self> {
        match i64::from_reply(value)? {
            -2 => Ok(KeyTtl::Missing),
            -1 => Ok(KeyTtl::NoExpiry),
            secs if secs >= 0 => Ok(KeyTtl::ExpiresIn(Duration::from_secs(secs as u64))),
            _ => Err(ConnectionFault::UnexpectedResponse("TTL of -2, -1 or >= 0")),
        }
    }
}

/// Milliseconds for PEXPIRE and `SET .. PX`. Never zero, which would delete
/// the key instead of expiring it.
fn ttl_millis(ttl: Duration) -> String {
    let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    millis.max(1).to_string()
}

fn expire_command(key: &str, ttl: Duration) -> Command {
    Command::new("PEXPIRE").arg(key).arg(ttl_millis(ttl))
}

/// Fields and values flattened in map order, for HMSET.
fn field_args(fields: &HashMap<String, String>) -> impl Iterator<Item = &String> {
    fields.iter().flat_map(|(field, value)| [field, value])
}

/// Blocking client over a static set of shards.
///
/// Cloning is cheap; clones share the same pools.
#[derive(Clone)]
pub struct ShardedClient {
    pool: ShardedPool,
    lock_config: LockConfig,
    ids: IdGenerator,
}

impl ShardedClient {
    /// Validates the configuration and builds one lazy pool per shard.
    pub fn new(config: ClientConfig) -> CacheResult<Self> {
        let pool = ShardedPool::new(&config)?;
        debug!(shards = pool.shard_count(), "sharded client ready");
        Ok(ShardedClient {
            ids: IdGenerator::new(pool.clone()),
            lock_config: config.lock,
            pool,
        })
    }

    /// Loads a JSON configuration file and builds the client.
    pub fn from_path(path: impl AsRef<Path>) -> CacheResult<Self> {
        Self::new(ClientConfig::from_path(path)?)
    }

    /// The pools and router behind this client.
    pub fn sharded_pool(&self) -> &ShardedPool {
        &self.pool
    }

    /// Endpoint that owns `key`.
    pub fn shard_for(&self, key: &str) -> &ShardEndpoint {
        self.pool.router().endpoint_for(key)
    }

    /// Runs arbitrary work on the connection that owns `key`.
    pub fn execute<T, E, F>(&self, key: &str, work: F) -> CacheResult<T>
    where
        E: WorkError,
        F: FnOnce(&mut PooledConnection) -> Result<T, E>,
    {
        self.pool.execute(key, work)
    }

    fn query<T: FromReply>(&self, key: &str, command: Command) -> CacheResult<T> {
        self.pool.execute(key, |conn| conn.query(&command))
    }

    /// Runs `command` and refreshes the key's TTL in the same round trip.
    fn query_with_expire<T: FromReply>(
        &self,
        key: &str,
        command: Command,
        ttl: Duration,
    ) -> CacheResult<T> {
        self.pool.execute(key, |conn| {
            let mut pipeline = Pipeline::new();
            let result = pipeline.add::<T>(command);
            let expired = pipeline.add::<bool>(expire_command(key, ttl));
            let mut replies = pipeline.execute(conn)?;
            replies.take(expired)?;
            replies.take(result)
        })
    }

    // ---- keys ----

    /// Deletes one key; returns whether it existed.
    pub fn delete_key(&self, key: &str) -> CacheResult<bool> {
        self.query::<i64>(key, Command::new("DEL").arg(key))
            .map(|removed| removed > 0)
    }

    /// Deletes keys across shards, one DEL per shard; returns how many existed.
    pub fn delete_keys<K: AsRef<str>>(&self, keys: &[K]) -> CacheResult<i64> {
        let mut removed = 0;
        for group in self.pool.router().group_by_shard(keys) {
            let command = Command::new("DEL").args(group.indices.iter().map(|&idx| keys[idx].as_ref()));
            removed += self
                .pool
                .execute_on(group.shard, |conn| conn.query::<i64>(&command))?;
        }
        Ok(removed)
    }

    /// Deletes every key starting with `prefix` on every shard.
    ///
    /// Uses `KEYS`, which scans the whole keyspace of each node.
    pub fn delete_keys_like(&self, prefix: &str) -> CacheResult<i64> {
        let pattern = format!("{}*", prefix);
        let counts = self.pool.execute_all(|conn| {
            let keys: Vec<String> = conn.query(&Command::new("KEYS").arg(&pattern))?;
            if keys.is_empty() {
                return Ok::<_, ConnectionFault>(0);
            }
            conn.query::<i64>(&Command::new("DEL").args(&keys))
        })?;
        Ok(counts.into_iter().sum())
    }

    pub fn exists(&self, key: &str) -> CacheResult<bool> {
        self.query(key, Command::new("EXISTS").arg(key))
    }

    /// Sets a TTL on an existing key; `false` when the key is missing.
    pub fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.query(key, expire_command(key, ttl))
    }

    pub fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        self.query(key, Command::new("TTL").arg(key))
    }

    // ---- strings ----

    pub fn set_string(&self, key: &str, value: &str) -> CacheResult<()> {
        self.query(key, Command::new("SET").arg(key).arg(value))
    }

    /// Sets a value that expires after `ttl` (millisecond precision).
    pub fn set_string_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.query(
            key,
            Command::new("SET").arg(key).arg(value).arg("PX").arg(ttl_millis(ttl)),
        )
    }

    /// Sets the value only when the key is absent; returns whether it was set.
    pub fn set_string_if_absent(&self, key: &str, value: &str) -> CacheResult<bool> {
        self.query(key, Command::new("SETNX").arg(key).arg(value))
    }

    /// Replaces the value and returns the previous one.
    pub fn get_set(&self, key: &str, value: &str) -> CacheResult<Option<String>> {
        self.query(key, Command::new("GETSET").arg(key).arg(value))
    }

    /// Raw atomic increment, without the overflow guard of `make_id`.
    pub fn incr(&self, key: &str) -> CacheResult<i64> {
        self.ids.increment(key)
    }

    pub fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        self.query(key, Command::new("GET").arg(key))
    }

    pub fn batch_set_strings<K, V>(&self, entries: &[(K, V)]) -> Vec<BatchEntry<()>>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let keys: Vec<&str> = entries.iter().map(|(key, _)| key.as_ref()).collect();
        self.pool.pipeline_by_key(&keys, |idx| {
            let (key, value) = &entries[idx];
            Command::new("SET").arg(key.as_ref()).arg(value.as_ref())
        })
    }

    pub fn batch_get_strings<K: AsRef<str>>(
        &self,
        keys: &[K],
    ) -> Vec<BatchEntry<Option<String>>> {
        self.pool
            .pipeline_by_key(keys, |idx| Command::new("GET").arg(keys[idx].as_ref()))
    }

    // ---- hashes ----

    /// Sets one field; returns true when the field is new.
    pub fn hash_set(&self, key: &str, field: &str, value: &str) -> CacheResult<bool> {
        self.query(key, Command::new("HSET").arg(key).arg(field).arg(value))
    }

    pub fn hash_set_with_ttl(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> CacheResult<bool> {
        self.query_with_expire(
            key,
            Command::new("HSET").arg(key).arg(field).arg(value),
            ttl,
        )
    }

    pub fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        self.query(key, Command::new("HGET").arg(key).arg(field))
    }

    /// Reads one field and refreshes the key's TTL.
    pub fn hash_get_with_ttl(
        &self,
        key: &str,
        field: &str,
        ttl: Duration,
    ) -> CacheResult<Option<String>> {
        self.query_with_expire(key, Command::new("HGET").arg(key).arg(field), ttl)
    }

    /// Sets several fields at once. An empty map is a no-op.
    pub fn hash_multiple_set(&self, key: &str, fields: &HashMap<String, String>) -> CacheResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        self.query(key, Command::new("HMSET").arg(key).args(field_args(fields)))
    }

    pub fn hash_multiple_set_with_ttl(
        &self,
        key: &str,
        fields: &HashMap<String, String>,
        ttl: Duration,
    ) -> CacheResult<()> {
        if fields.is_empty() {
            return self.expire(key, ttl).map(|_| ());
        }
        self.query_with_expire(
            key,
            Command::new("HMSET").arg(key).args(field_args(fields)),
            ttl,
        )
    }

    /// Values for `fields`, in order; missing fields are `None`.
    pub fn hash_multiple_get<F: AsRef<str>>(
        &self,
        key: &str,
        fields: &[F],
    ) -> CacheResult<Vec<Option<String>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        self.query(
            key,
            Command::new("HMGET").arg(key).args(fields.iter().map(AsRef::as_ref)),
        )
    }

    pub fn hash_multiple_get_with_ttl<F: AsRef<str>>(
        &self,
        key: &str,
        fields: &[F],
        ttl: Duration,
    ) -> CacheResult<Vec<Option<String>>> {
        if fields.is_empty() {
            return self.expire(key, ttl).map(|_| Vec::new());
        }
        self.query_with_expire(
            key,
            Command::new("HMGET").arg(key).args(fields.iter().map(AsRef::as_ref)),
            ttl,
        )
    }

    pub fn hash_get_all(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        self.query(key, Command::new("HGETALL").arg(key))
    }

    pub fn hash_get_all_with_ttl(
        &self,
        key: &str,
        ttl: Duration,
    ) -> CacheResult<HashMap<String, String>> {
        self.query_with_expire(key, Command::new("HGETALL").arg(key), ttl)
    }

    /// Removes fields; returns how many existed.
    pub fn hash_delete_fields<F: AsRef<str>>(&self, key: &str, fields: &[F]) -> CacheResult<i64> {
        if fields.is_empty() {
            return Ok(0);
        }
        self.query(
            key,
            Command::new("HDEL").arg(key).args(fields.iter().map(AsRef::as_ref)),
        )
    }

    pub fn hash_len(&self, key: &str) -> CacheResult<i64> {
        self.query(key, Command::new("HLEN").arg(key))
    }

    /// HMSET for many keys. Entries with no fields are skipped and reported Ok.
    pub fn batch_hash_multiple_set<K: AsRef<str>>(
        &self,
        entries: &[(K, HashMap<String, String>)],
    ) -> Vec<BatchEntry<()>> {
        let keys: Vec<&str> = entries.iter().map(|(key, _)| key.as_ref()).collect();
        self.pool.pipeline_by_key(&keys, |idx| {
            let (key, fields) = &entries[idx];
            if fields.is_empty() {
                Command::new("PING")
            } else {
                Command::new("HMSET").arg(key.as_ref()).args(field_args(fields))
            }
        })
    }

    /// HMGET for many keys, each with its own field list.
    pub fn batch_hash_multiple_get<K, F>(
        &self,
        entries: &[(K, Vec<F>)],
    ) -> Vec<BatchEntry<Vec<Option<String>>>>
    where
        K: AsRef<str>,
        F: AsRef<str>,
    {
        let keys: Vec<&str> = entries.iter().map(|(key, _)| key.as_ref()).collect();
        let results = self.pool.pipeline_by_key::<_, RespValue, _>(&keys, |idx| {
            let (key, fields) = &entries[idx];
            if fields.is_empty() {
                Command::new("PING")
            } else {
                Command::new("HMGET")
                    .arg(key.as_ref())
                    .args(fields.iter().map(AsRef::as_ref))
            }
        });
        results
            .into_iter()
            .zip(entries)
            .map(|(entry, (key, fields))| -> BatchEntry<Vec<Option<String>>> {
                let reply = entry?;
                if fields.is_empty() {
                    return Ok(Vec::new());
                }
                Vec::<Option<String>>::from_reply(reply)
                    .map_err(|fault| CacheError::connection(&self.shard_for(key.as_ref()).label(), fault))
            })
            .collect()
    }

    pub fn batch_hash_get_all<K: AsRef<str>>(
        &self,
        keys: &[K],
    ) -> Vec<BatchEntry<HashMap<String, String>>> {
        self.pool
            .pipeline_by_key(keys, |idx| Command::new("HGETALL").arg(keys[idx].as_ref()))
    }

    /// HGETALL for many keys, keyed by cache key. Failed keys are absent.
    pub fn batch_hash_get_all_for_map<K: AsRef<str>>(
        &self,
        keys: &[K],
    ) -> HashMap<String, HashMap<String, String>> {
        let results = self.batch_hash_get_all(keys);
        keys.iter()
            .zip(results)
            .filter_map(|(key, entry)| entry.ok().map(|fields| (key.as_ref().to_string(), fields)))
            .collect()
    }

    // ---- lists ----

    /// Appends values to the tail; returns the new length.
    pub fn list_push_end<V: AsRef<str>>(&self, key: &str, values: &[V]) -> CacheResult<i64> {
        if values.is_empty() {
            return self.list_len(key);
        }
        self.query(
            key,
            Command::new("RPUSH").arg(key).args(values.iter().map(AsRef::as_ref)),
        )
    }

    /// Prepends one value; returns the new length.
    pub fn list_push_head(&self, key: &str, value: &str) -> CacheResult<i64> {
        self.query(key, Command::new("LPUSH").arg(key).arg(value))
    }

    pub fn list_pop_end(&self, key: &str) -> CacheResult<Option<String>> {
        self.query(key, Command::new("RPOP").arg(key))
    }

    pub fn list_pop_head(&self, key: &str) -> CacheResult<Option<String>> {
        self.query(key, Command::new("LPOP").arg(key))
    }

    /// Prepends `value` and keeps only the newest `size` entries.
    ///
    /// Returns the list length reported by `LPUSH`, before trimming.
    pub fn list_push_head_and_trim(&self, key: &str, value: &str, size: usize) -> CacheResult<i64> {
        let keep = i64::try_from(size).unwrap_or(i64::MAX) - 1;
        self.pool.execute(key, |conn| {
            let mut pipeline = Pipeline::new();
            let pushed = pipeline.add::<i64>(Command::new("LPUSH").arg(key).arg(value));
            let trimmed = pipeline.add::<()>(Command::new("LTRIM").arg(key).arg("0").int_arg(keep));
            let mut replies = pipeline.execute(conn)?;
            let length = replies.take(pushed)?;
            replies.take(trimmed)?;
            Ok::<_, ConnectionFault>(length)
        })
    }

    /// Appends values; with `del_old`, replaces the list under the key's lock.
    pub fn batch_list_push_tail<V: AsRef<str>>(
        &self,
        key: &str,
        values: &[V],
        del_old: bool,
    ) -> CacheResult<()> {
        if !del_old {
            return self.list_push_end(key, values).map(|_| ());
        }
        self.with_lock(key, || {
            self.pool.execute(key, |conn| {
                let mut pipeline = Pipeline::new();
                let deleted = pipeline.add::<i64>(Command::new("DEL").arg(key));
                let pushed = (!values.is_empty()).then(|| {
                    pipeline.add::<i64>(
                        Command::new("RPUSH").arg(key).args(values.iter().map(AsRef::as_ref)),
                    )
                });
                let mut replies = pipeline.execute(conn)?;
                replies.take(deleted)?;
                if let Some(pushed) = pushed {
                    replies.take(pushed)?;
                }
                Ok::<_, ConnectionFault>(())
            })
        })
    }

    /// Replaces the list atomically with MULTI/EXEC.
    pub fn update_list_in_transaction<V: AsRef<str>>(&self, key: &str, values: &[V]) -> CacheResult<()> {
        self.pool.execute(key, |conn| -> CacheResult<()> {
            let mut tx = Transaction::new();
            tx.add::<i64>(Command::new("DEL").arg(key));
            if !values.is_empty() {
                tx.add::<i64>(Command::new("RPUSH").arg(key).args(values.iter().map(AsRef::as_ref)));
            }
            tx.execute(conn).map(|_| ())
        })
    }

    /// Creates the list only when the key does not exist yet.
    ///
    /// Returns the new length, or 0 when the key already existed.
    pub fn insert_list_if_not_exists<V: AsRef<str>>(&self, key: &str, values: &[V]) -> CacheResult<i64> {
        if values.is_empty() {
            return Ok(0);
        }
        self.with_lock(key, || {
            self.pool.execute(key, |conn| {
                if conn.query::<bool>(&Command::new("EXISTS").arg(key))? {
                    return Ok::<_, ConnectionFault>(0);
                }
                conn.query(&Command::new("RPUSH").arg(key).args(values.iter().map(AsRef::as_ref)))
            })
        })
    }

    pub fn list_get_all(&self, key: &str) -> CacheResult<Vec<String>> {
        self.query(key, Command::new("LRANGE").arg(key).arg("0").arg("-1"))
    }

    /// Elements in `[begin, end)`; negative indexes count from the tail.
    pub fn list_range(&self, key: &str, begin: i64, end: i64) -> CacheResult<Vec<String>> {
        self.query(
            key,
            Command::new("LRANGE").arg(key).int_arg(begin).int_arg(end - 1),
        )
    }

    /// Whole lists for many keys. Failed keys are absent.
    pub fn batch_get_all_lists<K: AsRef<str>>(
        &self,
        keys: &[K],
    ) -> HashMap<String, Vec<String>> {
        let results = self.pool.pipeline_by_key::<_, Vec<String>, _>(keys, |idx| {
            Command::new("LRANGE").arg(keys[idx].as_ref()).arg("0").arg("-1")
        });
        keys.iter()
            .zip(results)
            .filter_map(|(key, entry)| entry.ok().map(|items| (key.as_ref().to_string(), items)))
            .collect()
    }

    /// Removes up to `count` occurrences of `value` (0 removes all).
    pub fn list_remove(&self, key: &str, count: i64, value: &str) -> CacheResult<i64> {
        self.query(key, Command::new("LREM").arg(key).int_arg(count).arg(value))
    }

    pub fn list_len(&self, key: &str) -> CacheResult<i64> {
        self.query(key, Command::new("LLEN").arg(key))
    }

    // ---- sets ----

    /// Adds members; returns how many were new.
    pub fn set_add<M: AsRef<str>>(&self, key: &str, members: &[M]) -> CacheResult<i64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.query(
            key,
            Command::new("SADD").arg(key).args(members.iter().map(AsRef::as_ref)),
        )
    }

    pub fn set_is_member(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.query(key, Command::new("SISMEMBER").arg(key).arg(member))
    }

    // ---- sorted sets ----

    /// Adds or rescores a member; returns true when it is new.
    pub fn sorted_set_add(&self, key: &str, score: f64, member: &str) -> CacheResult<bool> {
        self.query(
            key,
            Command::new("ZADD").arg(key).float_arg(score).arg(member),
        )
    }

    pub fn sorted_set_remove<M: AsRef<str>>(&self, key: &str, members: &[M]) -> CacheResult<i64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.query(
            key,
            Command::new("ZREM").arg(key).args(members.iter().map(AsRef::as_ref)),
        )
    }

    /// Removes members with `min <= score <= max`.
    pub fn sorted_set_remove_range_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<i64> {
        self.query(
            key,
            Command::new("ZREMRANGEBYSCORE").arg(key).float_arg(min).float_arg(max),
        )
    }

    /// Members with `min <= score <= max`, highest score first.
    pub fn sorted_set_rev_range_by_score(
        &self,
        key: &str,
        max: f64,
        min: f64,
    ) -> CacheResult<Vec<String>> {
        self.query(
            key,
            Command::new("ZREVRANGEBYSCORE").arg(key).float_arg(max).float_arg(min),
        )
    }

    // ---- pub/sub ----

    /// Publishes on the shard that owns `channel`; returns the receiver count.
    pub fn publish(&self, channel: &str, message: &str) -> CacheResult<i64> {
        self.query(channel, Command::new("PUBLISH").arg(channel).arg(message))
    }

    /// Opens a subscription. It holds one pooled connection until dropped.
    pub fn subscribe(&self, channel: &str) -> CacheResult<Subscription> {
        Subscription::open(&self.pool, channel)
    }

    // ---- coordination ----

    /// Handle for the named lock, using the configured timings.
    pub fn lock(&self, name: &str) -> DistributedLock {
        DistributedLock::new(self.pool.clone(), name, self.lock_config.clone())
    }

    /// Runs `work` while holding the named lock.
    ///
    /// **Logic**:
    /// 1. Acquire with the configured timeout (`LockTimeout` if it elapses).
    /// 2. Run the work.
    /// 3. Release; a lock that expired during the work is logged, not an error.
    pub fn with_lock<T, F>(&self, name: &str, work: F) -> CacheResult<T>
    where
        F: FnOnce() -> CacheResult<T>,
    {
        let guard = self.lock(name).acquire()?;
        let result = work();
        let released = guard.release();
        let value = result?;
        released?;
        Ok(value)
    }

    /// Allocates the next id for `key`, resetting the counter near overflow.
    pub fn make_id(&self, key: &str) -> CacheResult<i64> {
        self.ids.make_id(key)
    }

    // ---- generic batches ----

    /// Builds and runs a pipeline on the shard that owns `route_key`.
    ///
    /// `build` returns the slots it wants read back; they are handed back with
    /// the replies.
    pub fn pipelined<R, B>(&self, route_key: &str, build: B) -> CacheResult<(R, PipelineReplies)>
    where
        B: FnOnce(&mut Pipeline) -> R,
    {
        let mut pipeline = Pipeline::new();
        let slots = build(&mut pipeline);
        let replies = self.pool.execute(route_key, |conn| pipeline.execute(conn))?;
        Ok((slots, replies))
    }

    /// Builds and runs a MULTI/EXEC transaction on the shard that owns
    /// `route_key`. Keys touched by the transaction should hash to that shard;
    /// hash tags make that explicit.
    pub fn transaction<R, B>(&self, route_key: &str, build: B) -> CacheResult<(R, PipelineReplies)>
    where
        B: FnOnce(&mut Transaction) -> R,
    {
        let mut tx = Transaction::new();
        let slots = build(&mut tx);
        let replies = self.pool.execute(route_key, |conn| tx.execute(conn))?;
        Ok((slots, replies))
    }
}
