//! # Batch / Pipeline Engine
//!
//! Purpose: Send many commands to one shard in a single round trip and hand
//! back typed results in submission order.
//!
//! ## Design Principles
//! 1. **Typed Slots**: `add::<T>` returns a `Slot<T>`; slot i is reply i, and it
//!    can only be read after the batch completes.
//! 2. **Ordered, Not Atomic**: A plain `Pipeline` keeps reply order but other
//!    clients may interleave; server errors are reported per slot.
//! 3. **All-or-Nothing Queueing**: A `Transaction` wraps the batch in MULTI/EXEC;
//!    a queue-time rejection of any command aborts the whole batch.
//! 4. **Fan-Out by Shard**: Multi-key batches are grouped by shard, pipelined per
//!    shard, and merged back into the caller's key order.

use std::iter;
use std::marker::PhantomData;

use tracing::{debug, warn};

use crate::command::{Command, FromReply};
use crate::error::{CacheError, CacheResult, ConnectionFault, FaultResult};
use crate::executor::ShardedPool;
use crate::pool::PooledConnection;
use crate::resp::RespValue;

/// Per-key outcome of a non-transactional batch.
pub type BatchEntry<T> = Result<T, CacheError>;

/// Typed handle to one result of a batch.
pub struct Slot<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Slot<T> {
    fn new(index: usize) -> Self {
        Slot {
            index,
            _marker: PhantomData,
        }
    }

    /// Position of the command in its batch.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

/// Replies of a completed batch, in submission order.
#[derive(Debug)]
pub struct PipelineReplies {
    replies: Vec<Option<RespValue>>,
}

impl PipelineReplies {
    fn new(replies: Vec<RespValue>) -> Self {
        PipelineReplies {
            replies: replies.into_iter().map(Some).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    /// Decodes the reply for `slot`; each slot can be taken once.
    pub fn take<T: FromReply>(&mut self, slot: Slot<T>) -> FaultResult<T> {
        let reply = self
            .replies
            .get_mut(slot.index)
            .and_then(Option::take)
            .ok_or(ConnectionFault::UnexpectedResponse("an untaken slot of this batch"))?;
        T::from_reply(reply)
    }

    /// Remaining raw replies; taken slots are skipped.
    pub fn into_raw(self) -> Vec<RespValue> {
        self.replies.into_iter().flatten().collect()
    }
}

/// Ordered, non-atomic command batch for one shard.
#[derive(Debug, Default, Clone)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a command and returns the slot its decoded reply will land in.
    pub fn add<T: FromReply>(&mut self, command: Command) -> Slot<T> {
        self.commands.push(command);
        Slot::new(self.commands.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sends every command in one write and reads the replies in order.
    pub fn execute(&self, conn: &mut PooledConnection) -> FaultResult<PipelineReplies> {
        debug!(shard = %conn.shard(), commands = self.commands.len(), "flushing pipeline");
        let replies = conn.exec_batch(&self.commands)?;
        Ok(PipelineReplies::new(replies))
    }
}

/// MULTI/EXEC batch for one shard.
#[derive(Debug, Default, Clone)]
pub struct Transaction {
    commands: Vec<Command>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: FromReply>(&mut self, command: Command) -> Slot<T> {
        self.commands.push(command);
        Slot::new(self.commands.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Queues every command between MULTI and EXEC in one round trip.
    ///
    /// **Logic**:
    /// 1. Write `MULTI`, the commands, and `EXEC` together.
    /// 2. Every command must answer `+QUEUED`; the first rejection becomes
    ///    `CacheError::Pipeline` (the node then refuses EXEC, so nothing ran).
    /// 3. A null EXEC reply means a watched key changed: `TransactionAborted`.
    pub fn execute(&self, conn: &mut PooledConnection) -> CacheResult<PipelineReplies> {
        let shard = conn.shard().to_string();
        let mut batch = Vec::with_capacity(self.commands.len() + 2);
        batch.push(Command::new("MULTI"));
        batch.extend(self.commands.iter().cloned());
        batch.push(Command::new("EXEC"));

        debug!(shard = %shard, commands = self.commands.len(), "executing transaction");
        let mut replies = conn
            .exec_batch(&batch)
            .map_err(|fault| CacheError::connection(&shard, fault))?;

        let exec_reply = replies.pop();
        let mut replies = replies.into_iter();
        if let Some(message) = replies.next().and_then(|multi| multi.error_message()) {
            return Err(CacheError::connection(&shard, ConnectionFault::Server(message)));
        }
        for (index, queued) in replies.enumerate() {
            if let Some(message) = queued.error_message() {
                return Err(CacheError::Pipeline {
                    shard,
                    index,
                    message,
                });
            }
        }

        match exec_reply {
            Some(RespValue::Array(results)) => Ok(PipelineReplies::new(results)),
            Some(RespValue::NullArray) => Err(CacheError::TransactionAborted { shard }),
            Some(RespValue::Error(message)) => Err(CacheError::Pipeline {
                shard,
                index: self.commands.len(),
                message: String::from_utf8_lossy(&message).into_owned(),
            }),
            _ => Err(CacheError::connection(
                &shard,
                ConnectionFault::UnexpectedResponse("EXEC array"),
            )),
        }
    }
}

impl ShardedPool {
    /// Runs one command per key, pipelined per shard, with results in key order.
    ///
    /// `build(i)` creates the command for `keys[i]`.
    ///
    /// **Logic**:
    /// 1. Group the keys by shard and pipeline each group on its own connection.
    /// 2. A server error fails only its own entry.
    /// 3. A shard that cannot be reached (or whose pool is exhausted) fails every
    ///    entry routed to it; the other shards' entries are still reported, since
    ///    their writes have already been applied.
    pub fn pipeline_by_key<K, T, B>(&self, keys: &[K], build: B) -> Vec<BatchEntry<T>>
    where
        K: AsRef<str>,
        T: FromReply,
        B: Fn(usize) -> Command,
    {
        let mut results: Vec<Option<BatchEntry<T>>> =
            iter::repeat_with(|| None).take(keys.len()).collect();

        for group in self.router().group_by_shard(keys) {
            let label = self.pool(group.shard).label();
            let outcome = self.execute_on(group.shard, |conn| {
                let mut pipeline = Pipeline::new();
                let slots: Vec<Slot<T>> = group
                    .indices
                    .iter()
                    .map(|&idx| pipeline.add(build(idx)))
                    .collect();
                let mut replies = pipeline.execute(conn)?;
                Ok::<_, ConnectionFault>(
                    slots
                        .into_iter()
                        .map(|slot| replies.take(slot))
                        .collect::<Vec<_>>(),
                )
            });
            match outcome {
                Ok(replies) => {
                    for (&idx, entry) in group.indices.iter().zip(replies) {
                        results[idx] = Some(entry.map_err(|fault| CacheError::connection(label, fault)));
                    }
                }
                Err(err) => {
                    warn!(shard = %label, keys = group.indices.len(), error = %err, "batch group failed");
                    for &idx in &group.indices {
                        results[idx] = Some(Err(err.clone()));
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|entry| {
                entry.unwrap_or_else(|| {
                    Err(CacheError::Config("batch key was not routed to any shard".into()))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_follow_submission_order() {
        let mut pipeline = Pipeline::new();
        let first: Slot<i64> = pipeline.add(Command::new("INCR").arg("a"));
        let second: Slot<Option<String>> = pipeline.add(Command::new("GET").arg("b"));
        assert_eq!((first.index(), second.index()), (0, 1));
        assert_eq!(pipeline.len(), 2);

        let mut replies = PipelineReplies::new(vec![
            RespValue::Integer(7),
            RespValue::Bulk(Some(b"v".to_vec())),
        ]);
        assert_eq!(replies.take(second).unwrap().as_deref(), Some("v"));
        assert_eq!(replies.take(first).unwrap(), 7);
    }

    #[test]
    fn slot_errors_are_isolated() {
        let mut pipeline = Pipeline::new();
        let bad: Slot<i64> = pipeline.add(Command::new("INCR").arg("text"));
        let good: Slot<()> = pipeline.add(Command::new("SET").arg("k").arg("v"));

        let mut replies = PipelineReplies::new(vec![
            RespValue::Error(b"ERR value is not an integer".to_vec()),
            RespValue::Simple(b"OK".to_vec()),
        ]);
        assert!(matches!(replies.take(bad), Err(ConnectionFault::Server(_))));
        replies.take(good).unwrap();
        // A slot can only be read once.
        assert!(replies.take(good).is_err());
        assert!(replies.into_raw().is_empty());
    }
}
