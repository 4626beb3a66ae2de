//! # Publish / Subscribe
//!
//! Purpose: Publish to and consume from named channels on the shard that owns
//! the channel name.
//!
//! A subscription holds one pooled connection for its whole lifetime; in
//! subscribed mode the node only sends push frames on it.

use tracing::debug;

use crate::command::Command;
use crate::error::{CacheError, CacheResult, ConnectionFault, FaultResult};
use crate::executor::ShardedPool;
use crate::pool::PooledConnection;
use crate::resp::RespValue;

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: String,
}

/// Push frames the node sends to a subscribed connection.
#[derive(Debug, PartialEq, Eq)]
enum Push {
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    Message(Message),
}

fn text(value: RespValue) -> FaultResult<String> {
    match value {
        RespValue::Bulk(Some(data)) | RespValue::Simple(data) => {
            String::from_utf8(data).map_err(|_| ConnectionFault::InvalidUtf8)
        }
        _ => Err(ConnectionFault::UnexpectedResponse("bulk string in push frame")),
    }
}

fn parse_push(value: RespValue) -> FaultResult<Push> {
    let items = match value {
        RespValue::Array(items) if items.len() == 3 => items,
        RespValue::Error(message) => {
            return Err(ConnectionFault::Server(
                String::from_utf8_lossy(&message).into_owned(),
            ))
        }
        _ => return Err(ConnectionFault::UnexpectedResponse("3-element push frame")),
    };
    let mut items = items.into_iter();
    let kind = items.next().map(text).transpose()?.unwrap_or_default();
    let channel = items.next().map(text).transpose()?.unwrap_or_default();
    let last = items.next();

    match kind.as_str() {
        "subscribe" => Ok(Push::Subscribed { channel }),
        "unsubscribe" => Ok(Push::Unsubscribed { channel }),
        "message" => {
            let payload = last.map(text).transpose()?.unwrap_or_default();
            Ok(Push::Message(Message { channel, payload }))
        }
        _ => Err(ConnectionFault::UnexpectedResponse("subscribe, unsubscribe or message")),
    }
}

/// A connection dedicated to one channel.
///
/// The connection counts against its shard's pool until the subscription is
/// dropped. It never returns to the idle set: after `unsubscribe` (or a drop
/// mid-stream) it is closed, and the node forgets the subscription.
pub struct Subscription {
    conn: PooledConnection,
    channel: String,
}

impl Subscription {
    /// Subscribes on the shard that owns `channel` and waits for the node to
    /// confirm, so messages published after this returns are delivered.
    pub(crate) fn open(pool: &ShardedPool, channel: &str) -> CacheResult<Self> {
        let mut conn = pool.checkout(channel)?;
        // Subscribed mode never goes back to request/reply.
        conn.discard();

        let label = conn.shard().to_string();
        let confirm = |conn: &mut PooledConnection| -> FaultResult<()> {
            conn.set_read_timeout(None)?;
            conn.send(&Command::new("SUBSCRIBE").arg(channel))?;
            match parse_push(conn.read_reply()?)? {
                Push::Subscribed { .. } => Ok(()),
                _ => Err(ConnectionFault::UnexpectedResponse("subscribe confirmation")),
            }
        };
        confirm(&mut conn).map_err(|fault| CacheError::connection(&label, fault))?;

        debug!(shard = %label, channel = %channel, "subscribed");
        Ok(Subscription {
            conn,
            channel: channel.to_string(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Blocks until the next message arrives on the channel.
    pub fn next_message(&mut self) -> CacheResult<Message> {
        loop {
            let push = self
                .conn
                .read_reply()
                .and_then(parse_push)
                .map_err(|fault| CacheError::connection(self.conn.shard(), fault))?;
            if let Push::Message(message) = push {
                return Ok(message);
            }
        }
    }

    /// Leaves the channel. Messages still in flight are dropped.
    pub fn unsubscribe(mut self) -> CacheResult<()> {
        let channel = self.channel.clone();
        let conn = &mut self.conn;
        let result = conn
            .send(&Command::new("UNSUBSCRIBE").arg(&channel))
            .and_then(|()| loop {
                if let Push::Unsubscribed { .. } = parse_push(conn.read_reply()?)? {
                    return Ok(());
                }
            });
        result.map_err(|fault| CacheError::connection(self.conn.shard(), fault))?;
        debug!(channel = %channel, "unsubscribed");
        Ok(())
    }
}
