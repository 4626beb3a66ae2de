//! # TCP Server
//!
//! Accept RESP2 connections, parse commands, and dispatch them to the
//! keyspace.
//!
//! ## Design Principles
//! 1. **Per-Connection Session**: MULTI queue, WATCH set, auth state and
//!    channel subscriptions live with the connection that created them.
//! 2. **Atomic EXEC**: A transaction checks its watched versions and runs every
//!    queued command under one keyspace lock.
//! 3. **Queue-Time Validation**: Unknown commands and arity errors inside MULTI
//!    are rejected when queued and poison the transaction (EXECABORT).
//! 4. **Push Multiplexing**: Published messages are written by the connection's
//!    own task, between command replies, never interleaved with them.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use hashbrown::HashSet;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

use crate::engine::{Db, EngineError, Keyspace, ScoreBound, TtlStatus};
use crate::protocol::{Reply, RespError, RespParser};
use crate::pubsub::{Broker, SubscriberId};

/// Settings for one node process.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Listen address, e.g. "127.0.0.1:6379". Port 0 picks a free port.
    pub bind: String,
    /// When set, clients must `AUTH` before anything else.
    pub password: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            bind: "127.0.0.1:6379".to_string(),
            password: None,
        }
    }
}

/// State shared by every connection of a node.
pub struct Node {
    keyspace: Keyspace,
    broker: Broker,
    password: Option<String>,
    next_client: AtomicU64,
}

impl Node {
    pub fn new(password: Option<String>) -> Self {
        Node {
            keyspace: Keyspace::new(),
            broker: Broker::new(),
            password,
            next_client: AtomicU64::new(1),
        }
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }
}

/// Accepts connections until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, node: Arc<Node>, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    info!(addr = %listener.local_addr()?, "node listening");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("node shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let _ = stream.set_nodelay(true);
                let node = Arc::clone(&node);
                tokio::spawn(async move {
                    debug!(%peer, "client connected");
                    if let Err(err) = handle_connection(stream, node).await {
                        debug!(%peer, error = %err, "connection closed with error");
                    }
                });
            }
        }
    }
}

/// Handles a single TCP client connection.
pub async fn handle_connection(stream: TcpStream, node: Arc<Node>) -> io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let (push_tx, mut push_rx) = mpsc::unbounded_channel();
    let mut session = Session::new(&node, push_tx);
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();
    let mut out = Vec::with_capacity(8 * 1024);

    let result = loop {
        tokio::select! {
            read = reader.read_buf(&mut buffer) => {
                match read {
                    Ok(0) => break Ok(()),
                    Ok(_) => {}
                    Err(err) => break Err(err),
                }

                out.clear();
                let mut fatal = false;
                loop {
                    match parser.parse(&mut buffer) {
                        Ok(Some(args)) if args.is_empty() => {}
                        Ok(Some(args)) => session.handle(&node, args).encode(&mut out),
                        Ok(None) => break,
                        Err(RespError::Protocol) => {
                            Reply::err("Protocol error").encode(&mut out);
                            fatal = true;
                            break;
                        }
                    }
                }
                if let Err(err) = writer.write_all(&out).await {
                    break Err(err);
                }
                if fatal {
                    break Ok(());
                }
            }
            Some(frame) = push_rx.recv() => {
                if let Err(err) = writer.write_all(&frame).await {
                    break Err(err);
                }
            }
        }
    };

    session.close(&node);
    result
}

/// Connection-scoped protocol state.
struct Session {
    id: SubscriberId,
    authenticated: bool,
    queued: Option<Vec<Vec<Vec<u8>>>>,
    queue_failed: bool,
    watched: Vec<(Vec<u8>, u64)>,
    channels: HashSet<Vec<u8>>,
    push_tx: UnboundedSender<Vec<u8>>,
}

impl Session {
    fn new(node: &Node, push_tx: UnboundedSender<Vec<u8>>) -> Self {
        Session {
            id: node.next_client.fetch_add(1, Ordering::Relaxed),
            authenticated: node.password.is_none(),
            queued: None,
            queue_failed: false,
            watched: Vec::new(),
            channels: HashSet::new(),
            push_tx,
        }
    }

    fn handle(&mut self, node: &Node, args: Vec<Vec<u8>>) -> Reply {
        let name = command_name(&args[0]);

        if !self.authenticated && name != "AUTH" {
            return Reply::Error("NOAUTH Authentication required.".to_string());
        }
        if !self.channels.is_empty() && !matches!(name.as_str(), "SUBSCRIBE" | "UNSUBSCRIBE" | "PING") {
            return Reply::err(format!(
                "Can't execute '{}': only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT are allowed in this context",
                name.to_ascii_lowercase()
            ));
        }

        match name.as_str() {
            "AUTH" => self.auth(node, &args),
            "MULTI" => self.multi(),
            "EXEC" => self.exec(node),
            "DISCARD" => self.discard(),
            "WATCH" => self.watch(node, &args),
            "UNWATCH" => {
                self.watched.clear();
                Reply::ok()
            }
            "SUBSCRIBE" => self.subscribe(node, &args),
            "UNSUBSCRIBE" => self.unsubscribe(node, &args),
            _ => match self.queued.as_mut() {
                Some(queue) => match check_arity(&name, args.len()) {
                    Ok(()) => {
                        queue.push(args);
                        Reply::Simple("QUEUED")
                    }
                    Err(reply) => {
                        self.queue_failed = true;
                        reply
                    }
                },
                None => execute(&mut node.keyspace.lock(), &node.broker, &args),
            },
        }
    }

    fn auth(&mut self, node: &Node, args: &[Vec<u8>]) -> Reply {
        if args.len() != 2 {
            return wrong_arity("auth");
        }
        match &node.password {
            None => Reply::err("AUTH <password> called without any password configured for the default user."),
            Some(password) if password.as_bytes() == args[1].as_slice() => {
                self.authenticated = true;
                Reply::ok()
            }
            Some(_) => Reply::Error("WRONGPASS invalid username-password pair or user is disabled.".to_string()),
        }
    }

    fn multi(&mut self) -> Reply {
        if self.queued.is_some() {
            return Reply::err("MULTI calls can not be nested");
        }
        self.queued = Some(Vec::new());
        self.queue_failed = false;
        Reply::ok()
    }

    /// Runs the queued commands atomically.
    ///
    /// **Logic**:
    /// 1. A command rejected at queue time aborts the whole transaction.
    /// 2. Any watched key whose version moved aborts with a null array.
    /// 3. Otherwise every command runs under one lock; per-command errors are
    ///    returned in place and do not stop the rest.
    fn exec(&mut self, node: &Node) -> Reply {
        let Some(queued) = self.queued.take() else {
            return Reply::err("EXEC without MULTI");
        };
        let watched = std::mem::take(&mut self.watched);
        if std::mem::take(&mut self.queue_failed) {
            return Reply::Error("EXECABORT Transaction discarded because of previous errors.".to_string());
        }

        let mut db = node.keyspace.lock();
        if watched.iter().any(|(key, version)| db.version(key) != *version) {
            debug!(client = self.id, "transaction aborted by watched key");
            return Reply::NullArray;
        }
        Reply::Array(
            queued
                .iter()
                .map(|args| execute(&mut db, &node.broker, args))
                .collect(),
        )
    }

    fn discard(&mut self) -> Reply {
        if self.queued.take().is_none() {
            return Reply::err("DISCARD without MULTI");
        }
        self.queue_failed = false;
        self.watched.clear();
        Reply::ok()
    }

    fn watch(&mut self, node: &Node, args: &[Vec<u8>]) -> Reply {
        if self.queued.is_some() {
            return Reply::err("WATCH inside MULTI is not allowed");
        }
        if args.len() < 2 {
            return wrong_arity("watch");
        }
        let mut db = node.keyspace.lock();
        for key in &args[1..] {
            let version = db.version(key);
            self.watched.push((key.clone(), version));
        }
        Reply::ok()
    }

    fn subscribe(&mut self, node: &Node, args: &[Vec<u8>]) -> Reply {
        if args.len() < 2 {
            return wrong_arity("subscribe");
        }
        let mut replies = Vec::with_capacity(args.len() - 1);
        for channel in &args[1..] {
            if self.channels.insert(channel.clone()) {
                node.broker.subscribe(channel, self.id, self.push_tx.clone());
            }
            replies.push(self.confirmation("subscribe", Some(channel.clone())));
        }
        flatten(replies)
    }

    fn unsubscribe(&mut self, node: &Node, args: &[Vec<u8>]) -> Reply {
        let channels: Vec<Vec<u8>> = if args.len() > 1 {
            args[1..].to_vec()
        } else {
            self.channels.iter().cloned().collect()
        };
        if channels.is_empty() {
            return self.confirmation("unsubscribe", None);
        }
        let mut replies = Vec::with_capacity(channels.len());
        for channel in channels {
            if self.channels.remove(&channel) {
                node.broker.unsubscribe(&channel, self.id);
            }
            replies.push(self.confirmation("unsubscribe", Some(channel)));
        }
        flatten(replies)
    }

    fn confirmation(&self, kind: &str, channel: Option<Vec<u8>>) -> Reply {
        Reply::Array(vec![
            Reply::Bulk(kind.as_bytes().to_vec()),
            Reply::bulk_or_nil(channel),
            Reply::Integer(self.channels.len() as i64),
        ])
    }

    fn close(&mut self, node: &Node) {
        for channel in self.channels.drain() {
            node.broker.unsubscribe(&channel, self.id);
        }
    }
}

/// (UN)SUBSCRIBE answers one frame per channel.
fn flatten(mut replies: Vec<Reply>) -> Reply {
    if replies.len() == 1 {
        return replies.remove(0);
    }
    Reply::Frames(replies)
}

fn command_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_uppercase()
}

#[derive(Debug, Error)]
enum CommandError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("ERR value is not an integer or out of range")]
    NotInteger,
    #[error("ERR value is not a valid float")]
    NotFloat,
    #[error("ERR min or max is not a float")]
    BadRange,
    #[error("ERR syntax error")]
    Syntax,
    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpire(&'static str),
    #[error("ERR wrong number of arguments for '{0}' command")]
    Arity(&'static str),
}

type CommandResult = Result<Reply, CommandError>;

/// Redis-style arity: positive means exact, negative means at least.
fn arity(name: &str) -> Option<i32> {
    let arity = match name {
        "PING" => -1,
        "GET" | "INCR" | "TTL" | "KEYS" | "HGETALL" | "HLEN" | "RPOP" | "LPOP" | "LLEN" => 2,
        "SETNX" | "GETSET" | "EXPIRE" | "PEXPIRE" | "HGET" | "SISMEMBER" | "PUBLISH" => 3,
        "SETEX" | "LTRIM" | "LRANGE" | "LREM" | "ZREMRANGEBYSCORE" | "ZREVRANGEBYSCORE" => 4,
        "DEL" | "EXISTS" => -2,
        "SET" | "HMGET" | "HDEL" | "RPUSH" | "LPUSH" | "SADD" | "ZREM" => -3,
        "HSET" | "HMSET" | "ZADD" => -4,
        _ => return None,
    };
    Some(arity)
}

fn wrong_arity(name: &str) -> Reply {
    Reply::err(format!(
        "wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn check_arity(name: &str, argc: usize) -> Result<(), Reply> {
    match arity(name) {
        None => Err(Reply::err(format!("unknown command '{}'", name))),
        Some(exact) if exact > 0 && argc != exact as usize => Err(wrong_arity(name)),
        Some(min) if min < 0 && argc < min.unsigned_abs() as usize => Err(wrong_arity(name)),
        Some(_) => Ok(()),
    }
}

/// Runs one data command against a locked keyspace.
pub fn execute(db: &mut Db, broker: &Broker, args: &[Vec<u8>]) -> Reply {
    let name = command_name(&args[0]);
    if let Err(reply) = check_arity(&name, args.len()) {
        return reply;
    }
    match run(db, broker, &name, args) {
        Ok(reply) => reply,
        Err(err) => Reply::Error(err.to_string()),
    }
}

fn parse_i64(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(CommandError::NotInteger)
}

fn parse_f64(arg: &[u8]) -> Result<f64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|text| text.parse::<f64>().ok())
        .filter(|value| !value.is_nan())
        .ok_or(CommandError::NotFloat)
}

fn parse_bound(arg: &[u8]) -> Result<ScoreBound, CommandError> {
    let (exclusive, digits) = match arg.split_first() {
        Some((b'(', rest)) => (true, rest),
        _ => (false, arg),
    };
    let value = parse_f64(digits).map_err(|_| CommandError::BadRange)?;
    Ok(ScoreBound { value, exclusive })
}

/// Positive TTL from an integer argument counted in `unit_ms` milliseconds.
fn parse_ttl(arg: &[u8], unit_ms: u64, command: &'static str) -> Result<Duration, CommandError> {
    let amount = parse_i64(arg)?;
    u64::try_from(amount)
        .ok()
        .filter(|&amount| amount > 0)
        .and_then(|amount| amount.checked_mul(unit_ms))
        .map(Duration::from_millis)
        .ok_or(CommandError::InvalidExpire(command))
}

fn pairs(args: &[Vec<u8>], command: &'static str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CommandError> {
    if args.len() % 2 != 0 {
        return Err(CommandError::Arity(command));
    }
    Ok(args
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect())
}

fn flag(value: bool) -> Reply {
    Reply::Integer(value as i64)
}

fn run(db: &mut Db, broker: &Broker, name: &str, args: &[Vec<u8>]) -> CommandResult {
    let key = args.get(1).map(Vec::as_slice).unwrap_or_default();
    let reply = match name {
        "PING" => match args.len() {
            1 => Reply::Simple("PONG"),
            2 => Reply::Bulk(args[1].clone()),
            _ => return Err(CommandError::Arity("ping")),
        },

        // keys
        "DEL" => Reply::Integer(args[1..].iter().filter(|key| db.del(key)).count() as i64),
        "EXISTS" => Reply::Integer(args[1..].iter().filter(|key| db.exists(key)).count() as i64),
        "EXPIRE" | "PEXPIRE" => {
            let amount = parse_i64(&args[2])?;
            let (unit_ms, command) = if name == "EXPIRE" { (1_000, "expire") } else { (1, "pexpire") };
            if amount <= 0 {
                flag(db.del(key))
            } else {
                let ttl = (amount as u64)
                    .checked_mul(unit_ms)
                    .map(Duration::from_millis)
                    .ok_or(CommandError::InvalidExpire(command))?;
                flag(db.expire(key, ttl))
            }
        }
        "TTL" => Reply::Integer(match db.ttl(key) {
            TtlStatus::Missing => -2,
            TtlStatus::NoExpiry => -1,
            TtlStatus::ExpiresIn(remaining) => ((remaining.as_millis() + 500) / 1000) as i64,
        }),
        "KEYS" => Reply::bulks(db.keys(key)),

        // strings
        "GET" => Reply::bulk_or_nil(db.get(key)?),
        "SET" => {
            let mut nx = false;
            let mut ttl = None;
            let mut options = args[3..].iter();
            while let Some(option) = options.next() {
                match command_name(option).as_str() {
                    "NX" => nx = true,
                    "EX" | "PX" if ttl.is_none() => {
                        let amount = options.next().ok_or(CommandError::Syntax)?;
                        let unit_ms = if option.eq_ignore_ascii_case(b"EX") { 1_000 } else { 1 };
                        ttl = Some(parse_ttl(amount, unit_ms, "set")?);
                    }
                    _ => return Err(CommandError::Syntax),
                }
            }
            let value = args[2].clone();
            if nx {
                if db.set_nx(key, value, ttl) {
                    Reply::ok()
                } else {
                    Reply::Nil
                }
            } else {
                db.set(key, value, ttl);
                Reply::ok()
            }
        }
        "SETEX" => {
            let ttl = parse_ttl(&args[2], 1_000, "setex")?;
            db.set(key, args[3].clone(), Some(ttl));
            Reply::ok()
        }
        "SETNX" => flag(db.set_nx(key, args[2].clone(), None)),
        "GETSET" => Reply::bulk_or_nil(db.get_set(key, args[2].clone())?),
        "INCR" => Reply::Integer(db.incr(key)?),

        // hashes
        "HSET" => Reply::Integer(db.hset(key, &pairs(&args[2..], "hset")?)?),
        "HMSET" => {
            db.hset(key, &pairs(&args[2..], "hmset")?)?;
            Reply::ok()
        }
        "HGET" => Reply::bulk_or_nil(db.hget(key, &args[2])?),
        "HMGET" => Reply::Array(
            db.hmget(key, &args[2..])?
                .into_iter()
                .map(Reply::bulk_or_nil)
                .collect(),
        ),
        "HGETALL" => Reply::bulks(
            db.hgetall(key)?
                .into_iter()
                .flat_map(|(field, value)| [field, value]),
        ),
        "HDEL" => Reply::Integer(db.hdel(key, &args[2..])?),
        "HLEN" => Reply::Integer(db.hlen(key)?),

        // lists
        "RPUSH" => Reply::Integer(db.push(key, &args[2..], false)?),
        "LPUSH" => Reply::Integer(db.push(key, &args[2..], true)?),
        "RPOP" => Reply::bulk_or_nil(db.pop(key, false)?),
        "LPOP" => Reply::bulk_or_nil(db.pop(key, true)?),
        "LTRIM" => {
            db.ltrim(key, parse_i64(&args[2])?, parse_i64(&args[3])?)?;
            Reply::ok()
        }
        "LRANGE" => Reply::bulks(db.lrange(key, parse_i64(&args[2])?, parse_i64(&args[3])?)?),
        "LREM" => Reply::Integer(db.lrem(key, parse_i64(&args[2])?, &args[3])?),
        "LLEN" => Reply::Integer(db.llen(key)?),

        // sets
        "SADD" => Reply::Integer(db.sadd(key, &args[2..])?),
        "SISMEMBER" => flag(db.sismember(key, &args[2])?),

        // sorted sets
        "ZADD" => {
            let members = pairs(&args[2..], "zadd")?
                .into_iter()
                .map(|(score, member)| Ok((parse_f64(&score)?, member)))
                .collect::<Result<Vec<_>, CommandError>>()?;
            Reply::Integer(db.zadd(key, &members)?)
        }
        "ZREM" => Reply::Integer(db.zrem(key, &args[2..])?),
        "ZREMRANGEBYSCORE" => Reply::Integer(db.zremrangebyscore(
            key,
            parse_bound(&args[2])?,
            parse_bound(&args[3])?,
        )?),
        "ZREVRANGEBYSCORE" => Reply::bulks(db.zrevrangebyscore(
            key,
            parse_bound(&args[2])?,
            parse_bound(&args[3])?,
        )?),

        "PUBLISH" => Reply::Integer(broker.publish(key, &args[2]) as i64),

        _ => Reply::err(format!("unknown command '{}'", name)),
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|part| part.as_bytes().to_vec()).collect()
    }

    fn run_one(db: &mut Db, parts: &[&str]) -> Reply {
        execute(db, &Broker::new(), &cmd(parts))
    }

    #[test]
    fn string_commands() {
        let keyspace = Keyspace::new();
        let mut db = keyspace.lock();
        assert_eq!(run_one(&mut db, &["SET", "k", "v"]), Reply::ok());
        assert_eq!(run_one(&mut db, &["get", "k"]), Reply::Bulk(b"v".to_vec()));
        assert_eq!(run_one(&mut db, &["SET", "k", "w", "NX"]), Reply::Nil);
        assert_eq!(run_one(&mut db, &["SET", "lock", "t", "NX", "PX", "5000"]), Reply::ok());
        assert!(matches!(run_one(&mut db, &["TTL", "lock"]), Reply::Integer(5)));
        assert_eq!(run_one(&mut db, &["GETSET", "k", "x"]), Reply::Bulk(b"v".to_vec()));
        assert_eq!(run_one(&mut db, &["INCR", "n"]), Reply::Integer(1));
        assert!(run_one(&mut db, &["INCR", "k"]).is_error());
        assert!(run_one(&mut db, &["SETEX", "k", "0", "v"]).is_error());
    }

    #[test]
    fn millisecond_expiry_commands() {
        let keyspace = Keyspace::new();
        let mut db = keyspace.lock();
        assert_eq!(run_one(&mut db, &["SET", "k", "v", "PX", "1500"]), Reply::ok());
        assert!(matches!(run_one(&mut db, &["TTL", "k"]), Reply::Integer(1)));
        assert_eq!(run_one(&mut db, &["PEXPIRE", "k", "250"]), Reply::Integer(1));
        assert!(db.exists(b"k"));
        assert_eq!(run_one(&mut db, &["PEXPIRE", "missing", "250"]), Reply::Integer(0));
        assert_eq!(run_one(&mut db, &["PEXPIRE", "k", "0"]), Reply::Integer(1));
        assert!(!db.exists(b"k"));

        // Longer than u32 milliseconds is still a valid TTL.
        assert_eq!(run_one(&mut db, &["SET", "long", "v", "PX", "5000000000"]), Reply::ok());
        assert!(run_one(&mut db, &["SET", "bad", "v", "PX", "-5"]).is_error());
    }

    #[test]
    fn arity_and_unknown_commands() {
        let keyspace = Keyspace::new();
        let mut db = keyspace.lock();
        assert!(run_one(&mut db, &["GET"]).is_error());
        assert!(run_one(&mut db, &["NOPE", "x"]).is_error());
        assert!(run_one(&mut db, &["HSET", "h", "f"]).is_error());
        assert!(run_one(&mut db, &["HSET", "h", "f", "v", "g"]).is_error());
        assert_eq!(check_arity("DEL", 3), Ok(()));
        assert!(check_arity("LTRIM", 3).is_err());
    }

    #[test]
    fn hash_and_sorted_set_commands() {
        let keyspace = Keyspace::new();
        let mut db = keyspace.lock();
        assert_eq!(run_one(&mut db, &["HSET", "h", "a", "1", "b", "2"]), Reply::Integer(2));
        assert_eq!(
            run_one(&mut db, &["HMGET", "h", "a", "zz"]),
            Reply::Array(vec![Reply::Bulk(b"1".to_vec()), Reply::Nil])
        );
        assert_eq!(run_one(&mut db, &["HLEN", "h"]), Reply::Integer(2));

        assert_eq!(run_one(&mut db, &["ZADD", "z", "1", "a", "2.5", "b"]), Reply::Integer(2));
        assert_eq!(
            run_one(&mut db, &["ZREVRANGEBYSCORE", "z", "+inf", "(1"]),
            Reply::bulks(vec![b"b".to_vec()])
        );
        assert!(run_one(&mut db, &["ZADD", "z", "high", "c"]).is_error());
    }

    #[test]
    fn session_transaction_flow() {
        let node = Node::new(None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = Session::new(&node, tx);

        assert_eq!(session.handle(&node, cmd(&["MULTI"])), Reply::ok());
        assert_eq!(session.handle(&node, cmd(&["SET", "a", "1"])), Reply::Simple("QUEUED"));
        assert_eq!(session.handle(&node, cmd(&["INCR", "a"])), Reply::Simple("QUEUED"));
        assert_eq!(
            session.handle(&node, cmd(&["EXEC"])),
            Reply::Array(vec![Reply::ok(), Reply::Integer(2)])
        );

        // A queue-time error discards everything.
        session.handle(&node, cmd(&["MULTI"]));
        session.handle(&node, cmd(&["SET", "b", "1"]));
        assert!(session.handle(&node, cmd(&["BOGUS"])).is_error());
        assert!(session.handle(&node, cmd(&["EXEC"])).is_error());
        assert_eq!(node.keyspace().lock().get(b"b").unwrap(), None);
    }

    #[test]
    fn watched_key_change_aborts_exec() {
        let node = Node::new(None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = Session::new(&node, tx);

        session.handle(&node, cmd(&["WATCH", "k"]));
        node.keyspace().lock().set(b"k", b"other".to_vec(), None);
        session.handle(&node, cmd(&["MULTI"]));
        session.handle(&node, cmd(&["DEL", "k"]));
        assert_eq!(session.handle(&node, cmd(&["EXEC"])), Reply::NullArray);
        assert!(node.keyspace().lock().exists(b"k"));
    }

    #[test]
    fn auth_gates_commands() {
        let node = Node::new(Some("secret".to_string()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = Session::new(&node, tx);

        assert!(session.handle(&node, cmd(&["PING"])).is_error());
        assert!(session.handle(&node, cmd(&["AUTH", "wrong"])).is_error());
        assert_eq!(session.handle(&node, cmd(&["AUTH", "secret"])), Reply::ok());
        assert_eq!(session.handle(&node, cmd(&["PING"])), Reply::Simple("PONG"));
    }
}
