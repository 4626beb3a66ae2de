//! # Shard Connection Pool
//!
//! Purpose: Keep a bounded set of reusable TCP connections to one backing node
//! and apply backpressure when every connection is checked out.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse connections; create lazily up to `max_total`.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections or
//!    adjusting counts, never while talking to the node.
//! 3. **Bounded Waiting**: An exhausted pool blocks callers on a condition
//!    variable until `max_wait`, then fails with `PoolExhausted`.
//! 4. **RAII Release**: `PooledConnection` returns itself on drop, so every exit
//!    path (including unwinding) gives the slot back.

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::command::{Command, FromReply};
use crate::config::{PoolConfig, ShardEndpoint};
use crate::error::{CacheError, CacheResult, ConnectionFault, FaultResult};
use crate::resp::{encode_command, read_response, RespValue};

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
}

struct PoolInner {
    endpoint: ShardEndpoint,
    label: String,
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections parked in the idle set.
    pub idle: usize,
    /// Connections currently checked out.
    pub active: usize,
}

/// Connection pool for one shard.
#[derive(Clone)]
pub struct ShardPool {
    inner: Arc<PoolInner>,
}

enum Checkout {
    Idle(Connection),
    // A slot was reserved; the caller must open the connection.
    Reserved,
}

impl ShardPool {
    /// Creates an empty pool; connections are opened on first use.
    pub fn new(endpoint: ShardEndpoint, config: PoolConfig) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
        };
        ShardPool {
            inner: Arc::new(PoolInner {
                label: endpoint.label(),
                endpoint,
                config,
                state: Mutex::new(state),
                available: Condvar::new(),
            }),
        }
    }

    pub fn endpoint(&self) -> &ShardEndpoint {
        &self.inner.endpoint
    }

    /// Shard label used in logs and errors.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Acquires a connection, blocking up to the configured wait timeout.
    ///
    /// **Logic**:
    /// 1. Take an idle connection or reserve a slot for a new one.
    /// 2. With `test_on_borrow`, PING idle connections; a dead one is discarded
    ///    and acquisition is retried once.
    /// 3. Fail with `PoolExhausted` when nothing frees up before the deadline.
    pub fn acquire(&self) -> CacheResult<PooledConnection> {
        let deadline = Instant::now() + self.inner.config.max_wait();
        let mut last_fault = None;

        for _ in 0..2 {
            match self.checkout(deadline)? {
                Checkout::Idle(mut conn) => {
                    if !self.inner.config.test_on_borrow {
                        return Ok(PooledConnection::new(self.inner.clone(), conn));
                    }
                    match conn.ping() {
                        Ok(()) => return Ok(PooledConnection::new(self.inner.clone(), conn)),
                        Err(fault) => {
                            warn!(shard = %self.inner.label, error = %fault, "discarding connection that failed validation");
                            self.release_slot();
                            last_fault = Some(fault);
                        }
                    }
                }
                Checkout::Reserved => {
                    return match Connection::connect(&self.inner.endpoint) {
                        Ok(conn) => {
                            debug!(shard = %self.inner.label, "opened connection");
                            Ok(PooledConnection::new(self.inner.clone(), conn))
                        }
                        Err(fault) => {
                            self.release_slot();
                            Err(CacheError::connection(&self.inner.label, fault))
                        }
                    };
                }
            }
        }

        let fault = last_fault.unwrap_or(ConnectionFault::Protocol("connection validation failed"));
        Err(CacheError::connection(&self.inner.label, fault))
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            idle: state.idle.len(),
            active: state.total - state.idle.len(),
        }
    }

    fn checkout(&self, deadline: Instant) -> CacheResult<Checkout> {
        let mut state = self.inner.state.lock();
        loop {
            // LIFO keeps the hottest connections in use.
            if let Some(conn) = state.idle.pop_back() {
                return Ok(Checkout::Idle(conn));
            }
            if state.total < self.inner.config.max_total {
                state.total += 1;
                return Ok(Checkout::Reserved);
            }
            if Instant::now() >= deadline {
                return Err(CacheError::PoolExhausted {
                    shard: self.inner.label.clone(),
                    waited: self.inner.config.max_wait(),
                });
            }
            self.inner.available.wait_until(&mut state, deadline);
        }
    }

    fn release_slot(&self) {
        release_slot(&self.inner);
    }
}

fn release_slot(pool: &PoolInner) {
    let mut state = pool.state.lock();
    state.total = state.total.saturating_sub(1);
    drop(state);
    pool.available.notify_one();
}

fn return_connection(pool: &PoolInner, conn: Connection) {
    let mut state = pool.state.lock();
    if state.idle.len() < pool.config.max_idle {
        state.idle.push_back(conn);
    } else {
        state.total = state.total.saturating_sub(1);
    }
    drop(state);
    pool.available.notify_one();
}

/// RAII wrapper returning a connection to its pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Label of the shard this connection belongs to.
    pub fn shard(&self) -> &str {
        &self.pool.label
    }

    /// Sends one command and returns the raw reply.
    pub fn exec(&mut self, command: &Command) -> FaultResult<RespValue> {
        let result = self.connection()?.exec(command);
        self.track(result)
    }

    /// Sends one command and decodes its reply.
    pub fn query<T: FromReply>(&mut self, command: &Command) -> FaultResult<T> {
        T::from_reply(self.exec(command)?)
    }

    /// Writes every command in one flush, then reads one reply per command.
    pub fn exec_batch(&mut self, commands: &[Command]) -> FaultResult<Vec<RespValue>> {
        let result = self.connection()?.exec_batch(commands);
        self.track(result)
    }

    /// Writes a command without waiting for its reply.
    pub(crate) fn send(&mut self, command: &Command) -> FaultResult<()> {
        let result = self.connection()?.send(command);
        self.track(result)
    }

    /// Reads the next reply or push message from the node.
    pub(crate) fn read_reply(&mut self) -> FaultResult<RespValue> {
        let result = self.connection()?.read();
        self.track(result)
    }

    pub(crate) fn set_read_timeout(&mut self, timeout: Option<Duration>) -> FaultResult<()> {
        let result = self
            .connection()?
            .reader
            .get_ref()
            .set_read_timeout(timeout)
            .map_err(ConnectionFault::from);
        self.track(result)
    }

    /// Keeps the connection out of the idle set when it is dropped.
    pub(crate) fn discard(&mut self) {
        self.valid = false;
    }

    fn connection(&mut self) -> FaultResult<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or(ConnectionFault::Protocol("connection already released"))
    }

    fn track<T>(&mut self, result: FaultResult<T>) -> FaultResult<T> {
        if let Err(fault) = &result {
            // If IO/protocol fails, do not return this connection to the pool.
            if fault.poisons_connection() {
                self.valid = false;
            }
        }
        result
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        if self.valid {
            return_connection(&self.pool, conn);
        } else {
            debug!(shard = %self.pool.label, "dropping invalid connection");
            drop(conn);
            release_slot(&self.pool);
        }
    }
}

/// Single TCP connection with reusable buffers.
struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    fn connect(endpoint: &ShardEndpoint) -> FaultResult<Self> {
        let stream = connect_stream(endpoint)?;
        stream.set_read_timeout(endpoint.timeout())?;
        stream.set_write_timeout(endpoint.timeout())?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        };

        if let Some(password) = &endpoint.password {
            let reply = conn.exec(&Command::new("AUTH").arg(password))?;
            <()>::from_reply(reply)?;
        }
        Ok(conn)
    }

    fn ping(&mut self) -> FaultResult<()> {
        match self.exec(&Command::new("PING"))? {
            RespValue::Simple(_) | RespValue::Bulk(Some(_)) => Ok(()),
            RespValue::Error(message) => Err(ConnectionFault::Server(
                String::from_utf8_lossy(&message).into_owned(),
            )),
            _ => Err(ConnectionFault::UnexpectedResponse("PONG")),
        }
    }

    fn exec(&mut self, command: &Command) -> FaultResult<RespValue> {
        self.send(command)?;
        self.read()
    }

    fn exec_batch(&mut self, commands: &[Command]) -> FaultResult<Vec<RespValue>> {
        self.write_buf.clear();
        for command in commands {
            encode_command(command.parts(), &mut self.write_buf);
        }
        self.flush_buf()?;

        let mut replies = Vec::with_capacity(commands.len());
        for _ in commands {
            replies.push(self.read()?);
        }
        Ok(replies)
    }

    fn send(&mut self, command: &Command) -> FaultResult<()> {
        self.write_buf.clear();
        encode_command(command.parts(), &mut self.write_buf);
        self.flush_buf()
    }

    fn read(&mut self) -> FaultResult<RespValue> {
        read_response(&mut self.reader, &mut self.line_buf)
    }

    fn flush_buf(&mut self) -> FaultResult<()> {
        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        Ok(())
    }
}

fn connect_stream(endpoint: &ShardEndpoint) -> FaultResult<TcpStream> {
    let mut last_err = None;
    for addr in (endpoint.host.as_str(), endpoint.port).to_socket_addrs()? {
        let attempt = match endpoint.timeout() {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(match last_err {
        Some(err) => ConnectionFault::Io(err),
        None => ConnectionFault::Protocol("address resolved to nothing"),
    })
}
