//! # Error Taxonomy
//!
//! Purpose: Give callers one uniform error type for every cache operation while
//! keeping the original low-level cause reachable through `source()`.
//!
//! ## Design Principles
//! 1. **Two Layers**: Connection-level code returns `ConnectionFault`; the scoped
//!    executor wraps it into `CacheError` together with the shard it happened on.
//! 2. **No Hidden Retries**: Errors surface as-is; retry policy belongs to callers.
//! 3. **Typed Failures**: Backpressure, lock timeouts, and transaction aborts are
//!    distinct variants so callers can match on them.

use std::time::Duration;

use thiserror::Error;

/// Result type for caller-facing operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type for work running against a single borrowed connection.
pub type FaultResult<T> = Result<T, ConnectionFault>;

/// Uniform execution error surfaced by every client operation.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// No connection became available within the pool's wait timeout.
    #[error("shard `{shard}`: no connection available within {waited:?}")]
    PoolExhausted { shard: String, waited: Duration },

    /// Network, protocol, or server fault while running a unit of work.
    #[error("shard `{shard}`: cache execution failed: {source}")]
    Connection {
        shard: String,
        #[source]
        source: ConnectionFault,
    },

    /// A distributed lock was not acquired before the caller's deadline.
    #[error("lock `{name}` not acquired within {waited:?}")]
    LockTimeout { name: String, waited: Duration },

    /// A transactional batch was rejected at queuing time.
    #[error("shard `{shard}`: batch command #{index} rejected: {message}")]
    Pipeline {
        shard: String,
        index: usize,
        message: String,
    },

    /// The node discarded a transaction because a watched key changed.
    #[error("shard `{shard}`: transaction aborted by the node")]
    TransactionAborted { shard: String },

    /// Configuration could not be loaded or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Wraps a connection fault with the shard it occurred on.
    pub(crate) fn connection(shard: &str, source: ConnectionFault) -> Self {
        CacheError::Connection {
            shard: shard.to_string(),
            source,
        }
    }

    /// Returns true when the error is pool backpressure rather than a node fault.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, CacheError::PoolExhausted { .. })
    }

    /// Returns the underlying connection fault, if any.
    pub fn fault(&self) -> Option<&ConnectionFault> {
        match self {
            CacheError::Connection { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Low-level cause of a failed command.
#[derive(Debug, Error)]
pub enum ConnectionFault {
    /// Socket read/write/connect failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// RESP2 framing could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// The node answered with an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// The reply type did not match what the command decoder expected.
    #[error("unexpected response: expected {0}")]
    UnexpectedResponse(&'static str),

    /// A bulk reply that should hold text was not valid UTF-8.
    #[error("reply is not valid utf-8")]
    InvalidUtf8,
}

// `io::Error` is not `Clone`; a copy keeps its kind and message, which is what
// batch entries sharing one shard failure need.
impl Clone for ConnectionFault {
    fn clone(&self) -> Self {
        match self {
            ConnectionFault::Io(err) => {
                ConnectionFault::Io(std::io::Error::new(err.kind(), err.to_string()))
            }
            ConnectionFault::Protocol(message) => ConnectionFault::Protocol(message),
            ConnectionFault::Server(message) => ConnectionFault::Server(message.clone()),
            ConnectionFault::UnexpectedResponse(expected) => {
                ConnectionFault::UnexpectedResponse(expected)
            }
            ConnectionFault::InvalidUtf8 => ConnectionFault::InvalidUtf8,
        }
    }
}

impl ConnectionFault {
    /// Faults that leave the connection in an unknown state.
    ///
    /// Server error replies are complete frames, so the socket stays usable.
    pub(crate) fn poisons_connection(&self) -> bool {
        matches!(self, ConnectionFault::Io(_) | ConnectionFault::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn connection_error_keeps_original_cause() {
        let err = CacheError::connection("node-a", ConnectionFault::Server("WRONGTYPE".into()));
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "server error: WRONGTYPE");
        assert!(err.to_string().contains("node-a"));
        assert!(!err.is_pool_exhausted());
    }

    #[test]
    fn cloned_io_fault_keeps_kind_and_message() {
        let err = CacheError::connection(
            "node-b",
            ConnectionFault::Io(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused")),
        );
        match err.clone() {
            CacheError::Connection { shard, source: ConnectionFault::Io(io) } => {
                assert_eq!(shard, "node-b");
                assert_eq!(io.kind(), std::io::ErrorKind::ConnectionRefused);
                assert_eq!(io.to_string(), "refused");
            }
            other => panic!("unexpected clone: {other}"),
        }
    }

    #[test]
    fn only_transport_faults_poison_connections() {
        assert!(ConnectionFault::Protocol("eof").poisons_connection());
        assert!(!ConnectionFault::Server("ERR".into()).poisons_connection());
        assert!(!ConnectionFault::UnexpectedResponse("integer").poisons_connection());
    }
}
