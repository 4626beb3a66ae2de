//! # shardkv Node
//!
//! Purpose: A small in-memory, Redis-compatible cache node that speaks RESP2.
//! It backs the client's integration tests and doubles as a local development
//! server; it keeps no data on disk.
//!
//! ## Design Principles
//! 1. **Command Subset**: Implement exactly the commands the sharded client
//!    issues, with Redis reply shapes and error strings.
//! 2. **Async Accept Loop**: One tokio task per connection; the keyspace lock
//!    is never held across an await.
//! 3. **Embeddable**: `spawn_background` runs a node on its own runtime thread
//!    so blocking tests can talk to it.

pub mod engine;
pub mod protocol;
pub mod pubsub;
pub mod server;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;
use tracing::error;

pub use server::{serve, Node, NodeConfig};

/// A node running on a background thread. Dropping it stops the node.
pub struct NodeHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl NodeHandle {
    /// Address the node is actually bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting, drops every connection, and joins the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Binds `config.bind` and serves it from a dedicated runtime thread.
///
/// The listener is bound before this returns, so clients may connect as soon
/// as they have the handle.
pub fn spawn_background(config: NodeConfig) -> io::Result<NodeHandle> {
    let listener = std::net::TcpListener::bind(&config.bind)?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("shardkv-node")
        .enable_all()
        .build()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let node = Arc::new(Node::new(config.password));

    let join = thread::Builder::new()
        .name(format!("shardkv-node-{}", addr.port()))
        .spawn(move || {
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => listener,
                    Err(err) => {
                        error!(error = %err, "failed to register listener");
                        return;
                    }
                };
                let shutdown = async {
                    let _ = shutdown_rx.await;
                };
                if let Err(err) = serve(listener, node, shutdown).await {
                    error!(error = %err, "node stopped");
                }
            });
            // Dropping the runtime cancels every connection task.
            drop(runtime);
        })?;

    Ok(NodeHandle {
        addr,
        shutdown: Some(shutdown_tx),
        join: Some(join),
    })
}
