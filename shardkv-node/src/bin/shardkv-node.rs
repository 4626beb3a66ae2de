//! # shardkv Node Binary
//!
//! Purpose: Run one in-memory node for local development.
//!
//! Usage: `shardkv-node [--bind ADDR] [--requirepass PASSWORD]`

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use shardkv_node::{serve, Node, NodeConfig};

fn parse_args() -> Result<NodeConfig> {
    let mut config = NodeConfig::default();
    let mut args = env::args().skip(1);
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--bind" => config.bind = args.next().context("--bind needs an address")?,
            "--requirepass" => {
                config.password = Some(args.next().context("--requirepass needs a value")?)
            }
            "-h" | "--help" => {
                println!("usage: shardkv-node [--bind ADDR] [--requirepass PASSWORD]");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {}", other),
        }
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = parse_args()?;
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let node = Arc::new(Node::new(config.password));

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    serve(listener, node, shutdown).await?;
    Ok(())
}
