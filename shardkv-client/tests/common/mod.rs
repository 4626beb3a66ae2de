#![allow(dead_code)]

use std::time::Duration;

use shardkv_client::{ClientConfig, LockConfig, PoolConfig, ShardEndpoint, ShardedClient};
use shardkv_node::{spawn_background, NodeConfig, NodeHandle};

/// In-process nodes plus a client wired to all of them.
pub struct Cluster {
    pub client: ShardedClient,
    pub nodes: Vec<NodeHandle>,
}

pub fn start_node(password: Option<&str>) -> NodeHandle {
    spawn_background(NodeConfig {
        bind: "127.0.0.1:0".to_string(),
        password: password.map(str::to_string),
    })
    .expect("start node")
}

pub fn endpoint(node: &NodeHandle, name: &str) -> ShardEndpoint {
    ShardEndpoint::new("127.0.0.1", node.addr().port(), name).with_timeout(Duration::from_secs(2))
}

pub fn test_config(shards: Vec<ShardEndpoint>) -> ClientConfig {
    let mut config = ClientConfig::with_shards(shards);
    config.pool = PoolConfig {
        max_total: 8,
        max_idle: 4,
        max_wait_ms: 2_000,
        test_on_borrow: false,
    };
    config.lock = LockConfig {
        ttl_ms: 5_000,
        acquire_timeout_ms: 5_000,
        initial_backoff_ms: 2,
        max_backoff_ms: 20,
    };
    config
}

pub fn cluster(shards: usize) -> Cluster {
    cluster_with(shards, |_| {})
}

pub fn cluster_with(shards: usize, tweak: impl FnOnce(&mut ClientConfig)) -> Cluster {
    let nodes: Vec<NodeHandle> = (0..shards).map(|_| start_node(None)).collect();
    let endpoints = nodes
        .iter()
        .enumerate()
        .map(|(idx, node)| endpoint(node, &format!("shard-{}", idx)))
        .collect();
    let mut config = test_config(endpoints);
    tweak(&mut config);
    let client = ShardedClient::new(config).expect("client");
    Cluster { client, nodes }
}

/// Keys that land on at least two different shards.
pub fn spread_keys(client: &ShardedClient, prefix: &str, count: usize) -> Vec<String> {
    let keys: Vec<String> = (0..count).map(|idx| format!("{}:{}", prefix, idx)).collect();
    let first = client.shard_for(&keys[0]).name.clone();
    assert!(
        keys.iter().any(|key| client.shard_for(key).name != first),
        "keys should spread over several shards"
    );
    keys
}
