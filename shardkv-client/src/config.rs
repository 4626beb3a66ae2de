//! # Client Configuration
//!
//! Purpose: Describe the shard list, pool limits, and lock tuning in one
//! serde-friendly structure that can be loaded from JSON.
//!
//! ## Design Principles
//! 1. **Defaults First**: Every field has a sensible default so partial files work.
//! 2. **Validate Once**: `validate` runs before any pool is built.
//! 3. **Immutable Endpoints**: `ShardEndpoint` never changes after construction.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Pool limits shared by every shard pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum total connections (idle + in-use) per shard.
    pub max_total: usize,
    /// Maximum number of idle connections kept per shard.
    pub max_idle: usize,
    /// How long `acquire` blocks when the pool is exhausted.
    pub max_wait_ms: u64,
    /// Validate idle connections with PING before handing them out.
    pub test_on_borrow: bool,
}

impl PoolConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_total: 16,
            max_idle: 8,
            max_wait_ms: 1_000,
            test_on_borrow: false,
        }
    }
}

/// One backing cache node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEndpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Ring identity; keeps routing stable if the list is reordered.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Connect, read, and write timeout for this node.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Relative share of the key space.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl ShardEndpoint {
    /// Creates an endpoint with default timeout and weight.
    pub fn new(host: impl Into<String>, port: u16, name: impl Into<String>) -> Self {
        ShardEndpoint {
            host: host.into(),
            port,
            name: name.into(),
            password: None,
            timeout_ms: default_timeout_ms(),
            weight: default_weight(),
        }
    }

    /// Parses a "host:port" address, naming the shard after it.
    pub fn from_addr(addr: &str) -> CacheResult<Self> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| CacheError::Config(format!("address `{}` has no port", addr)))?;
        let port = port
            .parse()
            .map_err(|_| CacheError::Config(format!("address `{}` has an invalid port", addr)))?;
        Ok(ShardEndpoint::new(host, port, addr))
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Socket address string, e.g. "127.0.0.1:6379".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Name used in logs and errors; falls back to the address.
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            self.address()
        } else {
            self.name.clone()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms))
        }
    }
}

fn default_port() -> u16 {
    6379
}

fn default_timeout_ms() -> u64 {
    2_000
}

fn default_weight() -> u32 {
    1
}

/// Distributed lock tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Expiry of the lock key; the safety net against crashed holders.
    pub ttl_ms: u64,
    /// Default deadline for `acquire`.
    pub acquire_timeout_ms: u64,
    /// First backoff between attempts.
    pub initial_backoff_ms: u64,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            ttl_ms: 30_000,
            acquire_timeout_ms: 10_000,
            initial_backoff_ms: 10,
            max_backoff_ms: 500,
        }
    }
}

/// Top-level configuration for `ShardedClient`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub pool: PoolConfig,
    pub shards: Vec<ShardEndpoint>,
    pub lock: LockConfig,
}

impl ClientConfig {
    /// Creates a configuration with default pool and lock settings.
    pub fn with_shards(shards: Vec<ShardEndpoint>) -> Self {
        ClientConfig {
            shards,
            ..ClientConfig::default()
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(raw: &str) -> CacheResult<Self> {
        let config: ClientConfig =
            serde_json::from_str(raw).map_err(|err| CacheError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|err| CacheError::Config(format!("{}: {}", path.display(), err)))?;
        Self::from_json_str(&raw)
    }

    /// Checks the invariants the pools and router rely on.
    pub fn validate(&self) -> CacheResult<()> {
        if self.shards.is_empty() {
            return Err(CacheError::Config("at least one shard is required".into()));
        }
        if self.pool.max_total == 0 {
            return Err(CacheError::Config("pool.max_total must be at least 1".into()));
        }
        if self.pool.max_idle > self.pool.max_total {
            return Err(CacheError::Config(
                "pool.max_idle cannot exceed pool.max_total".into(),
            ));
        }
        let mut names = HashSet::with_capacity(self.shards.len());
        for shard in &self.shards {
            if shard.weight == 0 {
                return Err(CacheError::Config(format!(
                    "shard `{}` has zero weight",
                    shard.label()
                )));
            }
            if !shard.name.is_empty() && !names.insert(shard.name.as_str()) {
                return Err(CacheError::Config(format!(
                    "duplicate shard name `{}`",
                    shard.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_json_with_defaults() {
        let config = ClientConfig::from_json_str(
            r#"{
                "pool": { "max_total": 4, "max_idle": 2, "test_on_borrow": true },
                "shards": [
                    { "host": "10.0.0.1", "name": "a" },
                    { "host": "10.0.0.2", "port": 7000, "name": "b", "password": "pw" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.pool.max_total, 4);
        assert_eq!(config.pool.max_wait(), Duration::from_secs(1));
        assert!(config.pool.test_on_borrow);
        assert_eq!(config.shards[0].address(), "10.0.0.1:6379");
        assert_eq!(config.shards[1].password.as_deref(), Some("pw"));
        assert_eq!(config.shards[1].weight, 1);
        assert_eq!(config.lock, LockConfig::default());
    }

    #[test]
    fn rejects_empty_shard_list() {
        let err = ClientConfig::from_json_str(r#"{ "shards": [] }"#).unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn rejects_duplicate_names_and_bad_idle_limit() {
        let mut config = ClientConfig::with_shards(vec![
            ShardEndpoint::new("h1", 1, "same"),
            ShardEndpoint::new("h2", 2, "same"),
        ]);
        assert!(config.validate().is_err());

        config.shards.pop();
        config.pool.max_idle = config.pool.max_total + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn endpoint_from_addr() {
        let endpoint = ShardEndpoint::from_addr("127.0.0.1:6380").unwrap();
        assert_eq!(endpoint.port, 6380);
        assert_eq!(endpoint.label(), "127.0.0.1:6380");
        assert!(ShardEndpoint::from_addr("nope").is_err());
    }
}
