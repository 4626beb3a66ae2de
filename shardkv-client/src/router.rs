//! # Shard Router
//!
//! Purpose: Map keys deterministically to one of a fixed set of shards, and
//! split multi-key requests into per-shard groups.
//!
//! ## Design Principles
//! 1. **Ketama Ring**: Each shard owns `160 * weight` virtual nodes on a ring of
//!    MurmurHash64A values; a key belongs to the first node at or after its hash.
//! 2. **Name-Based Identity**: Virtual nodes are derived from the shard name, so
//!    reordering the endpoint list does not move keys.
//! 3. **Hash Tags**: Only the `{tag}` part of a key is hashed when present, which
//!    lets callers co-locate keys for transactions.
//! 4. **Read-Only After Build**: The ring is immutable; concurrent reads need no
//!    synchronization.
//!
//! ## Structure Overview
//!
//! ```text
//! ShardRouter
//!   ├── endpoints: Vec<ShardEndpoint>   (ShardId = index)
//!   └── ring: BTreeMap<i64, ShardId>    (virtual node hash -> shard)
//! ```

use std::collections::BTreeMap;

use crate::config::ShardEndpoint;
use crate::error::{CacheError, CacheResult};

/// Index of a shard in the routing table.
pub type ShardId = usize;

/// Virtual nodes per unit of weight.
const VIRTUAL_NODES_PER_WEIGHT: u32 = 160;

/// Seed used by the ring hash; shared by every process using the cluster.
const MURMUR_SEED: u64 = 0x1234_ABCD;

/// Keys routed to one shard, as indices into the caller's key slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardGroup {
    pub shard: ShardId,
    pub indices: Vec<usize>,
}

/// Static routing table from keys to shard endpoints.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    endpoints: Vec<ShardEndpoint>,
    ring: BTreeMap<i64, ShardId>,
}

impl ShardRouter {
    /// Builds the ring for a fixed endpoint list.
    pub fn new(endpoints: Vec<ShardEndpoint>) -> CacheResult<Self> {
        if endpoints.is_empty() {
            return Err(CacheError::Config("router needs at least one shard".into()));
        }

        let mut ring = BTreeMap::new();
        for (idx, endpoint) in endpoints.iter().enumerate() {
            let nodes = VIRTUAL_NODES_PER_WEIGHT * endpoint.weight.max(1);
            for n in 0..nodes {
                let label = if endpoint.name.is_empty() {
                    format!("SHARD-{}-NODE-{}", idx, n)
                } else {
                    format!("{}*{}{}", endpoint.name, endpoint.weight, n)
                };
                ring.insert(murmur_hash64a(label.as_bytes(), MURMUR_SEED), idx);
            }
        }

        Ok(ShardRouter { endpoints, ring })
    }

    /// Returns the shard that owns `key`.
    pub fn route(&self, key: &str) -> ShardId {
        self.route_bytes(key.as_bytes())
    }

    pub fn route_bytes(&self, key: &[u8]) -> ShardId {
        let hash = murmur_hash64a(hash_tag(key), MURMUR_SEED);
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, &shard)| shard)
            // The ring is never empty: `new` rejects an empty endpoint list.
            .unwrap_or(0)
    }

    /// Returns the endpoint that owns `key`.
    pub fn endpoint_for(&self, key: &str) -> &ShardEndpoint {
        &self.endpoints[self.route(key)]
    }

    pub fn endpoint(&self, shard: ShardId) -> &ShardEndpoint {
        &self.endpoints[shard]
    }

    pub fn endpoints(&self) -> &[ShardEndpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Decomposes a key set into per-shard groups.
    ///
    /// Groups appear in order of each shard's first key; indices within a group
    /// keep the caller's order, so results can be merged back positionally.
    pub fn group_by_shard<K: AsRef<str>>(&self, keys: &[K]) -> Vec<ShardGroup> {
        let mut slot_of_shard: Vec<Option<usize>> = vec![None; self.endpoints.len()];
        let mut groups: Vec<ShardGroup> = Vec::new();
        for (idx, key) in keys.iter().enumerate() {
            let shard = self.route(key.as_ref());
            match slot_of_shard[shard] {
                Some(slot) => groups[slot].indices.push(idx),
                None => {
                    slot_of_shard[shard] = Some(groups.len());
                    groups.push(ShardGroup {
                        shard,
                        indices: vec![idx],
                    });
                }
            }
        }
        groups
    }
}

/// Returns the part of the key used for routing.
///
/// `"{user:1}:profile"` hashes as `"user:1"`; keys without a non-empty tag hash
/// whole.
pub fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        let tag_start = open + 1;
        if tag_start < key.len() {
            if let Some(len) = key[tag_start + 1..].iter().position(|&b| b == b'}') {
                return &key[tag_start..tag_start + 1 + len];
            }
        }
    }
    key
}

/// MurmurHash64A over little-endian 8-byte blocks, returned as a signed value so
/// ring order matches other clients of the same cluster.
pub fn murmur_hash64a(data: &[u8], seed: u64) -> i64 {
    const M: u64 = 0xc6a4_a793_5bd1_e995;
    const R: u32 = 47;

    let mut h = seed ^ (data.len() as u64).wrapping_mul(M);

    let mut chunks = data.chunks_exact(8);
    for chunk in &mut chunks {
        let mut block = [0u8; 8];
        block.copy_from_slice(chunk);
        let mut k = u64::from_le_bytes(block);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h ^= k;
        h = h.wrapping_mul(M);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut block = [0u8; 8];
        block[..tail.len()].copy_from_slice(tail);
        h ^= u64::from_le_bytes(block);
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(names: &[&str]) -> Vec<ShardEndpoint> {
        names
            .iter()
            .enumerate()
            .map(|(idx, name)| ShardEndpoint::new("127.0.0.1", 7000 + idx as u16, *name))
            .collect()
    }

    #[test]
    fn murmur_matches_reference_values() {
        assert_eq!(murmur_hash64a(b"", MURMUR_SEED), 8371356515094919947);
        assert_eq!(murmur_hash64a(b"foo", MURMUR_SEED), -7063922479176959649);
        assert_eq!(murmur_hash64a(b"hello world", MURMUR_SEED), -7467008419718616472);
        assert_eq!(murmur_hash64a(b"user:12345678", MURMUR_SEED), -4384225781963862169);
    }

    #[test]
    fn routing_is_deterministic() {
        let router = ShardRouter::new(endpoints(&["a", "b", "c"])).unwrap();
        for i in 0..500 {
            let key = format!("key:{}", i);
            let first = router.route(&key);
            for _ in 0..3 {
                assert_eq!(router.route(&key), first);
            }
        }
    }

    #[test]
    fn single_shard_takes_every_key() {
        let router = ShardRouter::new(endpoints(&["only"])).unwrap();
        for i in 0..100 {
            assert_eq!(router.route(&format!("k{}", i)), 0);
        }
        assert_eq!(router.endpoint_for("anything").name, "only");
    }

    #[test]
    fn keys_spread_over_all_shards() {
        let router = ShardRouter::new(endpoints(&["a", "b", "c"])).unwrap();
        let mut counts = [0usize; 3];
        for i in 0..3_000 {
            counts[router.route(&format!("user:{}", i))] += 1;
        }
        for count in counts {
            assert!(count > 500, "unbalanced ring: {:?}", counts);
        }
    }

    #[test]
    fn reordering_endpoints_keeps_ownership() {
        let forward = ShardRouter::new(endpoints(&["a", "b"])).unwrap();
        let reversed = ShardRouter::new(endpoints(&["b", "a"])).unwrap();
        for i in 0..200 {
            let key = format!("order:{}", i);
            assert_eq!(forward.endpoint_for(&key).name, reversed.endpoint_for(&key).name);
        }
    }

    #[test]
    fn hash_tags_co_locate_keys() {
        assert_eq!(hash_tag(b"{user:1}:profile"), b"user:1");
        assert_eq!(hash_tag(b"plain"), b"plain");
        assert_eq!(hash_tag(b"empty{}tag"), b"empty{}tag");
        assert_eq!(hash_tag(b"open{only"), b"open{only");

        let router = ShardRouter::new(endpoints(&["a", "b", "c", "d"])).unwrap();
        for i in 0..50 {
            let tag = format!("{{t{}}}", i);
            let shard = router.route(&format!("{}:x", tag));
            assert_eq!(router.route(&format!("{}:y", tag)), shard);
        }
    }

    #[test]
    fn groups_keep_caller_order() {
        let router = ShardRouter::new(endpoints(&["a", "b"])).unwrap();
        let keys: Vec<String> = (0..40).map(|i| format!("k{}", i)).collect();
        let groups = router.group_by_shard(&keys);

        let mut seen: Vec<usize> = groups.iter().flat_map(|g| g.indices.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..40).collect::<Vec<_>>());
        for group in &groups {
            assert!(group.indices.windows(2).all(|w| w[0] < w[1]));
            for &idx in &group.indices {
                assert_eq!(router.route(&keys[idx]), group.shard);
            }
        }
    }

    #[test]
    fn empty_table_is_rejected() {
        assert!(ShardRouter::new(Vec::new()).is_err());
    }
}
