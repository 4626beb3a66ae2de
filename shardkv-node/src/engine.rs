//! # In-Memory Keyspace
//!
//! Typed values (strings, hashes, lists, sets, sorted sets) with TTL checked
//! on access and a write version per key for optimistic transactions.
//!
//! ## Design Principles
//!
//! 1. **Single Lock**: One mutex guards the whole keyspace so a MULTI/EXEC batch
//!    runs without interleaving.
//! 2. **TTL Fast Path**: Expiration is checked on access; an expired key is
//!    removed the first time anything looks at it.
//! 3. **Write Versions**: Every mutation (expiry included) stamps the key with a
//!    fresh version; WATCH compares versions at EXEC time.
//! 4. **No Empty Containers**: A hash, list, set or sorted set that becomes
//!    empty is removed, so EXISTS and TYPE behave like a Redis node.
//!
//! ## Structure Overview
//!
//! ```text
//! Keyspace
//!   └── db: Mutex<Db>
//!         ├── entries: HashMap<key, Entry { value, expires_at }>
//!         └── versions: HashMap<key, u64>
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

/// Errors a command can hit while touching the keyspace.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("ERR value is not an integer or out of range")]
    NotInteger,
    #[error("ERR increment or decrement would overflow")]
    Overflow,
}

pub type EngineResult<T> = Result<T, EngineError>;

/// TTL state for a key, mirroring Redis semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    Missing,
    NoExpiry,
    ExpiresIn(Duration),
}

/// A stored value.
#[derive(Debug, Clone)]
pub enum Value {
    Str(Vec<u8>),
    Hash(HashMap<Vec<u8>, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
    Set(HashSet<Vec<u8>>),
    ZSet(HashMap<Vec<u8>, f64>),
}

impl Value {
    fn is_empty_container(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::Hash(map) => map.is_empty(),
            Value::List(list) => list.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::ZSet(zset) => zset.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |deadline| deadline <= now)
    }
}

/// One end of a score range; `exclusive` comes from a `(` prefix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBound {
    pub value: f64,
    pub exclusive: bool,
}

impl ScoreBound {
    pub fn inclusive(value: f64) -> Self {
        ScoreBound {
            value,
            exclusive: false,
        }
    }

    fn above_min(&self, score: f64) -> bool {
        if self.exclusive {
            score > self.value
        } else {
            score >= self.value
        }
    }

    fn below_max(&self, score: f64) -> bool {
        if self.exclusive {
            score < self.value
        } else {
            score <= self.value
        }
    }
}

/// Shared keyspace handle.
#[derive(Default)]
pub struct Keyspace {
    db: Mutex<Db>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the keyspace; hold the guard for every command of a transaction.
    pub fn lock(&self) -> MutexGuard<'_, Db> {
        self.db.lock()
    }
}

/// Keyspace contents. Obtain through `Keyspace::lock`.
#[derive(Default)]
pub struct Db {
    entries: HashMap<Vec<u8>, Entry>,
    versions: HashMap<Vec<u8>, u64>,
    next_version: u64,
}

/// Deadline `ttl` from now; a TTL past the clock's range never expires.
fn expiry_after(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

/// Resolves Redis-style `start`/`stop` indexes against `len`.
///
/// Returns `None` for an empty range.
fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

impl Db {
    /// Current write version of `key` (0 if it was never written).
    pub fn version(&mut self, key: &[u8]) -> u64 {
        self.purge_if_expired(key);
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: &[u8]) {
        self.next_version += 1;
        self.versions.insert(key.to_vec(), self.next_version);
    }

    fn purge_if_expired(&mut self, key: &[u8]) {
        let now = Instant::now();
        let expired = self
            .entries
            .get(key)
            .map_or(false, |entry| entry.is_expired(now));
        if expired {
            self.entries.remove(key);
            self.bump(key);
        }
    }

    fn live(&mut self, key: &[u8]) -> Option<&mut Entry> {
        self.purge_if_expired(key);
        self.entries.get_mut(key)
    }

    /// Returns the entry for `key`, creating it with `init` when absent.
    fn live_or_insert(&mut self, key: &[u8], init: fn() -> Value) -> &mut Entry {
        self.purge_if_expired(key);
        self.entries.entry(key.to_vec()).or_insert_with(|| Entry {
            value: init(),
            expires_at: None,
        })
    }

    /// Stamps a write and drops the key if its container became empty.
    fn after_write(&mut self, key: &[u8]) {
        let empty = self
            .entries
            .get(key)
            .map_or(false, |entry| entry.value.is_empty_container());
        if empty {
            self.entries.remove(key);
        }
        self.bump(key);
    }

    // ---- keys ----

    pub fn exists(&mut self, key: &[u8]) -> bool {
        self.live(key).is_some()
    }

    pub fn del(&mut self, key: &[u8]) -> bool {
        self.purge_if_expired(key);
        if self.entries.remove(key).is_some() {
            self.bump(key);
            true
        } else {
            false
        }
    }

    /// Sets a TTL on an existing key. A zero TTL deletes the key.
    pub fn expire(&mut self, key: &[u8], ttl: Duration) -> bool {
        if ttl.is_zero() {
            return self.del(key);
        }
        match self.live(key) {
            Some(entry) => {
                entry.expires_at = expiry_after(ttl);
                self.bump(key);
                true
            }
            None => false,
        }
    }

    pub fn ttl(&mut self, key: &[u8]) -> TtlStatus {
        let now = Instant::now();
        match self.live(key) {
            None => TtlStatus::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => TtlStatus::NoExpiry,
            Some(Entry {
                expires_at: Some(deadline),
                ..
            }) => TtlStatus::ExpiresIn(deadline.saturating_duration_since(now)),
        }
    }

    /// Live keys matching a glob pattern (`*`, `?`, `[...]`, `\` escapes).
    pub fn keys(&mut self, pattern: &[u8]) -> Vec<Vec<u8>> {
        let now = Instant::now();
        let expired: Vec<Vec<u8>> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.remove(key.as_slice());
            self.bump(key);
        }
        self.entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect()
    }

    // ---- strings ----

    pub fn get(&mut self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(data),
                ..
            }) => Ok(Some(data.clone())),
            Some(_) => Err(EngineError::WrongType),
        }
    }

    /// Replaces any value and TTL at `key`.
    pub fn set(&mut self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_vec(),
            Entry {
                value: Value::Str(value),
                expires_at: ttl.and_then(expiry_after),
            },
        );
        self.bump(key);
    }

    /// Sets only when the key is absent; returns whether it was set.
    pub fn set_nx(&mut self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) -> bool {
        if self.exists(key) {
            return false;
        }
        self.set(key, value, ttl);
        true
    }

    pub fn get_set(&mut self, key: &[u8], value: Vec<u8>) -> EngineResult<Option<Vec<u8>>> {
        let previous = self.get(key)?;
        self.set(key, value, None);
        Ok(previous)
    }

    /// Adds one to an integer string, creating it at 0. Keeps the TTL.
    pub fn incr(&mut self, key: &[u8]) -> EngineResult<i64> {
        let entry = self.live_or_insert(key, || Value::Str(b"0".to_vec()));
        let next = match &mut entry.value {
            Value::Str(data) => {
                let current: i64 = std::str::from_utf8(data)
                    .ok()
                    .and_then(|text| text.parse().ok())
                    .ok_or(EngineError::NotInteger)?;
                let next = current.checked_add(1).ok_or(EngineError::Overflow)?;
                *data = next.to_string().into_bytes();
                next
            }
            _ => return Err(EngineError::WrongType),
        };
        self.bump(key);
        Ok(next)
    }

    // ---- hashes ----

    fn hash(&mut self, key: &[u8]) -> EngineResult<Option<&mut HashMap<Vec<u8>, Vec<u8>>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => Ok(Some(map)),
            Some(_) => Err(EngineError::WrongType),
        }
    }

    fn hash_or_insert(&mut self, key: &[u8]) -> EngineResult<&mut HashMap<Vec<u8>, Vec<u8>>> {
        match &mut self.live_or_insert(key, || Value::Hash(HashMap::new())).value {
            Value::Hash(map) => Ok(map),
            _ => Err(EngineError::WrongType),
        }
    }

    /// Sets fields; returns how many were new.
    pub fn hset(&mut self, key: &[u8], pairs: &[(Vec<u8>, Vec<u8>)]) -> EngineResult<i64> {
        let map = self.hash_or_insert(key)?;
        let mut added = 0;
        for (field, value) in pairs {
            if map.insert(field.clone(), value.clone()).is_none() {
                added += 1;
            }
        }
        self.after_write(key);
        Ok(added)
    }

    pub fn hget(&mut self, key: &[u8], field: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.hash(key)?.and_then(|map| map.get(field).cloned()))
    }

    pub fn hmget(&mut self, key: &[u8], fields: &[Vec<u8>]) -> EngineResult<Vec<Option<Vec<u8>>>> {
        let map = self.hash(key)?;
        Ok(fields
            .iter()
            .map(|field| map.as_ref().and_then(|map| map.get(field).cloned()))
            .collect())
    }

    pub fn hgetall(&mut self, key: &[u8]) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .hash(key)?
            .map(|map| map.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    pub fn hdel(&mut self, key: &[u8], fields: &[Vec<u8>]) -> EngineResult<i64> {
        let Some(map) = self.hash(key)? else {
            return Ok(0);
        };
        let removed = fields.iter().filter(|field| map.remove(*field).is_some()).count() as i64;
        if removed > 0 {
            self.after_write(key);
        }
        Ok(removed)
    }

    pub fn hlen(&mut self, key: &[u8]) -> EngineResult<i64> {
        Ok(self.hash(key)?.map_or(0, |map| map.len() as i64))
    }

    // ---- lists ----

    fn list(&mut self, key: &[u8]) -> EngineResult<Option<&mut VecDeque<Vec<u8>>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(Some(list)),
            Some(_) => Err(EngineError::WrongType),
        }
    }

    /// Pushes values one by one at the tail (or head); returns the new length.
    pub fn push(&mut self, key: &[u8], values: &[Vec<u8>], head: bool) -> EngineResult<i64> {
        let list = match &mut self.live_or_insert(key, || Value::List(VecDeque::new())).value {
            Value::List(list) => list,
            _ => return Err(EngineError::WrongType),
        };
        for value in values {
            if head {
                list.push_front(value.clone());
            } else {
                list.push_back(value.clone());
            }
        }
        let len = list.len() as i64;
        self.after_write(key);
        Ok(len)
    }

    pub fn pop(&mut self, key: &[u8], head: bool) -> EngineResult<Option<Vec<u8>>> {
        let Some(list) = self.list(key)? else {
            return Ok(None);
        };
        let popped = if head { list.pop_front() } else { list.pop_back() };
        if popped.is_some() {
            self.after_write(key);
        }
        Ok(popped)
    }

    /// Keeps only elements in `[start, stop]`.
    pub fn ltrim(&mut self, key: &[u8], start: i64, stop: i64) -> EngineResult<()> {
        let Some(list) = self.list(key)? else {
            return Ok(());
        };
        match normalize_range(start, stop, list.len()) {
            Some((start, stop)) => {
                list.truncate(stop + 1);
                list.drain(..start);
            }
            None => list.clear(),
        }
        self.after_write(key);
        Ok(())
    }

    pub fn lrange(&mut self, key: &[u8], start: i64, stop: i64) -> EngineResult<Vec<Vec<u8>>> {
        let Some(list) = self.list(key)? else {
            return Ok(Vec::new());
        };
        Ok(match normalize_range(start, stop, list.len()) {
            Some((start, stop)) => list.range(start..=stop).cloned().collect(),
            None => Vec::new(),
        })
    }

    /// Removes up to `|count|` matches; from the head when positive, from the
    /// tail when negative, all of them when zero.
    pub fn lrem(&mut self, key: &[u8], count: i64, value: &[u8]) -> EngineResult<i64> {
        let Some(list) = self.list(key)? else {
            return Ok(0);
        };
        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
        let mut removed = 0;
        if count >= 0 {
            let mut idx = 0;
            while idx < list.len() && removed < limit {
                if list[idx] == value {
                    list.remove(idx);
                    removed += 1;
                } else {
                    idx += 1;
                }
            }
        } else {
            let mut idx = list.len();
            while idx > 0 && removed < limit {
                idx -= 1;
                if list[idx] == value {
                    list.remove(idx);
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            self.after_write(key);
        }
        Ok(removed as i64)
    }

    pub fn llen(&mut self, key: &[u8]) -> EngineResult<i64> {
        Ok(self.list(key)?.map_or(0, |list| list.len() as i64))
    }

    // ---- sets ----

    pub fn sadd(&mut self, key: &[u8], members: &[Vec<u8>]) -> EngineResult<i64> {
        let set = match &mut self.live_or_insert(key, || Value::Set(HashSet::new())).value {
            Value::Set(set) => set,
            _ => return Err(EngineError::WrongType),
        };
        let added = members.iter().filter(|member| set.insert((*member).clone())).count() as i64;
        self.after_write(key);
        Ok(added)
    }

    pub fn sismember(&mut self, key: &[u8], member: &[u8]) -> EngineResult<bool> {
        match self.live(key) {
            None => Ok(false),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.contains(member)),
            Some(_) => Err(EngineError::WrongType),
        }
    }

    // ---- sorted sets ----

    fn zset(&mut self, key: &[u8]) -> EngineResult<Option<&mut HashMap<Vec<u8>, f64>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => Ok(Some(zset)),
            Some(_) => Err(EngineError::WrongType),
        }
    }

    /// Adds or rescores members; returns how many were new.
    pub fn zadd(&mut self, key: &[u8], members: &[(f64, Vec<u8>)]) -> EngineResult<i64> {
        let zset = match &mut self.live_or_insert(key, || Value::ZSet(HashMap::new())).value {
            Value::ZSet(zset) => zset,
            _ => return Err(EngineError::WrongType),
        };
        let added = members
            .iter()
            .filter(|(score, member)| zset.insert(member.clone(), *score).is_none())
            .count() as i64;
        self.after_write(key);
        Ok(added)
    }

    pub fn zrem(&mut self, key: &[u8], members: &[Vec<u8>]) -> EngineResult<i64> {
        let Some(zset) = self.zset(key)? else {
            return Ok(0);
        };
        let removed = members.iter().filter(|member| zset.remove(*member).is_some()).count() as i64;
        if removed > 0 {
            self.after_write(key);
        }
        Ok(removed)
    }

    pub fn zremrangebyscore(&mut self, key: &[u8], min: ScoreBound, max: ScoreBound) -> EngineResult<i64> {
        let Some(zset) = self.zset(key)? else {
            return Ok(0);
        };
        let before = zset.len();
        zset.retain(|_, score| !(min.above_min(*score) && max.below_max(*score)));
        let removed = (before - zset.len()) as i64;
        if removed > 0 {
            self.after_write(key);
        }
        Ok(removed)
    }

    /// Members scored within the bounds, highest score first; ties break by
    /// member in reverse byte order.
    pub fn zrevrangebyscore(&mut self, key: &[u8], max: ScoreBound, min: ScoreBound) -> EngineResult<Vec<Vec<u8>>> {
        let Some(zset) = self.zset(key)? else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<(f64, &Vec<u8>)> = zset
            .iter()
            .filter(|(_, score)| min.above_min(**score) && max.below_max(**score))
            .map(|(member, score)| (*score, member))
            .collect();
        hits.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.cmp(a.1)));
        Ok(hits.into_iter().map(|(_, member)| member.clone()).collect())
    }
}

/// Redis-style glob matching.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| glob_match(rest, &text[skip..])),
        Some((b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((b'[', rest)) => {
            let Some(close) = rest.iter().position(|&b| b == b']') else {
                return text.first() == Some(&b'[') && glob_match(rest, &text[1..]);
            };
            let Some((&ch, remaining)) = text.split_first() else {
                return false;
            };
            let (negate, class) = match rest[..close].split_first() {
                Some((b'^', class)) => (true, class),
                _ => (false, &rest[..close]),
            };
            let mut hit = false;
            let mut idx = 0;
            while idx < class.len() {
                if idx + 2 < class.len() && class[idx + 1] == b'-' {
                    hit |= class[idx] <= ch && ch <= class[idx + 2];
                    idx += 3;
                } else {
                    hit |= class[idx] == ch;
                    idx += 1;
                }
            }
            hit != negate && glob_match(&rest[close + 1..], remaining)
        }
        Some((b'\\', rest)) if !rest.is_empty() => {
            text.first() == Some(&rest[0]) && glob_match(&rest[1..], &text[1..])
        }
        Some((&expected, rest)) => text.first() == Some(&expected) && glob_match(rest, &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn v(text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    #[test]
    fn set_get_and_type_errors() {
        let keyspace = Keyspace::new();
        let mut db = keyspace.lock();
        db.set(b"s", v("1"), None);
        assert_eq!(db.get(b"s").unwrap(), Some(v("1")));
        db.push(b"l", &[v("a")], false).unwrap();
        assert_eq!(db.get(b"l"), Err(EngineError::WrongType));
        assert_eq!(db.hset(b"s", &[(v("f"), v("x"))]), Err(EngineError::WrongType));
    }

    #[test]
    fn ttl_expires_on_access() {
        let keyspace = Keyspace::new();
        let mut db = keyspace.lock();
        db.set(b"k", v("v"), Some(Duration::from_millis(20)));
        assert!(matches!(db.ttl(b"k"), TtlStatus::ExpiresIn(_)));
        thread::sleep(Duration::from_millis(40));
        assert_eq!(db.get(b"k").unwrap(), None);
        assert_eq!(db.ttl(b"k"), TtlStatus::Missing);
    }

    #[test]
    fn incr_keeps_ttl_and_detects_overflow() {
        let keyspace = Keyspace::new();
        let mut db = keyspace.lock();
        assert_eq!(db.incr(b"c").unwrap(), 1);
        db.expire(b"c", Duration::from_secs(60));
        assert_eq!(db.incr(b"c").unwrap(), 2);
        assert!(matches!(db.ttl(b"c"), TtlStatus::ExpiresIn(_)));

        db.set(b"max", i64::MAX.to_string().into_bytes(), None);
        assert_eq!(db.incr(b"max"), Err(EngineError::Overflow));
        db.set(b"text", v("abc"), None);
        assert_eq!(db.incr(b"text"), Err(EngineError::NotInteger));
    }

    #[test]
    fn versions_change_on_every_write() {
        let keyspace = Keyspace::new();
        let mut db = keyspace.lock();
        let initial = db.version(b"k");
        db.set(b"k", v("1"), None);
        let after_set = db.version(b"k");
        assert_ne!(initial, after_set);
        db.get(b"k").unwrap();
        assert_eq!(db.version(b"k"), after_set);
        db.del(b"k");
        assert_ne!(db.version(b"k"), after_set);
    }

    #[test]
    fn list_ranges_follow_redis_indexes() {
        let keyspace = Keyspace::new();
        let mut db = keyspace.lock();
        db.push(b"l", &[v("a"), v("b"), v("c"), v("d")], false).unwrap();
        assert_eq!(db.lrange(b"l", 0, -1).unwrap().len(), 4);
        assert_eq!(db.lrange(b"l", 1, 2).unwrap(), vec![v("b"), v("c")]);
        assert_eq!(db.lrange(b"l", -2, 100).unwrap(), vec![v("c"), v("d")]);
        assert!(db.lrange(b"l", 3, 1).unwrap().is_empty());

        db.ltrim(b"l", 0, 1).unwrap();
        assert_eq!(db.lrange(b"l", 0, -1).unwrap(), vec![v("a"), v("b")]);
        db.ltrim(b"l", 5, 10).unwrap();
        assert!(!db.exists(b"l"));
    }

    #[test]
    fn lrem_respects_direction() {
        let keyspace = Keyspace::new();
        let mut db = keyspace.lock();
        db.push(b"l", &[v("x"), v("a"), v("x"), v("x")], false).unwrap();
        assert_eq!(db.lrem(b"l", -1, b"x").unwrap(), 1);
        assert_eq!(db.lrange(b"l", 0, -1).unwrap(), vec![v("x"), v("a"), v("x")]);
        assert_eq!(db.lrem(b"l", 0, b"x").unwrap(), 2);
        assert_eq!(db.lrange(b"l", 0, -1).unwrap(), vec![v("a")]);
    }

    #[test]
    fn sorted_set_ranges() {
        let keyspace = Keyspace::new();
        let mut db = keyspace.lock();
        db.zadd(b"z", &[(1.0, v("a")), (2.0, v("b")), (3.0, v("c"))]).unwrap();
        let top = db
            .zrevrangebyscore(b"z", ScoreBound::inclusive(f64::INFINITY), ScoreBound::inclusive(2.0))
            .unwrap();
        assert_eq!(top, vec![v("c"), v("b")]);

        let exclusive = ScoreBound {
            value: 1.0,
            exclusive: true,
        };
        assert_eq!(db.zremrangebyscore(b"z", exclusive, ScoreBound::inclusive(2.0)).unwrap(), 1);
        assert_eq!(db.zrem(b"z", &[v("a"), v("missing")]).unwrap(), 1);
    }

    #[test]
    fn glob_patterns() {
        assert!(glob_match(b"user:*", b"user:1"));
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(glob_match(b"h[a-e]llo", b"hello"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"a\\*", b"a*"));
        assert!(!glob_match(b"user:*", b"session:1"));
    }

    #[test]
    fn empty_containers_are_removed() {
        let keyspace = Keyspace::new();
        let mut db = keyspace.lock();
        db.hset(b"h", &[(v("f"), v("1"))]).unwrap();
        assert_eq!(db.hdel(b"h", &[v("f")]).unwrap(), 1);
        assert!(!db.exists(b"h"));
        db.push(b"l", &[v("a")], true).unwrap();
        assert_eq!(db.pop(b"l", false).unwrap(), Some(v("a")));
        assert!(!db.exists(b"l"));
    }
}
