//! In-Memory Store Adapter
//!
//! Implements the `KvStore` port over a sharded in-process keyspace.
//!
//! # Design
//!
//! - DashMap keyspace: each single-key command runs under that key's shard
//!   lock, which gives the per-command atomicity the components rely on
//! - `zinterstore` is the only command touching several keys; it takes the
//!   keyspace-wide write guard so it cannot interleave with single-key writes
//! - Expiry is lazy: an expired key is purged by the next command that touches it
//! - Containers left empty by a removal are deleted, so `exists` and the
//!   cardinality commands behave like the real store

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::adapters::clock::SystemClock;
use crate::domain::ports::{Aggregate, Clock, KvStore};
use crate::error::{Error, Result};

// =============================================================================
// Values
// =============================================================================

/// Total-ordered score so it can key a `BTreeSet`.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == CmpOrdering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.total_cmp(&other.0)
    }
}

/// Ordered set: ascending by score, ties by member.
#[derive(Debug, Clone, Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    order: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn len(&self) -> usize {
        self.scores.len()
    }

    fn insert(&mut self, member: &str, score: f64) -> bool {
        let fresh = match self.scores.insert(member.to_string(), score) {
            Some(old) => {
                self.order.remove(&(Score(old), member.to_string()));
                false
            }
            None => true,
        };
        self.order.insert((Score(score), member.to_string()));
        fresh
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(old) => {
                self.order.remove(&(Score(old), member.to_string()));
                true
            }
            None => false,
        }
    }

    fn rank(&self, member: &str) -> Option<u64> {
        let score = *self.scores.get(member)?;
        let position = self
            .order
            .range(..(Score(score), member.to_string()))
            .count();
        Some(position as u64)
    }

    fn ascending(&self, start: usize, stop: usize) -> Vec<(String, f64)> {
        self.order
            .iter()
            .skip(start)
            .take(stop - start + 1)
            .map(|(score, member)| (member.clone(), score.0))
            .collect()
    }

    fn descending(&self, start: usize, stop: usize) -> Vec<String> {
        self.order
            .iter()
            .rev()
            .skip(start)
            .take(stop - start + 1)
            .map(|(_, member)| member.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    ZSet(SortedSet),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::Hash(map) => map.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::ZSet(zset) => zset.len() == 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    /// Epoch seconds after which the key no longer exists
    expires_at: Option<f64>,
}

impl Slot {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Resolve inclusive, possibly negative, rank bounds against a length.
fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start >= len || start > stop {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn wrong_type(key: &str) -> Error {
    Error::WrongType {
        key: key.to_string(),
    }
}

// =============================================================================
// Store
// =============================================================================

/// Store statistics
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Live keys (expired keys not yet purged are included)
    pub key_count: u64,
    /// Commands served
    pub commands: u64,
    /// Keys purged by expiry
    pub expired: u64,
}

/// In-process implementation of [`KvStore`].
pub struct InMemoryStore {
    keyspace: DashMap<String, Slot>,
    /// Shared by single-key commands, exclusive for multi-key commands
    multi_key: RwLock<()>,
    clock: Arc<dyn Clock>,
    commands: AtomicU64,
    expired: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemoryStore {
    /// Create a store that expires keys against the system clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that expires keys against the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            keyspace: DashMap::new(),
            multi_key: RwLock::new(()),
            clock,
            commands: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    /// Get store statistics
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            key_count: self.keyspace.len() as u64,
            commands: self.commands.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }

    /// Remaining time-to-live of a key, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.purge_if_expired(key);
        let now = self.clock.now();
        let slot = self.keyspace.get(key)?;
        slot.expires_at
            .map(|at| Duration::from_secs_f64((at - now).max(0.0)))
    }

    fn purge_if_expired(&self, key: &str) {
        let now = self.clock.now();
        if self
            .keyspace
            .remove_if(key, |_, slot| slot.is_expired(now))
            .is_some()
        {
            self.expired.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Run a read-only command against a live key.
    fn read<R>(&self, key: &str, f: impl FnOnce(&Value) -> Result<R>) -> Result<Option<R>> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        let _shared = self.multi_key.read();
        self.purge_if_expired(key);
        match self.keyspace.get(key) {
            Some(slot) => f(&slot.value).map(Some),
            None => Ok(None),
        }
    }

    /// Run a mutating command, creating the key with `init` if absent.
    fn write<R>(
        &self,
        key: &str,
        init: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Value) -> Result<R>,
    ) -> Result<R> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        let _shared = self.multi_key.read();
        self.purge_if_expired(key);

        let mut slot = self
            .keyspace
            .entry(key.to_string())
            .or_insert_with(|| Slot::new(init()));
        let out = f(&mut slot.value);
        let empty = slot.value.is_empty();
        drop(slot);

        if empty {
            self.keyspace.remove_if(key, |_, slot| slot.value.is_empty());
        }
        out
    }

    fn zset_source(&self, key: &str) -> Result<HashMap<String, f64>> {
        self.purge_if_expired(key);
        match self.keyspace.get(key) {
            None => Ok(HashMap::new()),
            Some(slot) => match &slot.value {
                Value::ZSet(zset) => Ok(zset.scores.clone()),
                Value::Set(set) => Ok(set.iter().map(|m| (m.clone(), 1.0)).collect()),
                _ => Err(wrong_type(key)),
            },
        }
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        self.write(
            key,
            || Value::Str("0".to_string()),
            |value| match value {
                Value::Str(raw) => {
                    let current: i64 = raw.parse().map_err(|_| Error::NotAnInteger {
                        key: key.to_string(),
                    })?;
                    let next = current.checked_add(1).ok_or_else(|| Error::NotAnInteger {
                        key: key.to_string(),
                    })?;
                    *raw = next.to_string();
                    Ok(next)
                }
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let found = self.read(key, |value| match value {
            Value::Str(raw) => Ok(raw.clone()),
            _ => Err(wrong_type(key)),
        })?;
        Ok(found)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        let _shared = self.multi_key.read();
        self.keyspace
            .insert(key.to_string(), Slot::new(Value::Str(value.to_string())));
        Ok(())
    }

    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        let _shared = self.multi_key.read();
        let slot = Slot {
            value: Value::Str(value.to_string()),
            expires_at: Some(self.clock.now() + ttl.as_secs_f64()),
        };
        self.keyspace.insert(key.to_string(), slot);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        let _shared = self.multi_key.read();
        let mut removed = 0;
        for key in keys {
            self.purge_if_expired(key);
            if self.keyspace.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read(key, |_| Ok(()))?.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        let _shared = self.multi_key.read();
        self.purge_if_expired(key);
        match self.keyspace.get_mut(key) {
            Some(mut slot) => {
                slot.expires_at = Some(self.clock.now() + ttl.as_secs_f64());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let found = self.read(key, |value| match value {
            Value::Hash(map) => Ok(map.get(field).cloned()),
            _ => Err(wrong_type(key)),
        })?;
        Ok(found.flatten())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        self.write(
            key,
            || Value::Hash(HashMap::new()),
            |slot| match slot {
                Value::Hash(map) => Ok(map.insert(field.to_string(), value.to_string()).is_none()),
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        self.write(
            key,
            || Value::Hash(HashMap::new()),
            |slot| match slot {
                Value::Hash(map) => {
                    for (field, value) in fields {
                        map.insert(field.clone(), value.clone());
                    }
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.write(
            key,
            || Value::Hash(HashMap::new()),
            |slot| match slot {
                Value::Hash(map) => {
                    let current: i64 = match map.get(field) {
                        Some(raw) => raw.parse().map_err(|_| Error::NotAnInteger {
                            key: format!("{}#{}", key, field),
                        })?,
                        None => 0,
                    };
                    let next = current + delta;
                    map.insert(field.to_string(), next.to_string());
                    Ok(next)
                }
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        let removed = self.read(key, |_| Ok(()))?;
        if removed.is_none() {
            return Ok(0);
        }
        self.write(
            key,
            || Value::Hash(HashMap::new()),
            |slot| match slot {
                Value::Hash(map) => Ok(fields
                    .iter()
                    .filter(|field| map.remove(field.as_str()).is_some())
                    .count() as u64),
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let found = self.read(key, |value| match value {
            Value::Hash(map) => Ok(map.clone()),
            _ => Err(wrong_type(key)),
        })?;
        Ok(found.unwrap_or_default())
    }

    async fn hlen(&self, key: &str) -> Result<u64> {
        let found = self.read(key, |value| match value {
            Value::Hash(map) => Ok(map.len() as u64),
            _ => Err(wrong_type(key)),
        })?;
        Ok(found.unwrap_or(0))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool> {
        self.write(
            key,
            || Value::ZSet(SortedSet::default()),
            |slot| match slot {
                Value::ZSet(zset) => Ok(zset.insert(member, score)),
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64> {
        self.write(
            key,
            || Value::ZSet(SortedSet::default()),
            |slot| match slot {
                Value::ZSet(zset) => {
                    let next = zset.scores.get(member).copied().unwrap_or(0.0) + delta;
                    zset.insert(member, next);
                    Ok(next)
                }
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<u64> {
        if self.read(key, |_| Ok(()))?.is_none() {
            return Ok(0);
        }
        self.write(
            key,
            || Value::ZSet(SortedSet::default()),
            |slot| match slot {
                Value::ZSet(zset) => Ok(members.iter().filter(|m| zset.remove(m)).count() as u64),
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let found = self.read(key, |value| match value {
            Value::ZSet(zset) => Ok(zset.len() as u64),
            _ => Err(wrong_type(key)),
        })?;
        Ok(found.unwrap_or(0))
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let found = self.read(key, |value| match value {
            Value::ZSet(zset) => Ok(zset.scores.get(member).copied()),
            _ => Err(wrong_type(key)),
        })?;
        Ok(found.flatten())
    }

    async fn zrank(&self, key: &str, member: &str) -> Result<Option<u64>> {
        let found = self.read(key, |value| match value {
            Value::ZSet(zset) => Ok(zset.rank(member)),
            _ => Err(wrong_type(key)),
        })?;
        Ok(found.flatten())
    }

    async fn zrange_withscores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>> {
        let found = self.read(key, |value| match value {
            Value::ZSet(zset) => Ok(normalize_range(zset.len(), start, stop)
                .map(|(from, to)| zset.ascending(from, to))
                .unwrap_or_default()),
            _ => Err(wrong_type(key)),
        })?;
        Ok(found.unwrap_or_default())
    }

    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let found = self.read(key, |value| match value {
            Value::ZSet(zset) => Ok(normalize_range(zset.len(), start, stop)
                .map(|(from, to)| zset.descending(from, to))
                .unwrap_or_default()),
            _ => Err(wrong_type(key)),
        })?;
        Ok(found.unwrap_or_default())
    }

    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<u64> {
        if self.read(key, |_| Ok(()))?.is_none() {
            return Ok(0);
        }
        self.write(
            key,
            || Value::ZSet(SortedSet::default()),
            |slot| match slot {
                Value::ZSet(zset) => {
                    let Some((from, to)) = normalize_range(zset.len(), start, stop) else {
                        return Ok(0);
                    };
                    let doomed = zset.ascending(from, to);
                    for (member, _) in &doomed {
                        zset.remove(member);
                    }
                    Ok(doomed.len() as u64)
                }
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn zinterstore(
        &self,
        dest: &str,
        sources: &[(String, f64)],
        aggregate: Aggregate,
    ) -> Result<u64> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        let _exclusive = self.multi_key.write();

        let mut inputs = Vec::with_capacity(sources.len());
        for (key, weight) in sources {
            inputs.push((self.zset_source(key)?, *weight));
        }

        let mut result = SortedSet::default();
        if let Some(((first, first_weight), rest)) = inputs.split_first() {
            'members: for (member, score) in first {
                let mut combined = score * first_weight;
                for (other, weight) in rest {
                    let Some(score) = other.get(member) else {
                        continue 'members;
                    };
                    let weighted = score * weight;
                    combined = match aggregate {
                        Aggregate::Sum => combined + weighted,
                        Aggregate::Min => combined.min(weighted),
                        Aggregate::Max => combined.max(weighted),
                    };
                }
                result.insert(member, combined);
            }
        }

        let cardinality = result.len() as u64;
        if cardinality == 0 {
            self.keyspace.remove(dest);
        } else {
            self.keyspace
                .insert(dest.to_string(), Slot::new(Value::ZSet(result)));
        }
        Ok(cardinality)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        self.write(
            key,
            || Value::Set(HashSet::new()),
            |slot| match slot {
                Value::Set(set) => Ok(set.insert(member.to_string())),
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        if self.read(key, |_| Ok(()))?.is_none() {
            return Ok(false);
        }
        self.write(
            key,
            || Value::Set(HashSet::new()),
            |slot| match slot {
                Value::Set(set) => Ok(set.remove(member)),
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let found = self.read(key, |value| match value {
            Value::Set(set) => Ok(set.contains(member)),
            _ => Err(wrong_type(key)),
        })?;
        Ok(found.unwrap_or(false))
    }
}

// =============================================================================
// Tests
// =============================================================================
