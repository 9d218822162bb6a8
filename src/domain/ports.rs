//! Domain Ports (Port/Adapter Pattern)
//!
//! This module defines the abstractions the components depend on.
//! Adapters implement these traits to provide concrete backends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Components                              │
//! │  Ranking │ Sessions │ Popularity │ PageCache │ RowCache      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Ports (Traits)                            │
//! │  KvStore │ Clock │ RowProvider │ RequestClassifier           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Adapters (Impls)                            │
//! │  InMemoryStore │ SystemClock │ ManualClock │ Inventory       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Article identifier allocated from the `article:` counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArticleId(pub u64);

impl ArticleId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Parse either a bare id (`"7"`) or an index member (`"article:7"`).
    pub fn parse(raw: &str) -> Option<Self> {
        let id = raw.rsplit(':').next().unwrap_or(raw);
        id.parse().ok().map(Self)
    }
}

impl std::fmt::Display for ArticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How `zinterstore` combines the scores of a member present in every source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregate {
    #[default]
    Sum,
    Min,
    Max,
}

/// Renderable record returned by a [`RowProvider`] and stored in `inv:<row_id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRecord {
    /// Row identifier
    pub id: String,
    /// Opaque row payload
    pub data: String,
    /// Epoch seconds at which the payload was rendered
    pub cached: f64,
}

// =============================================================================
// Store Port
// =============================================================================

/// Port over the shared key-value store.
///
/// Every method maps onto one atomic store command. Ordered sets sort by
/// ascending score, ties broken lexicographically by member. Range bounds are
/// inclusive and negative indexes count from the end (`-1` is the last
/// member). Plain sets read as ordered sets with score `1.0` in
/// [`KvStore::zinterstore`].
#[async_trait]
pub trait KvStore: Send + Sync {
    // ---- plain keys -------------------------------------------------------

    /// Atomically increment an integer key, creating it at zero.
    async fn incr(&self, key: &str) -> Result<i64>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Set a value together with a time-to-live.
    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete keys of any kind, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Attach a time-to-live to an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    // ---- hashes -----------------------------------------------------------

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Set one field. Returns true if the field was newly created.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool>;

    /// Set several fields in one call.
    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn hlen(&self, key: &str) -> Result<u64>;

    // ---- ordered sets -----------------------------------------------------

    /// Add or update a member. Returns true if the member was new.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool>;

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64>;

    async fn zrem(&self, key: &str, members: &[String]) -> Result<u64>;

    async fn zcard(&self, key: &str) -> Result<u64>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;

    /// Zero-based ascending rank of a member.
    async fn zrank(&self, key: &str, member: &str) -> Result<Option<u64>>;

    /// Members with scores between two ascending ranks.
    async fn zrange_withscores(&self, key: &str, start: i64, stop: i64)
        -> Result<Vec<(String, f64)>>;

    /// Members between two ascending ranks.
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        Ok(self
            .zrange_withscores(key, start, stop)
            .await?
            .into_iter()
            .map(|(member, _)| member)
            .collect())
    }

    /// Members between two descending ranks.
    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Remove members between two ascending ranks, returning how many were removed.
    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<u64>;

    /// Store the weighted intersection of `sources` into `dest`.
    ///
    /// `dest` may also appear among the sources; it is replaced atomically.
    /// Returns the cardinality of the result.
    async fn zinterstore(
        &self,
        dest: &str,
        sources: &[(String, f64)],
        aggregate: Aggregate,
    ) -> Result<u64>;

    // ---- sets -------------------------------------------------------------

    /// Add a member. Returns true only if the member was not already present.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;

    async fn srem(&self, key: &str, member: &str) -> Result<bool>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;
}

// =============================================================================
// Clock Port
// =============================================================================

/// Wall clock in fractional seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

// =============================================================================
// Row Data Port
// =============================================================================

/// Port for the database rows materialized by the row cache.
#[async_trait]
pub trait RowProvider: Send + Sync {
    /// Render the current row. `None` if the row no longer exists.
    async fn fetch_row(&self, row_id: &str, now: f64) -> Result<Option<RowRecord>>;
}

// =============================================================================
// Request Classification Port
// =============================================================================

/// Extracts what the page cache needs to know about a request.
pub trait RequestClassifier: Send + Sync {
    /// Item the request refers to, if any.
    fn item_id(&self, request: &str) -> Option<String>;

    /// Whether the request carries per-visit state and must never be cached.
    fn is_dynamic(&self, request: &str) -> bool;
}

// =============================================================================
// Tests
// =============================================================================
