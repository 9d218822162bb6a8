//! Page Cache
//!
//! Read-through cache of rendered pages keyed by a request fingerprint,
//! admitting only popular, non-dynamic item pages.
//!
//! Concurrent misses for the same fingerprint may both render and both
//! write; the last write wins and both callers get a valid page.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::PageCacheConfig;
use crate::domain::ports::{KvStore, RequestClassifier};
use crate::error::Result;
use crate::keys;
use crate::metrics;
use crate::popularity::PopularityTracker;

/// Deterministic fingerprint of a request (FxHash, hex encoded).
pub fn fingerprint(request: &str) -> String {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in request.as_bytes() {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    format!("{:016x}", hash)
}

/// How a request was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from the cache
    Hit,
    /// Rendered and stored
    Miss,
    /// Not cacheable; rendered without touching the cache
    Bypass,
}

impl CacheOutcome {
    fn label(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Bypass => "bypass",
        }
    }
}

/// Popularity-gated cache of rendered pages
pub struct PageCache {
    store: Arc<dyn KvStore>,
    popularity: Arc<PopularityTracker>,
    classifier: Arc<dyn RequestClassifier>,
    config: PageCacheConfig,
}

impl PageCache {
    /// Create a new page cache
    pub fn new(
        store: Arc<dyn KvStore>,
        popularity: Arc<PopularityTracker>,
        classifier: Arc<dyn RequestClassifier>,
        config: PageCacheConfig,
    ) -> Self {
        Self {
            store,
            popularity,
            classifier,
            config,
        }
    }

    /// Whether `request` is eligible for caching
    pub async fn can_cache(&self, request: &str) -> Result<bool> {
        self.popularity
            .is_cacheable(self.classifier.as_ref(), request)
            .await
    }

    /// Answer `request`, rendering with `render` when the cache cannot.
    pub async fn cached_request<F, Fut>(&self, request: &str, render: F) -> Result<String>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let (content, _) = self.lookup(request, render).await?;
        Ok(content)
    }

    /// Like [`PageCache::cached_request`], also reporting how it was answered.
    #[instrument(skip(self, render))]
    pub async fn lookup<F, Fut>(&self, request: &str, render: F) -> Result<(String, CacheOutcome)>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let (content, outcome) = if !self.can_cache(request).await? {
            (render(request.to_string()).await?, CacheOutcome::Bypass)
        } else {
            let key = keys::cached_page(&fingerprint(request));
            match self.store.get(&key).await? {
                Some(content) => (content, CacheOutcome::Hit),
                None => {
                    let content = render(request.to_string()).await?;
                    self.store.setex(&key, &content, self.config.ttl).await?;
                    (content, CacheOutcome::Miss)
                }
            }
        };

        metrics::PAGE_CACHE
            .with_label_values(&[outcome.label()])
            .inc();
        debug!(outcome = outcome.label(), "Page request answered");
        Ok((content, outcome))
    }
}

// =============================================================================
// Tests
// =============================================================================
