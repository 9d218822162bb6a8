//! Popularity Tracker
//!
//! Global decayed view counts in the `viewed:` ordered index.
//!
//! # Sign convention
//!
//! A view decrements the item's score, so the most viewed items carry the
//! most negative scores and the lowest ascending ranks. The cache admission
//! check ("rank below the limit") depends on this orientation; flipping the
//! sign means flipping the comparison as well.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PopularityConfig;
use crate::domain::ports::{Aggregate, KvStore, RequestClassifier};
use crate::error::Result;
use crate::keys;
use crate::metrics;
use crate::worker::{PeriodicTask, TaskReport, Work};

/// Decayed view counter feeding page cache admission
pub struct PopularityTracker {
    store: Arc<dyn KvStore>,
    config: PopularityConfig,
}

impl PopularityTracker {
    /// Create a new tracker
    pub fn new(store: Arc<dyn KvStore>, config: PopularityConfig) -> Self {
        Self { store, config }
    }

    /// Get configuration
    pub fn config(&self) -> &PopularityConfig {
        &self.config
    }

    /// Count one view of `item`
    pub async fn record_view(&self, item: &str) -> Result<()> {
        self.store.zincrby(keys::VIEWED, item, -1.0).await?;
        Ok(())
    }

    /// Zero-based popularity rank, 0 being the most viewed item
    pub async fn rank(&self, item: &str) -> Result<Option<u64>> {
        self.store.zrank(keys::VIEWED, item).await
    }

    /// Whether a response for `request` may be served from the page cache.
    ///
    /// Requests that name no item, or that carry a nonce marking them as
    /// dynamic, are never cacheable. Otherwise the item must rank inside
    /// the configured limit.
    pub async fn is_cacheable(
        &self,
        classifier: &dyn RequestClassifier,
        request: &str,
    ) -> Result<bool> {
        let Some(item) = classifier.item_id(request) else {
            return Ok(false);
        };
        if classifier.is_dynamic(request) {
            return Ok(false);
        }
        let rank = self.rank(&item).await?;
        Ok(rank.is_some_and(|rank| rank < self.config.cacheable_rank_limit))
    }

    /// Trim the index to the retained items and decay every score.
    ///
    /// Returns the number of items trimmed.
    pub async fn rescale_once(&self) -> Result<u64> {
        let trimmed = self
            .store
            .zremrangebyrank(keys::VIEWED, self.config.retained as i64, -1)
            .await?;
        let remaining = self
            .store
            .zinterstore(
                keys::VIEWED,
                &[(keys::VIEWED.to_string(), self.config.decay_factor)],
                Aggregate::Sum,
            )
            .await?;

        metrics::POPULARITY_RESCALES.inc();
        debug!(trimmed, remaining, "Rescaled popularity index");
        Ok(trimmed)
    }

    /// Run the rescale loop until cancelled, one pass per interval
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> TaskReport {
        info!(
            retained = self.config.retained,
            decay = self.config.decay_factor,
            "Starting popularity rescale"
        );
        let task = PeriodicTask::new("popularity-rescale", self.config.rescale_interval, cancel);
        let this = self.as_ref();
        task.run(move || async move {
            this.rescale_once().await?;
            Ok(Work::Idle)
        })
        .await
    }
}
