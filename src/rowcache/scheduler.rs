//! Row Cache Scheduler
//!
//! Delay queue over two ordered indexes: `delay:` holds each row's refresh
//! interval and `schedule:` its next due time. The dispatcher takes the
//! earliest due row, re-renders it into `inv:<row_id>` and pushes its due
//! time forward, or evicts it once its delay is no longer positive.
//!
//! Per row: unscheduled -> scheduled -> refreshing (repeats) -> evicted.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::RowCacheConfig;
use crate::domain::ports::{Clock, KvStore, RowProvider, RowRecord};
use crate::error::Result;
use crate::keys;
use crate::metrics;
use crate::worker::{PeriodicTask, TaskReport, Work};

/// Result of one dispatcher step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// No row is due yet
    Idle,
    /// Row re-rendered into its cache slot
    Refreshed(String),
    /// Row removed from the schedule along with its slot
    Evicted(String),
    /// Provider no longer knows the row; stale slot dropped, row rescheduled
    Missing(String),
}

impl Dispatch {
    fn work(&self) -> Work {
        match self {
            Dispatch::Idle => Work::Idle,
            _ => Work::Busy,
        }
    }
}

/// Delay-driven refresher for materialized rows
pub struct RowCacheScheduler {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    provider: Arc<dyn RowProvider>,
    config: RowCacheConfig,
}

impl RowCacheScheduler {
    /// Create a new scheduler
    pub fn new(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        provider: Arc<dyn RowProvider>,
        config: RowCacheConfig,
    ) -> Self {
        Self {
            store,
            clock,
            provider,
            config,
        }
    }

    /// Cache `row_id`, refreshing every `delay` seconds. The first refresh is
    /// due immediately. A non-positive delay stops caching the row.
    #[instrument(skip(self))]
    pub async fn schedule(&self, row_id: &str, delay: f64) -> Result<()> {
        let now = self.clock.now();
        self.store.zadd(keys::DELAY, row_id, delay).await?;
        self.store.zadd(keys::SCHEDULE, row_id, now).await?;
        debug!(row_id, delay, "Row scheduled");
        Ok(())
    }

    /// Stop caching `row_id`; the dispatcher evicts it on its next pass
    pub async fn unschedule(&self, row_id: &str) -> Result<()> {
        self.schedule(row_id, 0.0).await
    }

    /// Last rendered payload of `row_id`, if materialized
    pub async fn cached_row(&self, row_id: &str) -> Result<Option<RowRecord>> {
        match self.store.get(&keys::row_slot(row_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Process the earliest due row, if any.
    pub async fn dispatch_once(&self) -> Result<Dispatch> {
        let next = self.store.zrange_withscores(keys::SCHEDULE, 0, 0).await?;
        let now = self.clock.now();
        let Some((row_id, due)) = next.into_iter().next() else {
            return Ok(Dispatch::Idle);
        };
        if due > now {
            return Ok(Dispatch::Idle);
        }

        // No delay entry counts as a stop request
        let delay = self
            .store
            .zscore(keys::DELAY, &row_id)
            .await?
            .unwrap_or(0.0);
        let slot = keys::row_slot(&row_id);

        if delay <= 0.0 {
            self.store.zrem(keys::SCHEDULE, &[row_id.clone()]).await?;
            self.store.zrem(keys::DELAY, &[row_id.clone()]).await?;
            self.store.delete(&[slot]).await?;
            metrics::ROW_CACHE.with_label_values(&["evicted"]).inc();
            debug!(row_id = %row_id, "Row evicted");
            return Ok(Dispatch::Evicted(row_id));
        }

        self.store.zadd(keys::SCHEDULE, &row_id, now + delay).await?;
        match self.provider.fetch_row(&row_id, now).await? {
            Some(record) => {
                let payload = serde_json::to_string(&record)?;
                self.store.set(&slot, &payload).await?;
                metrics::ROW_CACHE.with_label_values(&["refreshed"]).inc();
                debug!(row_id = %row_id, next_due = now + delay, "Row refreshed");
                Ok(Dispatch::Refreshed(row_id))
            }
            None => {
                self.store.delete(&[slot]).await?;
                metrics::ROW_CACHE.with_label_values(&["missing"]).inc();
                warn!(row_id = %row_id, "Scheduled row not found by provider");
                Ok(Dispatch::Missing(row_id))
            }
        }
    }

    /// Run the dispatcher until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> TaskReport {
        info!(poll = ?self.config.poll_interval, "Starting row cache dispatcher");
        let task = PeriodicTask::new("row-dispatch", self.config.poll_interval, cancel);
        let this = self.as_ref();
        task.run(move || async move { Ok(this.dispatch_once().await?.work()) })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryStore, InventoryProvider, ManualClock, STUB_PAYLOAD};
    use assert_matches::assert_matches;
    use std::time::Duration;

    struct Fixture {
        scheduler: RowCacheScheduler,
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        provider: Arc<InventoryProvider>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000.0));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let provider = Arc::new(InventoryProvider::new());
        let scheduler = RowCacheScheduler::new(
            store.clone(),
            clock.clone(),
            provider.clone(),
            RowCacheConfig::default(),
        );
        Fixture {
            scheduler,
            store,
            clock,
            provider,
        }
    }

    #[tokio::test]
    async fn test_empty_schedule_is_idle() {
        let f = fixture();
        assert_eq!(f.scheduler.dispatch_once().await.unwrap(), Dispatch::Idle);
    }

    #[tokio::test]
    async fn test_first_refresh_is_immediate() {
        let f = fixture();
        f.scheduler.schedule("itemX", 5.0).await.unwrap();

        assert_matches!(f.scheduler.dispatch_once().await.unwrap(), Dispatch::Refreshed(id) if id == "itemX");
        let row = f.scheduler.cached_row("itemX").await.unwrap().unwrap();
        assert_eq!(row.id, "itemX");
        assert_eq!(row.data, STUB_PAYLOAD);
        assert_eq!(row.cached, 1_000.0);
        assert_eq!(
            f.store.zscore("schedule:", "itemX").await.unwrap(),
            Some(1_005.0)
        );
    }

    #[tokio::test]
    async fn test_not_due_until_delay_elapses() {
        let f = fixture();
        f.scheduler.schedule("itemX", 5.0).await.unwrap();
        f.scheduler.dispatch_once().await.unwrap();

        f.clock.advance(Duration::from_secs(4));
        assert_eq!(f.scheduler.dispatch_once().await.unwrap(), Dispatch::Idle);

        f.clock.advance(Duration::from_secs(1));
        assert_matches!(f.scheduler.dispatch_once().await.unwrap(), Dispatch::Refreshed(_));
        assert_eq!(f.provider.fetch_count(), 2);
        let row = f.scheduler.cached_row("itemX").await.unwrap().unwrap();
        assert_eq!(row.cached, 1_005.0);
    }

    #[tokio::test]
    async fn test_unschedule_evicts_for_good() {
        let f = fixture();
        f.scheduler.schedule("itemX", 5.0).await.unwrap();
        f.scheduler.dispatch_once().await.unwrap();
        assert!(f.scheduler.cached_row("itemX").await.unwrap().is_some());

        f.scheduler.unschedule("itemX").await.unwrap();
        assert_eq!(
            f.scheduler.dispatch_once().await.unwrap(),
            Dispatch::Evicted("itemX".to_string())
        );

        assert!(f.scheduler.cached_row("itemX").await.unwrap().is_none());
        assert_eq!(f.store.zscore("delay:", "itemX").await.unwrap(), None);
        assert_eq!(f.store.zscore("schedule:", "itemX").await.unwrap(), None);

        f.clock.advance(Duration::from_secs(60));
        assert_eq!(f.scheduler.dispatch_once().await.unwrap(), Dispatch::Idle);
        assert!(f.scheduler.cached_row("itemX").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_delay_entry_evicts() {
        let f = fixture();
        f.store.zadd("schedule:", "orphan", 1_000.0).await.unwrap();
        f.store.set("inv:orphan", "{}").await.unwrap();

        assert_matches!(f.scheduler.dispatch_once().await.unwrap(), Dispatch::Evicted(id) if id == "orphan");
        assert!(!f.store.exists("inv:orphan").await.unwrap());
    }

    #[tokio::test]
    async fn test_withdrawn_row_drops_slot_but_stays_scheduled() {
        let f = fixture();
        f.scheduler.schedule("itemX", 5.0).await.unwrap();
        f.scheduler.dispatch_once().await.unwrap();
        f.provider.withdraw("itemX");

        f.clock.advance(Duration::from_secs(5));
        assert_matches!(f.scheduler.dispatch_once().await.unwrap(), Dispatch::Missing(_));
        assert!(f.scheduler.cached_row("itemX").await.unwrap().is_none());
        assert_eq!(
            f.store.zscore("schedule:", "itemX").await.unwrap(),
            Some(1_010.0)
        );
    }

    #[tokio::test]
    async fn test_ties_break_by_row_id() {
        let f = fixture();
        f.scheduler.schedule("b", 5.0).await.unwrap();
        f.scheduler.schedule("a", 5.0).await.unwrap();

        assert_matches!(f.scheduler.dispatch_once().await.unwrap(), Dispatch::Refreshed(id) if id == "a");
        assert_matches!(f.scheduler.dispatch_once().await.unwrap(), Dispatch::Refreshed(id) if id == "b");
        assert_eq!(f.scheduler.dispatch_once().await.unwrap(), Dispatch::Idle);
    }

    #[tokio::test]
    async fn test_run_materializes_and_stops_on_cancel() {
        let f = fixture();
        f.scheduler.schedule("itemX", 5.0).await.unwrap();
        let scheduler = Arc::new(f.scheduler);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(scheduler.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let report = handle.await.unwrap();

        assert!(report.iterations >= 2);
        assert_eq!(report.failures, 0);
        assert!(scheduler.cached_row("itemX").await.unwrap().is_some());
        // Clock is frozen, so the row was rendered exactly once
        assert_eq!(f.provider.fetch_count(), 1);
    }
}
