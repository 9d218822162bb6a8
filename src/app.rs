//! Backend Wiring
//!
//! Builds every component over one shared store and clock, and starts the
//! background loops.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::domain::ports::{ArticleId, Clock, KvStore, RequestClassifier, RowProvider};
use crate::error::Result;
use crate::page_cache::PageCache;
use crate::popularity::PopularityTracker;
use crate::ranking::RankingEngine;
use crate::rowcache::RowCacheScheduler;
use crate::session::SessionManager;
use crate::worker::TaskReport;

/// Article to post at startup
#[derive(Debug, Clone, Deserialize)]
pub struct SeedArticle {
    pub user: String,
    pub link: String,
    pub title: String,
}

/// Load seed articles from a JSON array file
pub async fn load_seed_file(path: &Path) -> Result<Vec<SeedArticle>> {
    let raw = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Handles of the running background loops
pub struct BackgroundTasks {
    pub eviction: JoinHandle<TaskReport>,
    pub rescale: JoinHandle<TaskReport>,
    pub dispatch: JoinHandle<TaskReport>,
}

impl BackgroundTasks {
    /// Wait for every loop to stop
    pub async fn join(self) -> Result<Vec<(&'static str, TaskReport)>> {
        let (eviction, rescale, dispatch) =
            tokio::try_join!(self.eviction, self.rescale, self.dispatch).map_err(|e| {
                crate::error::Error::Internal(format!("background task panicked: {}", e))
            })?;
        Ok(vec![
            ("session-eviction", eviction),
            ("popularity-rescale", rescale),
            ("row-dispatch", dispatch),
        ])
    }
}

/// Every component sharing one store
#[derive(Clone)]
pub struct Backend {
    pub ranking: Arc<RankingEngine>,
    pub sessions: Arc<SessionManager>,
    pub popularity: Arc<PopularityTracker>,
    pub pages: Arc<PageCache>,
    pub rows: Arc<RowCacheScheduler>,
}

impl Backend {
    /// Wire all components
    pub fn new(
        config: AppConfig,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        provider: Arc<dyn RowProvider>,
        classifier: Arc<dyn RequestClassifier>,
    ) -> Result<Self> {
        config.validate()?;
        let AppConfig {
            ranking,
            session,
            popularity,
            page_cache,
            row_cache,
        } = config;

        let popularity = Arc::new(PopularityTracker::new(store.clone(), popularity));
        Ok(Self {
            ranking: Arc::new(RankingEngine::new(store.clone(), clock.clone(), ranking)),
            sessions: Arc::new(SessionManager::new(
                store.clone(),
                clock.clone(),
                popularity.clone(),
                session,
            )),
            pages: Arc::new(PageCache::new(
                store.clone(),
                popularity.clone(),
                classifier,
                page_cache,
            )),
            rows: Arc::new(RowCacheScheduler::new(store, clock, provider, row_cache)),
            popularity,
        })
    }

    /// Post every seed article, returning the allocated ids
    pub async fn seed_articles(&self, seeds: &[SeedArticle]) -> Result<Vec<ArticleId>> {
        let mut ids = Vec::with_capacity(seeds.len());
        for seed in seeds {
            ids.push(self.ranking.post(&seed.user, &seed.title, &seed.link).await?);
        }
        info!(count = ids.len(), "Seeded articles");
        Ok(ids)
    }

    /// Start the eviction, rescale and row-dispatch loops
    pub fn spawn_background(&self, cancel: &CancellationToken) -> BackgroundTasks {
        BackgroundTasks {
            eviction: tokio::spawn(self.sessions.clone().run(cancel.clone())),
            rescale: tokio::spawn(self.popularity.clone().run(cancel.clone())),
            dispatch: tokio::spawn(self.rows.clone().run(cancel.clone())),
        }
    }
}
