//! kvfront - Key-Value Backed Social News and Storefront Backend
//!
//! Article voting and ranking, session and cart lifecycle, a popularity-gated
//! page cache and a delay-driven row cache, all composed over one shared
//! key-value store with no cross-key transactions.
//!
//! # Architecture
//!
//! Request-facing operations are direct async calls; three background loops
//! race them on the same keys:
//!
//! ```text
//! requests ──▶ RankingEngine │ SessionManager │ PageCache
//!                    │               │              │
//!                    ▼               ▼              ▼
//!              ┌───────────────── KvStore ─────────────────┐
//!                    ▲               ▲              ▲
//!                    │               │              │
//!        session eviction   popularity rescale   row dispatch
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - In-memory store, clocks and the stub row provider
//! - [`app`] - Component wiring and background task startup
//! - [`config`] - Tunables with their defaults
//! - [`domain`] - Ports the components are written against
//! - [`error`] - Error types
//! - [`keys`] - Persisted key namespaces
//! - [`metrics`] - Prometheus counters
//! - [`page_cache`] - Rendered page cache
//! - [`popularity`] - Decayed view counts and request classification
//! - [`ranking`] - Article posting, voting and listings
//! - [`rowcache`] - Row cache scheduler
//! - [`session`] - Sessions, viewed items, carts and eviction
//! - [`worker`] - Periodic background task driver

pub mod adapters;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod page_cache;
pub mod popularity;
pub mod ranking;
pub mod rowcache;
pub mod session;
pub mod worker;

mod proptests;

// Re-export commonly used types
pub use app::{Backend, SeedArticle};
pub use config::AppConfig;
pub use domain::{ArticleId, Clock, KvStore, RequestClassifier, RowProvider, RowRecord};
pub use error::{Error, Result};
pub use page_cache::PageCache;
pub use popularity::{PopularityTracker, QueryParamClassifier};
pub use ranking::{Article, Order, RankingEngine, VoteOutcome};
pub use rowcache::{Dispatch, RowCacheScheduler};
pub use session::SessionManager;
