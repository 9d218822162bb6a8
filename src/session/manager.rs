//! Session Manager
//!
//! Binds opaque tokens to users, tracks per-session viewed items and
//! shopping carts, and keeps the token population under a ceiling by
//! evicting the least recently seen sessions.
//!
//! # Eviction races
//!
//! An eviction batch is three store commands (delete session keys, drop
//! login bindings, drop recency entries), not one transaction. Two
//! overlapping eviction loops may pick the same tokens; deleting an already
//! deleted key is a no-op, so the race only wastes a round trip. A token
//! refreshed by a request while its batch is in flight can lose its
//! binding and has to log in again.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{EvictionMode, SessionConfig};
use crate::domain::ports::{Clock, KvStore};
use crate::error::{Error, Result};
use crate::keys;
use crate::metrics;
use crate::popularity::PopularityTracker;
use crate::worker::{PeriodicTask, TaskReport, Work};

/// Generate a fresh random session token
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}

/// Session lifecycle over the shared store
pub struct SessionManager {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    popularity: Arc<PopularityTracker>,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        popularity: Arc<PopularityTracker>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            clock,
            popularity,
            config,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// User bound to a token, if the session is still live
    pub async fn check_token(&self, token: &str) -> Result<Option<String>> {
        self.store.hget(keys::LOGIN, token).await
    }

    /// Bind `token` to `user` and mark it seen now.
    ///
    /// When an item is given it is recorded in the session's viewed-items
    /// index (capped to the most recent entries) and counted as a view in
    /// the global popularity index.
    #[instrument(skip(self, token))]
    pub async fn bind_token(&self, token: &str, user: &str, item: Option<&str>) -> Result<()> {
        // `viewed:` with an empty suffix is the global popularity index
        if token.is_empty() {
            return Err(Error::InvalidArgument("session token must not be empty".to_string()));
        }
        let now = self.clock.now();
        self.store.hset(keys::LOGIN, token, user).await?;
        self.store.zadd(keys::RECENT, token, now).await?;

        if let Some(item) = item {
            let viewed = keys::session_viewed(token);
            self.store.zadd(&viewed, item, now).await?;
            let keep_from = -(self.config.viewed_cap as i64) - 1;
            self.store.zremrangebyrank(&viewed, 0, keep_from).await?;
            self.popularity.record_view(item).await?;
        }
        Ok(())
    }

    /// Items a session viewed, most recent first
    pub async fn viewed_items(&self, token: &str) -> Result<Vec<String>> {
        if token.is_empty() {
            return Ok(Vec::new());
        }
        self.store
            .zrevrange(&keys::session_viewed(token), 0, -1)
            .await
    }

    /// Set the quantity of an item in a session's cart.
    ///
    /// A quantity of zero or less removes the item.
    #[instrument(skip(self, session))]
    pub async fn add_to_cart(&self, session: &str, item: &str, quantity: i64) -> Result<()> {
        let cart = keys::cart(session);
        if quantity <= 0 {
            self.store.hdel(&cart, &[item.to_string()]).await?;
        } else {
            self.store.hset(&cart, item, &quantity.to_string()).await?;
        }
        Ok(())
    }

    /// Contents of a session's cart
    pub async fn cart(&self, session: &str) -> Result<HashMap<String, i64>> {
        let raw = self.store.hgetall(&keys::cart(session)).await?;
        let mut cart = HashMap::with_capacity(raw.len());
        for (item, quantity) in raw {
            match quantity.parse() {
                Ok(quantity) => {
                    cart.insert(item, quantity);
                }
                Err(_) => warn!(%item, %quantity, "Ignoring malformed cart quantity"),
            }
        }
        Ok(cart)
    }

    /// Evict one batch of the oldest sessions above the ceiling.
    ///
    /// Returns the number of sessions evicted; zero means the population is
    /// at or under the ceiling.
    pub async fn evict_once(&self) -> Result<u64> {
        let size = self.store.zcard(keys::RECENT).await?;
        if size <= self.config.max_tokens {
            return Ok(0);
        }

        let batch = (size - self.config.max_tokens).min(self.config.eviction_batch);
        let tokens = self
            .store
            .zrange(keys::RECENT, 0, batch as i64 - 1)
            .await?;
        if tokens.is_empty() {
            return Ok(0);
        }

        let mut session_keys = Vec::with_capacity(tokens.len() * 2);
        for token in &tokens {
            session_keys.push(keys::session_viewed(token));
            if self.config.mode == EvictionMode::WithCarts {
                session_keys.push(keys::cart(token));
            }
        }

        self.store.delete(&session_keys).await?;
        self.store.hdel(keys::LOGIN, &tokens).await?;
        self.store.zrem(keys::RECENT, &tokens).await?;

        let evicted = tokens.len() as u64;
        metrics::SESSIONS_EVICTED.inc_by(evicted);
        debug!(evicted, size, mode = ?self.config.mode, "Evicted sessions");
        Ok(evicted)
    }

    /// Run the eviction loop until cancelled.
    ///
    /// Batches run back to back while over the ceiling; otherwise the loop
    /// sleeps for the idle interval between checks.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> TaskReport {
        info!(
            max_tokens = self.config.max_tokens,
            mode = ?self.config.mode,
            "Starting session eviction"
        );
        let task = PeriodicTask::new("session-eviction", self.config.idle_interval, cancel);
        let this = self.as_ref();
        task.run(move || async move {
            Ok(if this.evict_once().await? > 0 {
                Work::Busy
            } else {
                Work::Idle
            })
        })
        .await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryStore, ManualClock};
    use crate::config::PopularityConfig;
    use std::time::Duration;

    const T0: f64 = 1_700_000_000.0;

    struct Fixture {
        sessions: SessionManager,
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture(config: SessionConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let popularity = Arc::new(PopularityTracker::new(
            store.clone(),
            PopularityConfig::default(),
        ));
        let sessions = SessionManager::new(store.clone(), clock.clone(), popularity, config);
        Fixture {
            sessions,
            store,
            clock,
        }
    }

    fn ceiling(max_tokens: u64, mode: EvictionMode) -> SessionConfig {
        SessionConfig {
            max_tokens,
            mode,
            idle_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_token_is_unique() {
        assert_ne!(new_token(), new_token());
    }

    #[tokio::test]
    async fn test_bind_and_check_token() {
        let f = fixture(SessionConfig::default());
        let token = new_token();
        f.sessions.bind_token(&token, "username", Some("IPhoneX")).await.unwrap();

        assert_eq!(
            f.sessions.check_token(&token).await.unwrap().as_deref(),
            Some("username")
        );
        assert_eq!(f.store.zscore("recent:", &token).await.unwrap(), Some(T0));
        assert_eq!(f.sessions.viewed_items(&token).await.unwrap(), vec!["IPhoneX"]);
        assert_eq!(f.store.zscore("viewed:", "IPhoneX").await.unwrap(), Some(-1.0));
        assert_eq!(f.sessions.check_token("unknown").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bind_without_item_leaves_views_untouched() {
        let f = fixture(SessionConfig::default());
        f.sessions.bind_token("t", "bob", None).await.unwrap();
        assert!(!f.store.exists("viewed:t").await.unwrap());
        assert!(!f.store.exists("viewed:").await.unwrap());
    }

    #[tokio::test]
    async fn test_viewed_items_capped_to_most_recent() {
        let f = fixture(SessionConfig::default());
        for i in 0..30 {
            f.sessions
                .bind_token("t", "bob", Some(&format!("item-{:02}", i)))
                .await
                .unwrap();
            f.clock.advance(Duration::from_secs(1));
        }

        let viewed = f.sessions.viewed_items("t").await.unwrap();
        assert_eq!(viewed.len(), 25);
        assert_eq!(viewed[0], "item-29");
        assert_eq!(viewed[24], "item-05");
    }

    #[tokio::test]
    async fn test_cart_quantities() {
        let f = fixture(SessionConfig::default());
        f.sessions.add_to_cart("s", "IPhoneX", 2).await.unwrap();
        f.sessions.add_to_cart("s", "Galaxy Tab", 1).await.unwrap();
        assert_eq!(f.sessions.cart("s").await.unwrap().values().sum::<i64>(), 3);

        f.sessions.add_to_cart("s", "IPhoneX", 0).await.unwrap();
        let cart = f.sessions.cart("s").await.unwrap();
        assert_eq!(cart.len(), 1);
        assert!(!cart.contains_key("IPhoneX"));

        f.sessions.add_to_cart("s", "Galaxy Tab", -4).await.unwrap();
        assert!(f.sessions.cart("s").await.unwrap().is_empty());
        assert!(!f.store.exists("cart:s").await.unwrap());
    }

    #[tokio::test]
    async fn test_evict_once_under_ceiling_is_noop() {
        let f = fixture(ceiling(5, EvictionMode::SessionsOnly));
        f.sessions.bind_token("t", "bob", None).await.unwrap();
        assert_eq!(f.sessions.evict_once().await.unwrap(), 0);
        assert_eq!(f.store.hlen("login:").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_evict_once_removes_oldest() {
        let f = fixture(ceiling(2, EvictionMode::SessionsOnly));
        for token in ["t1", "t2", "t3", "t4"] {
            f.sessions.bind_token(token, "u", Some("item")).await.unwrap();
            f.sessions.add_to_cart(token, "item", 1).await.unwrap();
            f.clock.advance(Duration::from_secs(1));
        }

        assert_eq!(f.sessions.evict_once().await.unwrap(), 2);
        assert_eq!(f.store.zrange("recent:", 0, -1).await.unwrap(), vec!["t3", "t4"]);
        assert_eq!(f.sessions.check_token("t1").await.unwrap(), None);
        assert!(!f.store.exists("viewed:t1").await.unwrap());
        assert!(f.store.exists("viewed:t3").await.unwrap());
        // Carts survive the sessions-only variant
        assert!(f.store.exists("cart:t1").await.unwrap());
        assert_eq!(f.sessions.evict_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_evict_batch_is_bounded() {
        let mut config = ceiling(0, EvictionMode::SessionsOnly);
        config.eviction_batch = 3;
        let f = fixture(config);
        for i in 0..7 {
            f.sessions.bind_token(&format!("t{}", i), "u", None).await.unwrap();
        }

        assert_eq!(f.sessions.evict_once().await.unwrap(), 3);
        assert_eq!(f.sessions.evict_once().await.unwrap(), 3);
        assert_eq!(f.sessions.evict_once().await.unwrap(), 1);
        assert_eq!(f.store.zcard("recent:").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_evict_with_carts() {
        let f = fixture(ceiling(0, EvictionMode::WithCarts));
        f.sessions.bind_token("t", "bob", Some("IPhone X")).await.unwrap();
        f.sessions.add_to_cart("t", "IPhone X", 2).await.unwrap();

        assert_eq!(f.sessions.evict_once().await.unwrap(), 1);
        assert!(!f.store.exists("cart:t").await.unwrap());
        assert!(!f.store.exists("viewed:t").await.unwrap());
        assert!(!f.store.exists("login:").await.unwrap());
        // The global popularity counter is not session state
        assert!(f.store.exists("viewed:").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_token_cannot_touch_popularity_index() {
        let f = fixture(ceiling(0, EvictionMode::SessionsOnly));
        for _ in 0..5 {
            f.sessions.bind_token("tok", "bob", Some("hot")).await.unwrap();
        }

        let result = f.sessions.bind_token("", "eve", Some("other")).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(f.sessions.viewed_items("").await.unwrap().is_empty());
        assert_eq!(f.store.zscore("viewed:", "other").await.unwrap(), None);

        assert_eq!(f.sessions.evict_once().await.unwrap(), 1);
        assert_eq!(f.store.zscore("viewed:", "hot").await.unwrap(), Some(-5.0));
    }

    #[tokio::test]
    async fn test_run_drains_to_ceiling_and_stops() {
        let f = fixture(ceiling(1, EvictionMode::SessionsOnly));
        for token in ["a", "b", "c"] {
            f.sessions.bind_token(token, "u", None).await.unwrap();
            f.clock.advance(Duration::from_secs(1));
        }

        let sessions = Arc::new(f.sessions);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sessions.clone().run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(2), async {
            while f.store.zcard("recent:").await.unwrap() > 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("eviction loop did not reach the ceiling");
        cancel.cancel();

        let report = handle.await.unwrap();
        assert!(report.iterations >= 1);
        assert_eq!(report.failures, 0);
        assert_eq!(f.store.zrange("recent:", 0, -1).await.unwrap(), vec!["c"]);
    }
}
