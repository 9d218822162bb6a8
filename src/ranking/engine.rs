//! Ranking Engine
//!
//! Article posting, voting and ranked retrieval over the `score:` and
//! `time:` ordered indexes.
//!
//! # Consistency
//!
//! Each write below is a single atomic store command; a post is four of
//! them. A concurrent reader may briefly see an article in one index but
//! not the other, or an index entry whose record is not written yet. Pages
//! skip such entries instead of failing.
//!
//! The only guard against double voting is the atomic set-add on
//! `voted:<id>`: the score and vote counter move only when that add
//! inserted a new member.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::RankingConfig;
use crate::domain::ports::{Aggregate, ArticleId, Clock, KvStore};
use crate::error::{Error, Result};
use crate::keys;
use crate::metrics;

// =============================================================================
// Types
// =============================================================================

/// Base index a page is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Vote-weighted score, highest first
    Score,
    /// Creation time, newest first
    Time,
}

impl Order {
    /// Key of the ordered index backing this order
    pub fn index(&self) -> &'static str {
        match self {
            Order::Score => keys::SCORE_INDEX,
            Order::Time => keys::TIME_INDEX,
        }
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Order::Score => write!(f, "score"),
            Order::Time => write!(f, "time"),
        }
    }
}

/// Result of a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Vote counted
    Accepted,
    /// User already voted for this article
    Duplicate,
    /// Article is past its voting window or unknown
    Ineligible,
}

impl VoteOutcome {
    fn label(&self) -> &'static str {
        match self {
            VoteOutcome::Accepted => "accepted",
            VoteOutcome::Duplicate => "duplicate",
            VoteOutcome::Ineligible => "ineligible",
        }
    }
}

/// Article record as stored in `article:<id>`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    /// Index member name (`article:<id>`)
    pub id: String,
    pub title: String,
    pub link: String,
    pub poster: String,
    /// Creation time in epoch seconds
    pub time: f64,
    pub votes: i64,
}

impl Article {
    /// Build from a record hash. Missing fields take empty values so a
    /// half-written record still renders; an empty hash yields `None`.
    pub fn from_fields(id: String, mut fields: HashMap<String, String>) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }
        let time = fields
            .get("time")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default();
        let votes = fields
            .get("votes")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default();
        Some(Self {
            id,
            title: fields.remove("title").unwrap_or_default(),
            link: fields.remove("link").unwrap_or_default(),
            poster: fields.remove("poster").unwrap_or_default(),
            time,
            votes,
        })
    }

    /// Numeric identity, if the member name carries one
    pub fn article_id(&self) -> Option<ArticleId> {
        ArticleId::parse(&self.id)
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Voting and ranking over the shared store
pub struct RankingEngine {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: RankingConfig,
}

impl RankingEngine {
    /// Create a new ranking engine
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: RankingConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Publish a new article. The poster's own vote is counted.
    #[instrument(skip(self, link))]
    pub async fn post(&self, user: &str, title: &str, link: &str) -> Result<ArticleId> {
        for (name, value) in [("user", user), ("title", title), ("link", link)] {
            if value.trim().is_empty() {
                return Err(Error::InvalidArgument(format!("{} must not be empty", name)));
            }
        }

        let raw_id = self.store.incr(keys::ARTICLE_COUNTER).await?;
        let id = u64::try_from(raw_id)
            .map(ArticleId::new)
            .map_err(|_| Error::Internal(format!("article counter went negative: {}", raw_id)))?;

        let voted = keys::voted(id);
        self.store.sadd(&voted, user).await?;
        self.store
            .expire(&voted, self.config.eligibility_window)
            .await?;

        let now = self.clock.now();
        let article = keys::article(id);
        let fields = [
            ("title", title.to_string()),
            ("link", link.to_string()),
            ("poster", user.to_string()),
            ("time", now.to_string()),
            ("votes", "1".to_string()),
        ]
        .map(|(field, value)| (field.to_string(), value));
        self.store.hset_multiple(&article, &fields).await?;

        self.store
            .zadd(keys::SCORE_INDEX, &article, now + self.config.vote_bonus)
            .await?;
        self.store.zadd(keys::TIME_INDEX, &article, now).await?;

        metrics::ARTICLES_POSTED.inc();
        info!(article = %id, "Article posted");
        Ok(id)
    }

    /// Cast a vote. Ineligible and repeated votes are no-ops, not errors.
    #[instrument(skip(self))]
    pub async fn vote(&self, user: &str, article: ArticleId) -> Result<VoteOutcome> {
        let outcome = self.apply_vote(user, article).await?;
        metrics::VOTES.with_label_values(&[outcome.label()]).inc();
        debug!(outcome = outcome.label(), "Vote processed");
        Ok(outcome)
    }

    async fn apply_vote(&self, user: &str, article: ArticleId) -> Result<VoteOutcome> {
        let member = keys::article(article);
        let cutoff = self.clock.now() - self.config.eligibility_window.as_secs_f64();

        match self.store.zscore(keys::TIME_INDEX, &member).await? {
            Some(posted) if posted >= cutoff => {}
            _ => return Ok(VoteOutcome::Ineligible),
        }

        if !self.store.sadd(&keys::voted(article), user).await? {
            return Ok(VoteOutcome::Duplicate);
        }

        self.store
            .zincrby(keys::SCORE_INDEX, &member, self.config.vote_bonus)
            .await?;
        self.store.hincrby(&member, "votes", 1).await?;
        Ok(VoteOutcome::Accepted)
    }

    /// Fetch one article record
    pub async fn get_article(&self, article: ArticleId) -> Result<Option<Article>> {
        let member = keys::article(article);
        let fields = self.store.hgetall(&member).await?;
        Ok(Article::from_fields(member, fields))
    }

    /// A 1-based page of articles from a base index, highest first
    pub async fn get_page(&self, page: usize, order: Order) -> Result<Vec<Article>> {
        self.page_from_index(order.index(), page).await
    }

    /// A 1-based page of articles from any article index, highest first.
    ///
    /// Records deleted between the index read and the fetch are skipped.
    pub async fn page_from_index(&self, index: &str, page: usize) -> Result<Vec<Article>> {
        if page == 0 {
            return Err(Error::InvalidArgument("pages are numbered from 1".to_string()));
        }
        // Offsets past the largest rank the store can address are empty pages
        let size = i64::try_from(self.config.page_size).unwrap_or(i64::MAX);
        let range = i64::try_from(page - 1)
            .ok()
            .and_then(|index| index.checked_mul(size))
            .and_then(|start| Some((start, start.checked_add(size - 1)?)));
        let Some((start, stop)) = range else {
            debug!(page, index, "Page offset out of range");
            return Ok(Vec::new());
        };

        let members = self.store.zrevrange(index, start, stop).await?;
        let fetches = members.iter().map(|member| self.store.hgetall(member));
        let records = join_all(fetches).await;

        let mut articles = Vec::with_capacity(members.len());
        for (member, fields) in members.into_iter().zip(records) {
            match Article::from_fields(member.clone(), fields?) {
                Some(article) => articles.push(article),
                None => warn!(%member, index, "Indexed article has no record, skipping"),
            }
        }
        Ok(articles)
    }

    /// A page of one group's articles.
    ///
    /// The group index is derived on demand by intersecting the membership
    /// set with the base index, and kept for the configured TTL.
    #[instrument(skip(self))]
    pub async fn group_view(&self, group: &str, page: usize, order: Order) -> Result<Vec<Article>> {
        let key = keys::group_view(order.index(), group);
        if !self.store.exists(&key).await? {
            let sources = [
                (keys::group(group), 1.0),
                (order.index().to_string(), 1.0),
            ];
            let size = self
                .store
                .zinterstore(&key, &sources, Aggregate::Max)
                .await?;
            self.store.expire(&key, self.config.group_view_ttl).await?;
            debug!(%key, size, "Derived group index");
        }
        self.page_from_index(&key, page).await
    }

    /// Add an article to some groups and remove it from others
    pub async fn set_group_membership(
        &self,
        article: ArticleId,
        add: &[&str],
        remove: &[&str],
    ) -> Result<()> {
        let member = keys::article(article);
        for group in add {
            self.store.sadd(&keys::group(group), &member).await?;
        }
        for group in remove {
            self.store.srem(&keys::group(group), &member).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryStore, ManualClock};
    use std::time::Duration;

    const T0: f64 = 1_700_000_000.0;

    fn engine() -> (RankingEngine, Arc<InMemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let engine = RankingEngine::new(store.clone(), clock.clone(), RankingConfig::default());
        (engine, store, clock)
    }

    #[tokio::test]
    async fn test_post_writes_record_and_indexes() {
        let (engine, store, _) = engine();
        let id = engine.post("bob", "T", "L").await.unwrap();
        assert_eq!(id, ArticleId(1));

        let article = engine.get_article(id).await.unwrap().unwrap();
        assert_eq!(article.id, "article:1");
        assert_eq!(article.title, "T");
        assert_eq!(article.poster, "bob");
        assert_eq!(article.votes, 1);
        assert_eq!(article.time, T0);

        assert_eq!(
            store.zscore("score:", "article:1").await.unwrap(),
            Some(T0 + 432.0)
        );
        assert_eq!(store.zscore("time:", "article:1").await.unwrap(), Some(T0));
        assert!(store.sismember("voted:1", "bob").await.unwrap());
        assert_eq!(
            store.ttl("voted:1"),
            Some(Duration::from_secs(7 * 86_400))
        );
    }

    #[tokio::test]
    async fn test_post_rejects_empty_title() {
        let (engine, store, _) = engine();
        let err = engine.post("bob", "  ", "L").await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(!store.exists("article:").await.unwrap());
    }

    #[tokio::test]
    async fn test_vote_once_then_duplicate() {
        let (engine, store, _) = engine();
        let id = engine.post("bob", "T", "L").await.unwrap();

        assert_eq!(engine.vote("alice", id).await.unwrap(), VoteOutcome::Accepted);
        assert_eq!(engine.get_article(id).await.unwrap().unwrap().votes, 2);
        assert_eq!(
            store.zscore("score:", "article:1").await.unwrap(),
            Some(T0 + 864.0)
        );

        assert_eq!(engine.vote("alice", id).await.unwrap(), VoteOutcome::Duplicate);
        assert_eq!(engine.get_article(id).await.unwrap().unwrap().votes, 2);
        assert_eq!(
            store.zscore("score:", "article:1").await.unwrap(),
            Some(T0 + 864.0)
        );
    }

    #[tokio::test]
    async fn test_poster_vote_is_duplicate() {
        let (engine, _, _) = engine();
        let id = engine.post("bob", "T", "L").await.unwrap();
        assert_eq!(engine.vote("bob", id).await.unwrap(), VoteOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_vote_window_boundary() {
        let (engine, store, clock) = engine();
        let id = engine.post("bob", "T", "L").await.unwrap();

        // Exactly one window old still counts
        clock.advance(Duration::from_secs(7 * 86_400));
        assert_eq!(engine.vote("carol", id).await.unwrap(), VoteOutcome::Accepted);

        clock.advance(Duration::from_secs(1));
        assert_eq!(engine.vote("dave", id).await.unwrap(), VoteOutcome::Ineligible);
        assert_eq!(engine.get_article(id).await.unwrap().unwrap().votes, 2);
        assert_eq!(
            store.zscore("score:", "article:1").await.unwrap(),
            Some(T0 + 864.0)
        );
    }

    #[tokio::test]
    async fn test_vote_on_unknown_article_is_ineligible() {
        let (engine, _, _) = engine();
        assert_eq!(
            engine.vote("alice", ArticleId(99)).await.unwrap(),
            VoteOutcome::Ineligible
        );
    }

    #[tokio::test]
    async fn test_pages_are_ordered_and_bounded() {
        let (engine, _, clock) = engine();
        for i in 0..30 {
            engine
                .post("bob", &format!("title {}", i), "http://example.com")
                .await
                .unwrap();
            clock.advance(Duration::from_secs(1));
        }

        let first = engine.get_page(1, Order::Time).await.unwrap();
        let second = engine.get_page(2, Order::Time).await.unwrap();
        assert_eq!(first.len(), 25);
        assert_eq!(second.len(), 5);
        assert_eq!(first[0].title, "title 29");
        assert!(first.windows(2).all(|w| w[0].time >= w[1].time));
        assert!(first.last().unwrap().time >= second[0].time);

        assert!(engine.get_page(3, Order::Time).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_page_zero_is_rejected() {
        let (engine, _, _) = engine();
        assert!(engine.get_page(0, Order::Score).await.is_err());
    }

    #[tokio::test]
    async fn test_huge_page_numbers_are_empty() {
        let (engine, _, clock) = engine();
        for i in 0..30 {
            engine.post("bob", &format!("t{}", i), "L").await.unwrap();
            clock.advance(Duration::from_secs(1));
        }

        for page in [usize::MAX, 1 << 62, (i64::MAX as usize) / 25 + 2] {
            let articles = engine.get_page(page, Order::Time).await.unwrap();
            assert!(articles.is_empty(), "page {} returned {:?}", page, articles);
        }
    }

    #[tokio::test]
    async fn test_page_skips_missing_records() {
        let (engine, store, _) = engine();
        engine.post("bob", "kept", "L").await.unwrap();
        engine.post("bob", "gone", "L").await.unwrap();
        store.delete(&["article:2".to_string()]).await.unwrap();

        let page = engine.get_page(1, Order::Score).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].title, "kept");
    }

    #[tokio::test]
    async fn test_group_view() {
        let (engine, store, clock) = engine();
        let a = engine.post("bob", "a", "L").await.unwrap();
        let b = engine.post("bob", "b", "L").await.unwrap();
        let c = engine.post("bob", "c", "L").await.unwrap();
        engine.vote("alice", c).await.unwrap();

        engine.set_group_membership(a, &["rust"], &[]).await.unwrap();
        engine.set_group_membership(c, &["rust", "go"], &[]).await.unwrap();
        engine.set_group_membership(b, &["go"], &[]).await.unwrap();

        let view = engine.group_view("rust", 1, Order::Score).await.unwrap();
        let titles: Vec<_> = view.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["c", "a"]);
        assert_eq!(store.ttl("score:rust"), Some(Duration::from_secs(60)));

        // Cached view does not see membership changes until it expires
        engine.set_group_membership(b, &["rust"], &[]).await.unwrap();
        assert_eq!(engine.group_view("rust", 1, Order::Score).await.unwrap().len(), 2);

        clock.advance(Duration::from_secs(60));
        assert_eq!(engine.group_view("rust", 1, Order::Score).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_group_membership_removal() {
        let (engine, store, _) = engine();
        let a = engine.post("bob", "a", "L").await.unwrap();
        engine.set_group_membership(a, &["rust", "go"], &[]).await.unwrap();
        engine.set_group_membership(a, &[], &["go"]).await.unwrap();

        assert!(store.sismember("group:rust", "article:1").await.unwrap());
        assert!(!store.sismember("group:go", "article:1").await.unwrap());
    }

    #[test]
    fn test_article_from_partial_fields() {
        let mut fields = HashMap::new();
        fields.insert("title".to_string(), "T".to_string());
        let article = Article::from_fields("article:3".to_string(), fields).unwrap();
        assert_eq!(article.title, "T");
        assert_eq!(article.votes, 0);
        assert_eq!(article.article_id(), Some(ArticleId(3)));

        assert!(Article::from_fields("article:4".to_string(), HashMap::new()).is_none());
    }
}
