//! Runtime configuration
//!
//! Plain structs with `Default` impls carrying every tunable constant.
//! The binary maps its CLI arguments onto [`AppConfig`].

use std::time::Duration;

use crate::error::{Error, Result};

// =============================================================================
// Ranking
// =============================================================================

/// Configuration for the ranking engine
#[derive(Debug, Clone)]
pub struct RankingConfig {
    /// Score added per accepted vote, including the poster's own
    pub vote_bonus: f64,

    /// How long after posting an article accepts votes
    pub eligibility_window: Duration,

    /// Articles per page
    pub page_size: usize,

    /// Lifetime of a derived group view
    pub group_view_ttl: Duration,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            // A day's worth of seconds spread over 200 votes
            vote_bonus: 432.0,
            eligibility_window: Duration::from_secs(7 * 86_400),
            page_size: 25,
            group_view_ttl: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// What the eviction loop removes along with each stale token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionMode {
    /// Login binding, recency entry and viewed-items index
    #[default]
    SessionsOnly,
    /// Everything in `SessionsOnly` plus the shopping cart
    WithCarts,
}

impl std::str::FromStr for EvictionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sessions" | "sessions-only" => Ok(EvictionMode::SessionsOnly),
            "full" | "with-carts" => Ok(EvictionMode::WithCarts),
            other => Err(Error::Config(format!("unknown eviction mode: {}", other))),
        }
    }
}

/// Configuration for the session manager
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Token count above which the oldest sessions are evicted
    pub max_tokens: u64,

    /// Viewed items kept per session
    pub viewed_cap: usize,

    /// Upper bound on sessions evicted per iteration
    pub eviction_batch: u64,

    /// Sleep between checks while under the ceiling
    pub idle_interval: Duration,

    /// Eviction variant
    pub mode: EvictionMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10_000_000,
            viewed_cap: 25,
            eviction_batch: 100,
            idle_interval: Duration::from_secs(1),
            mode: EvictionMode::SessionsOnly,
        }
    }
}

// =============================================================================
// Popularity
// =============================================================================

/// Configuration for the popularity tracker
#[derive(Debug, Clone)]
pub struct PopularityConfig {
    /// Period between trim-and-decay passes
    pub rescale_interval: Duration,

    /// Items retained by each trim
    pub retained: u64,

    /// Multiplier applied to every score on each pass
    pub decay_factor: f64,

    /// Items ranked below this are eligible for the page cache
    pub cacheable_rank_limit: u64,
}

impl Default for PopularityConfig {
    fn default() -> Self {
        Self {
            rescale_interval: Duration::from_secs(300),
            retained: 20_000,
            decay_factor: 0.5,
            cacheable_rank_limit: 10_000,
        }
    }
}

// =============================================================================
// Caches
// =============================================================================

/// Configuration for the page cache
#[derive(Debug, Clone)]
pub struct PageCacheConfig {
    /// Lifetime of a cached page
    pub ttl: Duration,
}

impl Default for PageCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
        }
    }
}

/// Configuration for the row cache scheduler
#[derive(Debug, Clone)]
pub struct RowCacheConfig {
    /// Sleep while no row is due
    pub poll_interval: Duration,
}

impl Default for RowCacheConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
        }
    }
}

// =============================================================================
// Aggregate
// =============================================================================

/// Configuration for every component
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub ranking: RankingConfig,
    pub session: SessionConfig,
    pub popularity: PopularityConfig,
    pub page_cache: PageCacheConfig,
    pub row_cache: RowCacheConfig,
}

impl AppConfig {
    /// Reject configurations the components cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ranking.page_size == 0 {
            return Err(Error::Config("page_size must be positive".to_string()));
        }
        if self.session.viewed_cap == 0 {
            return Err(Error::Config("viewed_cap must be positive".to_string()));
        }
        if self.session.eviction_batch == 0 {
            return Err(Error::Config("eviction_batch must be positive".to_string()));
        }
        if !(self.popularity.decay_factor > 0.0 && self.popularity.decay_factor <= 1.0) {
            return Err(Error::Config(format!(
                "decay_factor must be in (0, 1], got {}",
                self.popularity.decay_factor
            )));
        }
        if self.session.max_tokens == 0 {
            return Err(Error::Config("max_tokens must be positive".to_string()));
        }
        for (name, interval) in [
            ("idle_interval", self.session.idle_interval),
            ("rescale_interval", self.popularity.rescale_interval),
            ("poll_interval", self.row_cache.poll_interval),
        ] {
            if interval.is_zero() {
                return Err(Error::Config(format!("{} must be positive", name)));
            }
        }
        if self.popularity.cacheable_rank_limit > self.popularity.retained {
            return Err(Error::Config(format!(
                "cacheable_rank_limit ({}) exceeds retained items ({})",
                self.popularity.cacheable_rank_limit, self.popularity.retained
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.ranking.vote_bonus, 432.0);
        assert_eq!(config.ranking.eligibility_window.as_secs(), 604_800);
        assert_eq!(config.ranking.page_size, 25);
        assert_eq!(config.session.viewed_cap, 25);
        assert_eq!(config.session.eviction_batch, 100);
        assert_eq!(config.popularity.retained, 20_000);
        assert_eq!(config.popularity.cacheable_rank_limit, 10_000);
        assert_eq!(config.page_cache.ttl.as_secs(), 300);
        assert_eq!(config.row_cache.poll_interval.as_millis(), 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_eviction_mode_parse() {
        assert_eq!(
            "sessions".parse::<EvictionMode>().unwrap(),
            EvictionMode::SessionsOnly
        );
        assert_eq!(
            "with-carts".parse::<EvictionMode>().unwrap(),
            EvictionMode::WithCarts
        );
        assert!("bogus".parse::<EvictionMode>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_decay() {
        let mut config = AppConfig::default();
        config.popularity.decay_factor = 1.5;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_intervals_and_ceiling() {
        let mut config = AppConfig::default();
        config.row_cache.poll_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("poll_interval")));

        let mut config = AppConfig::default();
        config.popularity.rescale_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("rescale_interval")));

        let mut config = AppConfig::default();
        config.session.idle_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.max_tokens = 0;
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("max_tokens")));

        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let mut config = AppConfig::default();
        config.ranking.page_size = 0;
        assert!(config.validate().is_err());
    }
}
