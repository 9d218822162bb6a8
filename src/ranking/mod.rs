//! Ranking module
//!
//! Time-decayed article ranking: posting, voting, paginated retrieval and
//! per-group views.

mod engine;

pub use engine::{Article, Order, RankingEngine, VoteOutcome};
