//! Key Namespaces
//!
//! Every key the backend persists is built here so the layout stays
//! wire-compatible with data written by earlier deployments.

use crate::domain::ports::ArticleId;

/// Counter allocating article ids
pub const ARTICLE_COUNTER: &str = "article:";
/// Ordered index: article member -> vote-weighted score
pub const SCORE_INDEX: &str = "score:";
/// Ordered index: article member -> creation time
pub const TIME_INDEX: &str = "time:";
/// Hash: session token -> user
pub const LOGIN: &str = "login:";
/// Ordered index: session token -> last-seen time
pub const RECENT: &str = "recent:";
/// Ordered index: item -> negative decayed view count
pub const VIEWED: &str = "viewed:";
/// Ordered index: row id -> refresh interval in seconds
pub const DELAY: &str = "delay:";
/// Ordered index: row id -> next refresh time
pub const SCHEDULE: &str = "schedule:";

/// Article record hash, also the member name inside the article indexes
pub fn article(id: ArticleId) -> String {
    format!("article:{}", id)
}

/// Set of users who voted for an article
pub fn voted(id: ArticleId) -> String {
    format!("voted:{}", id)
}

/// Set of article members belonging to a group
pub fn group(name: &str) -> String {
    format!("group:{}", name)
}

/// Derived index of a group's articles ordered by `order`
pub fn group_view(order: &str, group: &str) -> String {
    format!("{}{}", order, group)
}

/// Items a session viewed, by view time. An empty token would alias [`VIEWED`].
pub fn session_viewed(token: &str) -> String {
    format!("viewed:{}", token)
}

/// Shopping cart of a session
pub fn cart(session: &str) -> String {
    format!("cart:{}", session)
}

/// Rendered page for a request fingerprint
pub fn cached_page(fingerprint: &str) -> String {
    format!("cache:{}", fingerprint)
}

/// Materialized row payload
pub fn row_slot(row_id: &str) -> String {
    format!("inv:{}", row_id)
}
