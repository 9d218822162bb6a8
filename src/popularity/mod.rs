//! Popularity module
//!
//! Decayed global view counts and the page cache admission check built on
//! them.

mod classifier;
mod tracker;

pub use classifier::{QueryParamClassifier, ITEM_PARAM, NONCE_PARAM};
pub use tracker::PopularityTracker;
