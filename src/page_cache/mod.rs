//! Page cache module
//!
//! Fingerprinted, TTL-bounded cache of rendered pages gated by item
//! popularity.

mod cache;

pub use cache::{fingerprint, CacheOutcome, PageCache};
