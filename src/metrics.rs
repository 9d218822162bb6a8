//! Prometheus Metrics
//!
//! Process-wide counters for the request paths and background loops,
//! registered once in a dedicated registry and exposed by the binary's
//! `/metrics` endpoint.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Registry holding every kvfront metric
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric definition is static");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registered once");
    counter
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .expect("metric definition is static");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric registered once");
    counter
}

/// Articles created
pub static ARTICLES_POSTED: Lazy<IntCounter> =
    Lazy::new(|| counter("kvfront_articles_posted_total", "Articles posted"));

/// Votes by outcome: accepted, duplicate, ineligible
pub static VOTES: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "kvfront_votes_total",
        "Votes received by outcome",
        &["outcome"],
    )
});

/// Sessions removed by the eviction loop
pub static SESSIONS_EVICTED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "kvfront_sessions_evicted_total",
        "Sessions evicted for exceeding the token ceiling",
    )
});

/// Page cache lookups by result: hit, miss, bypass
pub static PAGE_CACHE: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "kvfront_page_cache_requests_total",
        "Page cache requests by result",
        &["result"],
    )
});

/// Row cache dispatcher events: refreshed, evicted, missing
pub static ROW_CACHE: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "kvfront_row_cache_events_total",
        "Row cache dispatcher events",
        &["event"],
    )
});

/// Completed trim-and-decay passes over the popularity index
pub static POPULARITY_RESCALES: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "kvfront_popularity_rescales_total",
        "Popularity index rescale passes",
    )
});

/// Gather every family for text exposition
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    // Touch each metric so families appear before their first event
    Lazy::force(&ARTICLES_POSTED);
    Lazy::force(&VOTES);
    Lazy::force(&SESSIONS_EVICTED);
    Lazy::force(&PAGE_CACHE);
    Lazy::force(&ROW_CACHE);
    Lazy::force(&POPULARITY_RESCALES);
    REGISTRY.gather()
}
