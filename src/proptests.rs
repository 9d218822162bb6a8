//! Property-Based Tests
//!
//! # Test Properties
//!
//! 1. **Pagination**: pages are disjoint, at most `page_size` long, and
//!    concatenate to the whole index in descending order
//! 2. **Cart**: the cart matches the last quantity set per item, with
//!    non-positive quantities removing the item
//! 3. **Viewed cap**: a session never remembers more than `viewed_cap` items

#![cfg(test)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use crate::adapters::{InMemoryStore, ManualClock};
use crate::config::{PopularityConfig, RankingConfig, SessionConfig};
use crate::domain::ports::{ArticleId, KvStore};
use crate::popularity::PopularityTracker;
use crate::ranking::{Order, RankingEngine};
use crate::session::SessionManager;

// =============================================================================
// Property Strategies
// =============================================================================

/// Number of articles and voters per article
fn catalog_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..4, 0..20)
}

/// (item, quantity) updates drawn from a small item pool
fn cart_ops_strategy() -> impl Strategy<Value = Vec<(usize, i64)>> {
    prop::collection::vec((0usize..5, -2i64..6), 0..40)
}

fn setup() -> (Arc<InMemoryStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_700_000_000.0));
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    (store, clock)
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_pages_partition_the_index(voters in catalog_strategy(), page_size in 1usize..6) {
        tokio_test::block_on(async {
            let (store, clock) = setup();
            let config = RankingConfig { page_size, ..Default::default() };
            let engine = RankingEngine::new(store.clone(), clock.clone(), config);

            for (n, extra) in voters.iter().enumerate() {
                let id = engine.post("poster", &format!("t{}", n), "http://l").await.unwrap();
                for v in 0..*extra {
                    engine.vote(&format!("voter{}", v), id).await.unwrap();
                }
                clock.advance(Duration::from_secs(1));
            }

            for order in [Order::Score, Order::Time] {
                let expected = store.zrevrange(order.index(), 0, -1).await.unwrap();
                let mut seen = Vec::new();
                let mut page = 1;
                loop {
                    let articles = engine.get_page(page, order).await.unwrap();
                    prop_assert!(articles.len() <= page_size);
                    if articles.is_empty() {
                        break;
                    }
                    seen.extend(articles.into_iter().map(|a| a.id));
                    page += 1;
                }
                prop_assert_eq!(&seen, &expected);
                prop_assert_eq!(seen.len(), voters.len());
            }

            // Time order is newest first
            if !voters.is_empty() {
                let first = engine.get_page(1, Order::Time).await.unwrap();
                prop_assert_eq!(first[0].article_id(), Some(ArticleId(voters.len() as u64)));
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_cart_tracks_last_quantity(ops in cart_ops_strategy()) {
        tokio_test::block_on(async {
            let (store, clock) = setup();
            let popularity = Arc::new(PopularityTracker::new(store.clone(), PopularityConfig::default()));
            let sessions = SessionManager::new(store, clock, popularity, SessionConfig::default());

            let mut model: HashMap<String, i64> = HashMap::new();
            for (item, quantity) in &ops {
                let item = format!("item{}", item);
                sessions.add_to_cart("s", &item, *quantity).await.unwrap();
                if *quantity > 0 {
                    model.insert(item, *quantity);
                } else {
                    model.remove(&item);
                }
            }

            prop_assert_eq!(sessions.cart("s").await.unwrap(), model);
            Ok(())
        })?;
    }

    #[test]
    fn prop_viewed_items_stay_capped(views in prop::collection::vec(0usize..40, 0..80), cap in 1usize..10) {
        tokio_test::block_on(async {
            let (store, clock) = setup();
            let popularity = Arc::new(PopularityTracker::new(store.clone(), PopularityConfig::default()));
            let config = SessionConfig { viewed_cap: cap, ..Default::default() };
            let sessions = SessionManager::new(store, clock.clone(), popularity, config);

            for item in &views {
                sessions.bind_token("t", "u", Some(&format!("item{}", item))).await.unwrap();
                clock.advance(Duration::from_millis(10));
            }

            let viewed = sessions.viewed_items("t").await.unwrap();
            prop_assert!(viewed.len() <= cap);
            if let Some(last) = views.last() {
                prop_assert_eq!(&viewed[0], &format!("item{}", last));
            }
            Ok(())
        })?;
    }
}
