//! Inventory Row Provider
//!
//! Stub implementation of the `RowProvider` port. Rows carry a placeholder
//! payload; only their identity and render time matter to the row cache.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashSet;
use tracing::trace;

use crate::domain::ports::{RowProvider, RowRecord};
use crate::error::Result;

/// Placeholder payload written for every row
pub const STUB_PAYLOAD: &str = "data to cache...";

/// Row provider that renders every row id as a stub inventory record.
///
/// Row ids can be withdrawn to simulate rows deleted from the database.
#[derive(Debug, Default)]
pub struct InventoryProvider {
    withdrawn: DashSet<String>,
    fetches: AtomicU64,
}

impl InventoryProvider {
    /// Create a new provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `row_id` disappear from the backing data
    pub fn withdraw(&self, row_id: &str) {
        self.withdrawn.insert(row_id.to_string());
    }

    /// Number of rows rendered so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RowProvider for InventoryProvider {
    async fn fetch_row(&self, row_id: &str, now: f64) -> Result<Option<RowRecord>> {
        if self.withdrawn.contains(row_id) {
            return Ok(None);
        }
        self.fetches.fetch_add(1, Ordering::Relaxed);
        trace!(row_id, "Rendering inventory row");
        Ok(Some(RowRecord {
            id: row_id.to_string(),
            data: STUB_PAYLOAD.to_string(),
            cached: now,
        }))
    }
}
