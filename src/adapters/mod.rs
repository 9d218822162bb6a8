//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  KvStore │ Clock │ RowProvider │ RequestClassifier         │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ InMemoryStore │ SystemClock │ ManualClock                 │ │
//! │  │ InventoryProvider                                          │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use kvfront::adapters::{InMemoryStore, ManualClock};
//! use kvfront::domain::ports::KvStore;
//!
//! let clock = Arc::new(ManualClock::new(1_700_000_000.0));
//! let store = InMemoryStore::with_clock(clock.clone());
//!
//! // Use it through the domain port trait
//! store.zadd("recent:", "token", 1_700_000_000.0).await?;
//! ```

mod clock;
mod inventory;
mod memory;

pub use clock::{ManualClock, SystemClock};
pub use inventory::{InventoryProvider, STUB_PAYLOAD};
pub use memory::{InMemoryStore, StoreStats};
