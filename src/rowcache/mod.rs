//! Row cache module

mod scheduler;

pub use scheduler::{Dispatch, RowCacheScheduler};
