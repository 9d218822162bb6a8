//! Domain Layer
//!
//! Ports the components are written against, plus the small value objects
//! that cross them.
//!
//! # Usage
//!
//! ```ignore
//! use kvfront::domain::ports::{Clock, KvStore};
//!
//! async fn touch<S: KvStore + ?Sized>(store: &S, clock: &dyn Clock) -> Result<()> {
//!     store.zadd("recent:", "token", clock.now()).await?;
//!     Ok(())
//! }
//! ```

pub mod ports;

// Re-export commonly used types
pub use ports::{
    // Port traits
    Clock,
    KvStore,
    RequestClassifier,
    RowProvider,
    // Value objects
    Aggregate,
    ArticleId,
    RowRecord,
};
