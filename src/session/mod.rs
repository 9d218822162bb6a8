//! Session module
//!
//! Token bindings, viewed-item history, shopping carts and bounded-size
//! session eviction.

mod manager;

pub use crate::config::EvictionMode;
pub use manager::{new_token, SessionManager};
