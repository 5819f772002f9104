//! Specialized data structures
//!
//! - **[`lru`]**: bounded least-recently-used map that reports evictions

pub mod lru;

pub use lru::{BoundedLru, Evicted};
