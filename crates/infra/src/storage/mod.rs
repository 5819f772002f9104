//! Key-value stores backing the cache and the offline queue
//!
//! - [`MemoryStore`]: process-local map, used by tests and as the default
//! - [`FileStore`]: one JSON file per key with atomic replace

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
