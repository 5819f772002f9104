//! Common utility functions
//!
//! - **[`serde`]**: Serialization helpers for durations and binary payloads

pub mod serde;

// Re-export commonly used items for convenience
pub use self::serde::{base64_bytes, duration_millis};
