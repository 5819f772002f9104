//! # Resilink Domain
//!
//! Plain data types shared by every layer of the resilience stack.
//!
//! This crate contains:
//! - Request/response descriptors and the typed per-request context
//! - Cache entries, queued requests, metric records and pool snapshots
//! - The `ApiError` taxonomy surfaced to callers
//! - Configuration structures with their documented defaults
//!
//! ## Architecture
//! - Depends only on `resilink-common` foundations
//! - No I/O, no async runtime

pub mod config;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
