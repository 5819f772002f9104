//! Pooled HTTP transport
//!
//! [`ConnectionPool`] owns the reqwest client and the connection ceilings;
//! [`PooledTransport`] is the [`Transport`](resilink_core::Transport) handed
//! to the pipeline and the offline queue.

pub mod pool;
pub mod transport;

pub use pool::ConnectionPool;
pub use transport::{classify_error, PooledTransport};
