//! Cache identity and freshness rules
//!
//! - [`fingerprint`]: deterministic request identity
//! - [`control`]: `Cache-Control` parsing, storability and freshness
//! - [`http_date`]: HTTP date parsing for `Expires`, `Last-Modified` and
//!   `Retry-After`

pub mod control;
pub mod fingerprint;
pub mod http_date;
