//! Request fingerprinting
//!
//! The fingerprint is a blake3 hash over the method, the normalized URL,
//! the non-volatile headers (lowercased, sorted) and the body. Header
//! insertion order, query parameter order and URL fragments never change
//! the result.

use resilink_domain::ApiRequest;
use url::Url;

/// Headers that vary per attempt or per user, or only carry caching
/// directives, and never affect the response identity
pub const VOLATILE_HEADERS: &[&str] = &[
    "authorization",
    "cache-control",
    "pragma",
    "user-agent",
    "x-request-id",
    "x-correlation-id",
    "traceparent",
    "tracestate",
    "if-none-match",
    "if-modified-since",
];

/// Stable hex fingerprint for `request`
pub fn fingerprint(request: &ApiRequest) -> String {
    let url = request.url().map_or_else(|_| request.display_url(), |url| normalize_url(&url));

    let mut headers: Vec<(String, &str)> = request
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
        .filter(|(name, _)| !VOLATILE_HEADERS.contains(&name.as_str()))
        .collect();
    headers.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    hasher.update(request.method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    for (name, value) in &headers {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(b"\n");
    if let Some(body) = &request.body {
        hasher.update(body);
    }
    hex::encode(hasher.finalize().as_bytes())
}

/// URL with the fragment dropped and query parameters sorted
///
/// Scheme and host case and default ports are already normalized by the
/// `url` parser.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if pairs.is_empty() {
        normalized.set_query(None);
    } else {
        pairs.sort();
        normalized.query_pairs_mut().clear().extend_pairs(pairs);
    }
    normalized.into()
}
