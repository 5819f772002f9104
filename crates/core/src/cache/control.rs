//! `Cache-Control` parsing, storability and freshness classification

use std::time::Duration;

use chrono::{DateTime, Utc};
use resilink_domain::{ApiRequest, ApiResponse, CacheEntry, Headers, HttpMethod};

use super::http_date::{format_http_date, parse_http_date};

/// Parsed `Cache-Control` directives relevant to a private client cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub max_age: Option<u64>,
    pub must_revalidate: bool,
}

impl CacheControl {
    /// Parse one header value, ignoring unknown or malformed directives
    pub fn parse(value: &str) -> Self {
        let mut control = Self::default();
        control.merge(value);
        control
    }

    /// Combine every `Cache-Control` value; `Pragma: no-cache` counts as
    /// `no-cache`
    pub fn from_headers(headers: &Headers) -> Self {
        let mut control = Self::default();
        for value in headers.get_all("cache-control") {
            control.merge(value);
        }
        if headers.get_all("pragma").any(|v| v.trim().eq_ignore_ascii_case("no-cache")) {
            control.no_cache = true;
        }
        control
    }

    fn merge(&mut self, value: &str) {
        for directive in value.split(',') {
            let mut parts = directive.splitn(2, '=');
            let name = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
            let argument = parts.next().map(|v| v.trim().trim_matches('"'));
            match name.as_str() {
                "no-store" => self.no_store = true,
                "no-cache" => self.no_cache = true,
                "must-revalidate" => self.must_revalidate = true,
                "max-age" => {
                    if let Some(seconds) = argument.and_then(|v| v.parse::<u64>().ok()) {
                        // the most restrictive value wins when repeated
                        self.max_age = Some(self.max_age.map_or(seconds, |m| m.min(seconds)));
                    }
                }
                _ => {}
            }
        }
    }

    /// Response may not be stored at all
    pub const fn forbids_storage(&self) -> bool {
        self.no_store || self.no_cache
    }
}

/// How usable a cached entry is at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within an explicit server-provided lifetime
    Fresh,
    /// No explicit lifetime, still inside the default staleness window
    Stale,
    /// Past its effective expiry
    Expired,
}

impl Freshness {
    pub fn classify(entry: &CacheEntry, now: DateTime<Utc>, default_ttl: Duration) -> Self {
        if entry.is_expired(now, default_ttl) {
            Self::Expired
        } else if entry.expires_at.is_some() {
            Self::Fresh
        } else {
            Self::Stale
        }
    }
}

/// Whether a response to `request` may be written to the cache
pub fn is_storable(
    request: &ApiRequest,
    response: &ApiResponse,
    cacheable_methods: &[HttpMethod],
) -> bool {
    cacheable_methods.contains(&request.method)
        && response.status < 400
        && response.status != 304
        && response.status != 206
        && !CacheControl::from_headers(&request.headers).no_store
        && !CacheControl::from_headers(&response.headers).forbids_storage()
}

/// Explicit expiry carried by the response
///
/// `max-age` (less any `Age`) wins over `Expires`. An unparsable `Expires`
/// means already expired. `None` when the response gives no lifetime.
pub fn explicit_expiry(headers: &Headers, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(max_age) = CacheControl::from_headers(headers).max_age {
        let age = headers.get("age").and_then(|v| v.trim().parse::<u64>().ok()).unwrap_or(0);
        return Some(expiry_after(now, Duration::from_secs(max_age.saturating_sub(age))));
    }
    headers.get("expires").map(|value| parse_http_date(value).unwrap_or(now))
}

/// `now + lifetime`, saturating at the latest representable instant
fn expiry_after(now: DateTime<Utc>, lifetime: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lifetime)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Build the cache entry for a storable response
pub fn entry_from_response(
    fingerprint: String,
    request: &ApiRequest,
    response: &ApiResponse,
    now: DateTime<Utc>,
    ttl_override: Option<Duration>,
) -> CacheEntry {
    let expires_at = match ttl_override {
        Some(ttl) => Some(expiry_after(now, ttl)),
        None => explicit_expiry(&response.headers, now),
    };
    CacheEntry {
        fingerprint,
        url: request.display_url(),
        status: response.status,
        headers: response.headers.clone(),
        body: response.body.clone(),
        created_at: now,
        expires_at,
        etag: response.headers.get("etag").map(str::to_owned),
        last_modified: response.headers.get("last-modified").map(str::to_owned),
    }
}

/// Replacement entry after a 304: same body, new lifetime and any updated
/// headers from the 304
pub fn refreshed_entry(
    entry: &CacheEntry,
    not_modified: &ApiResponse,
    now: DateTime<Utc>,
    ttl_override: Option<Duration>,
) -> CacheEntry {
    let mut headers = entry.headers.clone();
    for (name, value) in not_modified.headers.iter() {
        if !name.eq_ignore_ascii_case("content-length") {
            headers.insert(name, value);
        }
    }
    let expires_at = match ttl_override {
        Some(ttl) => Some(expiry_after(now, ttl)),
        None => explicit_expiry(&headers, now),
    };
    CacheEntry {
        fingerprint: entry.fingerprint.clone(),
        url: entry.url.clone(),
        status: entry.status,
        etag: headers.get("etag").map(str::to_owned).or_else(|| entry.etag.clone()),
        last_modified: headers
            .get("last-modified")
            .map(str::to_owned)
            .or_else(|| entry.last_modified.clone()),
        headers,
        body: entry.body.clone(),
        created_at: now,
        expires_at,
    }
}

/// Add `If-None-Match` / `If-Modified-Since` from the entry's validators
pub fn apply_conditional_headers(request: &mut ApiRequest, entry: &CacheEntry) {
    if let Some(etag) = &entry.etag {
        request.headers.insert("If-None-Match", etag.clone());
    }
    if let Some(last_modified) = &entry.last_modified {
        let value = parse_http_date(last_modified)
            .map_or_else(|| last_modified.clone(), format_http_date);
        request.headers.insert("If-Modified-Since", value);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn response(headers: &[(&str, &str)]) -> ApiResponse {
        ApiResponse::new(200, headers.iter().copied().collect(), b"ok".to_vec())
    }

    #[test]
    fn test_parse_directives() {
        let control = CacheControl::parse("public, max-age=60, must-revalidate");
        assert_eq!(control.max_age, Some(60));
        assert!(control.must_revalidate);
        assert!(!control.forbids_storage());

        let control = CacheControl::parse("No-Store, max-age=\"abc\"");
        assert!(control.no_store);
        assert_eq!(control.max_age, None);

        let headers: Headers = [("Cache-Control", "max-age=300"), ("cache-control", "max-age=30")]
            .into_iter()
            .collect();
        assert_eq!(CacheControl::from_headers(&headers).max_age, Some(30));

        let headers: Headers = [("Pragma", "no-cache")].into_iter().collect();
        assert!(CacheControl::from_headers(&headers).no_cache);
    }

    #[test]
    fn test_storability() {
        let get = ApiRequest::get("https://api.example.com/items");
        let methods = [HttpMethod::Get, HttpMethod::Head];
        assert!(is_storable(&get, &response(&[]), &methods));
        assert!(!is_storable(&get, &response(&[("Cache-Control", "no-store")]), &methods));
        assert!(!is_storable(&get, &response(&[("Cache-Control", "no-cache")]), &methods));
        let post = ApiRequest::post("https://api.example.com/items");
        assert!(!is_storable(&post, &response(&[]), &methods));
        assert!(!is_storable(
            &get.clone().with_header("Cache-Control", "no-store"),
            &response(&[]),
            &methods
        ));

        let not_found = ApiResponse::new(404, Headers::new(), Vec::new());
        assert!(!is_storable(&get, &not_found, &methods));
    }

    #[test]
    fn test_explicit_expiry_sources() {
        let headers: Headers =
            [("Cache-Control", "max-age=60"), ("Age", "20")].into_iter().collect();
        assert_eq!(explicit_expiry(&headers, now()), Some(now() + chrono::Duration::seconds(40)));

        let headers: Headers = [("Expires", "Wed, 01 May 2024 11:00:00 GMT")].into_iter().collect();
        assert_eq!(explicit_expiry(&headers, now()), Some(now() + chrono::Duration::hours(1)));

        let headers: Headers = [("Expires", "0")].into_iter().collect();
        assert_eq!(explicit_expiry(&headers, now()), Some(now()));

        assert_eq!(explicit_expiry(&Headers::new(), now()), None);
    }

    #[test]
    fn test_freshness_classification() {
        let request = ApiRequest::get("https://api.example.com/items/1");
        let ttl = Duration::from_secs(300);

        let explicit = entry_from_response(
            "k".into(),
            &request,
            &response(&[("Cache-Control", "max-age=60")]),
            now(),
            None,
        );
        assert_eq!(Freshness::classify(&explicit, now(), ttl), Freshness::Fresh);
        assert_eq!(
            Freshness::classify(&explicit, now() + chrono::Duration::seconds(61), ttl),
            Freshness::Expired
        );

        let implicit = entry_from_response("k".into(), &request, &response(&[]), now(), None);
        assert_eq!(Freshness::classify(&implicit, now(), ttl), Freshness::Stale);
        assert_eq!(
            Freshness::classify(&implicit, now() + chrono::Duration::seconds(301), ttl),
            Freshness::Expired
        );
    }

    #[test]
    fn test_refresh_keeps_body_and_renews_lifetime() {
        let request = ApiRequest::get("https://api.example.com/items/1");
        let original = entry_from_response(
            "k".into(),
            &request,
            &response(&[("Cache-Control", "max-age=60"), ("ETag", "\"v1\"")]),
            now(),
            None,
        );
        let later = now() + chrono::Duration::seconds(120);
        let not_modified = ApiResponse::new(
            304,
            [("Cache-Control", "max-age=90"), ("Content-Length", "0")].into_iter().collect(),
            Vec::new(),
        );
        let refreshed = refreshed_entry(&original, &not_modified, later, None);
        assert_eq!(refreshed.body, b"ok");
        assert_eq!(refreshed.etag.as_deref(), Some("\"v1\""));
        assert_eq!(refreshed.created_at, later);
        assert_eq!(refreshed.expires_at, Some(later + chrono::Duration::seconds(90)));
        assert!(refreshed.headers.get("content-length").is_none());
    }

    #[test]
    fn test_conditional_headers() {
        let request = ApiRequest::get("https://api.example.com/items/1");
        let entry = entry_from_response(
            "k".into(),
            &request,
            &response(&[("ETag", "\"v2\""), ("Last-Modified", "Wed, 01 May 2024 09:00:00 GMT")]),
            now(),
            None,
        );
        let mut conditional = request.clone();
        apply_conditional_headers(&mut conditional, &entry);
        assert_eq!(conditional.headers.get("if-none-match"), Some("\"v2\""));
        assert_eq!(
            conditional.headers.get("if-modified-since"),
            Some("Wed, 01 May 2024 09:00:00 GMT")
        );
    }
}
