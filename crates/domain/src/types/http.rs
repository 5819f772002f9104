//! HTTP request/response descriptors
//!
//! These are transport-agnostic: the pipeline, cache and queue only ever see
//! these types, and the reqwest adapter converts at the edge.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::errors::ApiError;

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

crate::impl_domain_enum_conversions!(HttpMethod {
    Get => "GET",
    Head => "HEAD",
    Post => "POST",
    Put => "PUT",
    Patch => "PATCH",
    Delete => "DELETE",
    Options => "OPTIONS",
});

impl HttpMethod {
    /// Repeating the request has the same effect as sending it once
    pub const fn is_idempotent(&self) -> bool {
        !matches!(self, Self::Post | Self::Patch)
    }

    /// The request has no server-side effect
    pub const fn is_safe(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options)
    }
}

impl Serialize for HttpMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HttpMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Ordered header list with case-insensitive lookup
///
/// Insertion order is preserved. Serializes as a JSON object; repeated
/// names are folded into one comma-separated value on the way out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value stored under `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    /// Every value stored under `name`, in insertion order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set `name` to `value`, replacing any existing values
    ///
    /// The replacement keeps the position of the first existing value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(pos) = self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            self.entries[pos].1 = value;
            let mut index = 0;
            self.entries.retain(|(k, _)| {
                let keep = index <= pos || !k.eq_ignore_ascii_case(&name);
                index += 1;
                keep
            });
        } else {
            self.entries.push((name, value));
        }
    }

    /// Add a value under `name` without touching existing ones
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Remove every value stored under `name`, returning the first
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let first = self.get(name).map(str::to_owned);
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        first
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut folded: Vec<(&str, String)> = Vec::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            match folded.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                Some((_, existing)) => {
                    existing.push_str(", ");
                    existing.push_str(value);
                }
                None => folded.push((name.as_str(), value.clone())),
            }
        }
        let mut map = serializer.serialize_map(Some(folded.len()))?;
        for (name, value) in &folded {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Headers;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of header names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Headers, A::Error> {
                let mut headers = Headers::new();
                while let Some((name, value)) = access.next_entry::<String, String>()? {
                    headers.append(name, value);
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// A request the pipeline can send, cache, queue and replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Scheme and authority, optionally with a path prefix. Empty when `path`
    /// is already absolute.
    pub base_url: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            base_url: String::new(),
            path: path.into(),
            query: Vec::new(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Head, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attach a JSON body and set `Content-Type` accordingly
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, ApiError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| ApiError::InvalidRequest(format!("body is not serializable: {e}")))?;
        self.headers.insert("Content-Type", "application/json");
        self.body = Some(body);
        Ok(self)
    }

    /// Absolute URL: base URL + path + query parameters
    pub fn url(&self) -> Result<Url, ApiError> {
        let raw = if self.base_url.is_empty() {
            self.path.clone()
        } else if self.path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), self.path.trim_start_matches('/'))
        };
        let mut url = Url::parse(&raw)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid url '{raw}': {e}")))?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }

    /// URL for logs and metrics; falls back to the raw parts when unparsable
    pub fn display_url(&self) -> String {
        self.url().map_or_else(|_| format!("{}{}", self.base_url, self.path), String::from)
    }

    /// `METHOD /path`, query stripped
    pub fn endpoint(&self) -> String {
        let path = match self.url() {
            Ok(url) => url.path().to_owned(),
            Err(_) => self.path.split('?').next().unwrap_or_default().to_owned(),
        };
        format!("{} {}", self.method, path)
    }
}

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Fresh from the network
    Network,
    /// Served from the cache without a transport call
    Cache,
    /// Cached body confirmed by a 304
    Revalidated,
    /// Synthetic answer for a request accepted into the offline queue
    Queued,
}

crate::impl_domain_enum_conversions!(ResponseSource {
    Network => "network",
    Cache => "cache",
    Revalidated => "revalidated",
    Queued => "queued",
});

/// Header carrying the offline queue id on a synthetic queued response
pub const QUEUED_ID_HEADER: &str = "x-resilink-queued-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl ApiResponse {
    pub fn new(status: u16, headers: Headers, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers, body: body.into(), source: ResponseSource::Network }
    }

    /// `202 Accepted` returned in place of a request that was queued offline
    pub fn queued(queue_id: &str) -> Self {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json");
        headers.insert(QUEUED_ID_HEADER, queue_id);
        let body = serde_json::json!({ "queued": true, "id": queue_id }).to_string();
        Self { status: 202, headers, body: body.into_bytes(), source: ResponseSource::Queued }
    }

    #[must_use]
    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    pub const fn is_queued(&self) -> bool {
        matches!(self.source, ResponseSource::Queued)
    }

    /// Queue id when this is a synthetic queued response
    pub fn queued_id(&self) -> Option<&str> {
        if self.is_queued() {
            self.headers.get(QUEUED_ID_HEADER)
        } else {
            None
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::Decode(format!("response body is not valid JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_properties() {
        assert!(HttpMethod::Get.is_idempotent() && HttpMethod::Get.is_safe());
        assert!(HttpMethod::Put.is_idempotent() && !HttpMethod::Put.is_safe());
        assert!(HttpMethod::Delete.is_idempotent());
        assert!(!HttpMethod::Post.is_idempotent());
        assert!(!HttpMethod::Patch.is_idempotent());
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert_eq!(serde_json::to_string(&HttpMethod::Head).unwrap(), "\"HEAD\"");
    }

    #[test]
    fn test_headers_case_insensitive_replace() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        headers.append("Accept", "a");
        headers.append("accept", "b");
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(headers.get_all("ACCEPT").collect::<Vec<_>>(), vec!["a", "b"]);

        headers.insert("ACCEPT", "c");
        assert_eq!(headers.get_all("accept").collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(headers.len(), 2);

        assert_eq!(headers.remove("content-type"), Some("text/plain".to_string()));
        assert!(!headers.contains("Content-Type"));
    }

    #[test]
    fn test_headers_serde_preserves_order_and_folds() {
        let headers: Headers =
            [("X-B", "2"), ("X-A", "1"), ("x-b", "3")].into_iter().collect();
        let json = serde_json::to_string(&headers).unwrap();
        assert_eq!(json, r#"{"X-B":"2, 3","X-A":"1"}"#);

        let back: Headers = serde_json::from_str(r#"{"Z":"1","A":"2"}"#).unwrap();
        let names: Vec<_> = back.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["Z", "A"]);
    }

    #[test]
    fn test_request_url_assembly() {
        let request = ApiRequest::get("/items/1")
            .with_base_url("https://api.example.com/v1/")
            .with_query("expand", "owner")
            .with_query("q", "a b");
        assert_eq!(
            request.url().unwrap().as_str(),
            "https://api.example.com/v1/items/1?expand=owner&q=a+b"
        );
        assert_eq!(request.endpoint(), "GET /v1/items/1");
    }

    #[test]
    fn test_request_absolute_path_and_invalid_url() {
        let request = ApiRequest::delete("https://api.example.com/notes/9");
        assert_eq!(request.url().unwrap().path(), "/notes/9");

        let bad = ApiRequest::get("/relative-only");
        assert!(matches!(bad.url(), Err(ApiError::InvalidRequest(_))));
        assert_eq!(bad.endpoint(), "GET /relative-only");
    }

    #[test]
    fn test_with_json_sets_content_type() {
        let request = ApiRequest::post("/notes").with_json(&serde_json::json!({"t": 1})).unwrap();
        assert_eq!(request.headers.get("content-type"), Some("application/json"));
        assert_eq!(request.body.as_deref(), Some(br#"{"t":1}"#.as_slice()));
    }

    #[test]
    fn test_queued_response() {
        let response = ApiResponse::queued("123-abc");
        assert_eq!(response.status, 202);
        assert!(response.is_queued());
        assert_eq!(response.queued_id(), Some("123-abc"));
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["queued"], true);
    }
}
