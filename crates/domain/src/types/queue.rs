//! Offline queue records, flush reports and queue statistics

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::http::{ApiRequest, Headers, HttpMethod};

/// A write request waiting for connectivity
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRequest {
    /// `{millis}-{hash}`, unique per enqueue
    pub id: String,
    pub request: ApiRequest,
    pub created_at: DateTime<Utc>,
    /// Higher replays first
    pub priority: i32,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl QueuedRequest {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }

    pub fn is_past_retention(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.age(now) > retention
    }
}

/// Persisted queue record
///
/// `{id, method, path, baseUrl, headers, queryParameters, body, createdAt,
/// priority, metadata}`. The body is kept as a UTF-8 string when it is one
/// and as base64 otherwise, flagged by `bodyEncoding`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequestRecord {
    pub id: String,
    pub method: HttpMethod,
    pub path: String,
    pub base_url: String,
    #[serde(default)]
    pub headers: Headers,
    /// Object keyed by parameter name; a repeated name holds an array
    #[serde(default, with = "query_parameters")]
    pub query_parameters: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_encoding: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

const BASE64_ENCODING: &str = "base64";

impl From<&QueuedRequest> for QueuedRequestRecord {
    fn from(entry: &QueuedRequest) -> Self {
        use base64::Engine as _;

        let (body, body_encoding) = match entry.request.body.as_deref() {
            None => (None, None),
            Some(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => (Some(text.to_owned()), None),
                Err(_) => (
                    Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
                    Some(BASE64_ENCODING.to_owned()),
                ),
            },
        };

        Self {
            id: entry.id.clone(),
            method: entry.request.method,
            path: entry.request.path.clone(),
            base_url: entry.request.base_url.clone(),
            headers: entry.request.headers.clone(),
            query_parameters: entry.request.query.clone(),
            body,
            body_encoding,
            created_at: entry.created_at,
            priority: entry.priority,
            metadata: entry.metadata.clone(),
        }
    }
}

impl TryFrom<QueuedRequestRecord> for QueuedRequest {
    type Error = String;

    fn try_from(record: QueuedRequestRecord) -> Result<Self, Self::Error> {
        use base64::Engine as _;

        let body = match (record.body, record.body_encoding.as_deref()) {
            (None, _) => None,
            (Some(encoded), Some(BASE64_ENCODING)) => Some(
                base64::engine::general_purpose::STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| format!("queued body for '{}' is not base64: {e}", record.id))?,
            ),
            (Some(_), Some(other)) => {
                return Err(format!("unknown body encoding '{other}' for '{}'", record.id))
            }
            (Some(text), None) => Some(text.into_bytes()),
        };

        Ok(Self {
            id: record.id,
            request: ApiRequest {
                method: record.method,
                base_url: record.base_url,
                path: record.path,
                query: record.query_parameters,
                headers: record.headers,
                body,
            },
            created_at: record.created_at,
            priority: record.priority,
            metadata: record.metadata,
        })
    }
}

/// `queryParameters` codec
///
/// Values of one name keep their order. Names appear in first-occurrence
/// order, so `a=1&b=2&a=3` reads back as `a=1&a=3&b=2`. Scalars other than
/// strings are accepted and rendered as text.
mod query_parameters {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(
        pairs: &[(String, String)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut grouped: Vec<(&str, Vec<&str>)> = Vec::new();
        for (name, value) in pairs {
            match grouped.iter_mut().find(|(existing, _)| *existing == name.as_str()) {
                Some((_, values)) => values.push(value.as_str()),
                None => grouped.push((name.as_str(), vec![value.as_str()])),
            }
        }

        let mut map = serializer.serialize_map(Some(grouped.len()))?;
        for (name, values) in &grouped {
            match values.as_slice() {
                [single] => map.serialize_entry(name, single)?,
                many => map.serialize_entry(name, many)?,
            }
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, String)>, D::Error> {
        deserializer.deserialize_map(PairsVisitor)
    }

    struct PairsVisitor;

    impl<'de> Visitor<'de> for PairsVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an object of query parameter values or value arrays")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut pairs = Vec::new();
            while let Some((name, value)) = access.next_entry::<String, Value>()? {
                match value {
                    Value::Array(items) => {
                        pairs.extend(items.into_iter().map(|item| (name.clone(), text(item))));
                    }
                    Value::Null => {}
                    other => pairs.push((name, text(other))),
                }
            }
            Ok(pairs)
        }
    }

    fn text(value: Value) -> String {
        match value {
            Value::String(s) => s,
            other => other.to_string(),
        }
    }
}

/// Outcome counts for one flush cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Entries sent to the transport
    pub attempted: usize,
    /// Removed after a 2xx/3xx
    pub succeeded: usize,
    /// Removed after a 4xx
    pub dropped_terminal: usize,
    /// Removed for exceeding retention
    pub dropped_expired: usize,
    /// Left in place after a 5xx or transport failure
    pub requeued: usize,
    /// Already in flight from a concurrent flush, or not reached
    pub skipped: usize,
}

/// Point-in-time queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    #[serde(with = "resilink_common::duration_millis")]
    pub oldest_age: Duration,
    pub by_priority: BTreeMap<i32, usize>,
    pub total_enqueued: u64,
    pub total_replayed: u64,
    pub total_dropped: u64,
    pub is_online: bool,
    pub flush_in_progress: bool,
}
