use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;
use resilink_core::Transport;
use resilink_domain::{
    ApiError, ApiRequest, ApiResponse, ApiResult, Headers, TimeoutPhase, TransportErrorKind,
};
use tokio::time::timeout;
use tracing::debug;

use super::pool::PoolShared;

/// Transport bound to one initialization of a [`ConnectionPool`](super::ConnectionPool)
///
/// Every send holds a global permit and a per-host permit for its whole
/// duration. Any HTTP status is returned as `Ok`; only transport failures
/// are errors.
#[derive(Clone)]
pub struct PooledTransport {
    shared: Arc<PoolShared>,
}

impl PooledTransport {
    pub(crate) fn new(shared: Arc<PoolShared>) -> Self {
        Self { shared }
    }
}

impl std::fmt::Debug for PooledTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledTransport").field("config", &self.shared.config).finish()
    }
}

#[async_trait]
impl Transport for PooledTransport {
    async fn send(&self, request: &ApiRequest) -> ApiResult<ApiResponse> {
        let url = request.url()?;
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let _permits = self.shared.acquire(&host).await?;

        let method = Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let mut builder = self.shared.client.request(method, url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let config = &self.shared.config;
        debug!(method = %request.method, %url, "sending HTTP request");

        let response = match timeout(config.send_timeout, builder.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(classify_error(&err, TimeoutPhase::Send)),
            Err(_) => {
                return Err(ApiError::Timeout {
                    phase: TimeoutPhase::Send,
                    message: format!("no response headers within {:?}", config.send_timeout),
                })
            }
        };

        let status = response.status().as_u16();
        let headers = convert_headers(response.headers());
        let body = match timeout(config.receive_timeout, response.bytes()).await {
            Ok(Ok(bytes)) => bytes.to_vec(),
            Ok(Err(err)) => return Err(classify_error(&err, TimeoutPhase::Receive)),
            Err(_) => {
                return Err(ApiError::Timeout {
                    phase: TimeoutPhase::Receive,
                    message: format!(
                        "response body not received within {:?}",
                        config.receive_timeout
                    ),
                })
            }
        };

        debug!(
            method = %request.method,
            %url,
            status,
            bytes = body.len(),
            "received HTTP response"
        );
        Ok(ApiResponse::new(status, headers, body))
    }
}

fn convert_headers(map: &HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect()
}

/// Map a reqwest failure onto the transport error taxonomy
///
/// `phase` is the phase that was running when the error surfaced; a connect
/// timeout is always reported as [`TimeoutPhase::Connect`].
pub fn classify_error(err: &reqwest::Error, phase: TimeoutPhase) -> ApiError {
    let message = error_chain(err);

    if err.is_timeout() {
        let phase = if err.is_connect() { TimeoutPhase::Connect } else { phase };
        return ApiError::Timeout { phase, message };
    }
    if err.is_builder() {
        return ApiError::InvalidRequest(message);
    }
    if err.is_decode() {
        return ApiError::Decode(message);
    }

    let lower = message.to_ascii_lowercase();
    let kind = if ["certificate", "tls", "handshake"].iter().any(|needle| lower.contains(needle)) {
        TransportErrorKind::Tls
    } else if err.is_connect() || err.is_request() || err.is_body() {
        TransportErrorKind::Connection
    } else {
        TransportErrorKind::Other
    };
    ApiError::Connectivity { kind, message }
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::time::Duration;

    use resilink_domain::{ConnectionPoolConfig, HttpMethod};
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::http::ConnectionPool;

    fn transport_with(config: ConnectionPoolConfig) -> PooledTransport {
        ConnectionPool::new(config).transport().unwrap()
    }

    #[tokio::test]
    async fn test_sends_method_headers_query_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notes"))
            .and(query_param("draft", "true"))
            .and(header("x-client", "resilink"))
            .and(body_string("{\"text\":\"hi\"}"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("ETag", "\"n1\"")
                    .set_body_string("created"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_with(ConnectionPoolConfig::default());
        let request = ApiRequest::new(HttpMethod::Post, "/notes")
            .with_base_url(server.uri())
            .with_query("draft", "true")
            .with_header("X-Client", "resilink")
            .with_body(b"{\"text\":\"hi\"}".to_vec());

        let response = transport.send(&request).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.text(), "created");
        assert_eq!(response.headers.get("etag"), Some("\"n1\""));
    }

    #[tokio::test]
    async fn test_error_statuses_are_not_transport_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_with(ConnectionPoolConfig::default());
        let response =
            transport.send(&ApiRequest::get("/").with_base_url(server.uri())).await.unwrap();
        assert_eq!(response.status, 503);
    }

    #[tokio::test]
    async fn test_refused_connection_is_connectivity_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // release the port so that requests fail with ECONNREFUSED

        let transport = transport_with(ConnectionPoolConfig::default());
        let err = transport
            .send(&ApiRequest::get(format!("http://{addr}/items")))
            .await
            .unwrap_err();
        assert!(err.is_network_failure(), "expected network failure, got {err:?}");
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Connection));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = transport_with(ConnectionPoolConfig {
            send_timeout: Duration::from_millis(50),
            ..ConnectionPoolConfig::default()
        });
        let request = ApiRequest::get("/").with_base_url(server.uri());
        let err = transport.send(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout { phase: TimeoutPhase::Send, .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_sending() {
        let transport = transport_with(ConnectionPoolConfig::default());
        let err = transport.send(&ApiRequest::get("/relative-only")).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }
}
