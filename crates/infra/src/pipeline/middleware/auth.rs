//! Bearer credential attachment and the single 401 refresh cycle

use std::sync::Arc;

use async_trait::async_trait;
use resilink_core::{CredentialProvider, Middleware, Next, TokenRefresher, Transport};
use resilink_domain::{ApiRequest, ApiResponse, ApiResult, RequestContext};
use tracing::{debug, info, warn};

/// Credential key used when none is configured
pub const DEFAULT_CREDENTIAL_KEY: &str = "access_token";

const AUTHORIZATION: &str = "Authorization";

/// Attach the stored token unless the request carries its own header
///
/// Returns the attached token. A provider fault is logged and the request
/// proceeds unauthenticated.
async fn attach_bearer(
    credentials: &dyn CredentialProvider,
    key: &str,
    request: &mut ApiRequest,
) -> Option<String> {
    if request.headers.contains(AUTHORIZATION) {
        return None;
    }
    match credentials.read(key).await {
        Ok(Some(token)) => {
            request.headers.insert(AUTHORIZATION, format!("Bearer {token}"));
            Some(token)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "credential read failed; sending without authorization");
            None
        }
    }
}

pub struct AuthMiddleware {
    credentials: Arc<dyn CredentialProvider>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    key: String,
}

impl AuthMiddleware {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self { credentials, refresher: None, key: DEFAULT_CREDENTIAL_KEY.to_string() }
    }

    #[must_use]
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Store or forget the credential after a refresh attempt
    async fn refreshed_token(
        &self,
        refresher: &dyn TokenRefresher,
        current: &str,
    ) -> Option<String> {
        match refresher.refresh(Some(current)).await {
            Ok(Some(fresh)) => {
                if let Err(e) = self.credentials.write(&self.key, &fresh).await {
                    warn!(error = %e, "failed to store refreshed credential");
                }
                info!("credential refreshed after 401");
                Some(fresh)
            }
            Ok(None) => {
                if let Err(e) = self.credentials.delete(&self.key).await {
                    warn!(error = %e, "failed to delete rejected credential");
                }
                warn!("credential refresh declined; session ended");
                None
            }
            Err(e) => {
                warn!(error = %e, "credential refresh failed");
                None
            }
        }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn handle(
        &self,
        mut request: ApiRequest,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> ApiResult<ApiResponse> {
        let attached = attach_bearer(self.credentials.as_ref(), &self.key, &mut request).await;
        let response = next.run(request.clone(), ctx).await?;

        if response.status != 401 || ctx.auth_refreshed {
            return Ok(response);
        }
        let (Some(refresher), Some(current)) = (&self.refresher, attached) else {
            return Ok(response);
        };

        ctx.auth_refreshed = true;
        debug!(request_id = %ctx.request_id, "401 received; refreshing credential");
        let Some(fresh) = self.refreshed_token(refresher.as_ref(), &current).await else {
            return Ok(response);
        };

        request.headers.insert(AUTHORIZATION, format!("Bearer {fresh}"));
        next.run(request, ctx).await
    }
}

/// Transport that attaches the current bearer credential to every send
///
/// Used for offline queue replay, whose stored requests never carry one.
pub struct AuthenticatedTransport {
    inner: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    key: String,
}

impl AuthenticatedTransport {
    pub fn new(
        inner: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
        key: impl Into<String>,
    ) -> Self {
        Self { inner, credentials, key: key.into() }
    }
}

#[async_trait]
impl Transport for AuthenticatedTransport {
    async fn send(&self, request: &ApiRequest) -> ApiResult<ApiResponse> {
        let mut request = request.clone();
        attach_bearer(self.credentials.as_ref(), &self.key, &mut request).await;
        self.inner.send(&request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::credentials::InMemoryCredentials;
    use crate::pipeline::middleware::testing::Scripted;

    struct FixedRefresher {
        token: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for FixedRefresher {
        async fn refresh(&self, current: Option<&str>) -> ApiResult<Option<String>> {
            assert_eq!(current, Some("stale"));
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.token.map(str::to_owned))
        }
    }

    fn middleware(
        credentials: &Arc<InMemoryCredentials>,
        refresher: &Arc<FixedRefresher>,
    ) -> Vec<Arc<dyn Middleware>> {
        let auth = AuthMiddleware::new(Arc::clone(credentials) as Arc<dyn CredentialProvider>)
            .with_refresher(Arc::clone(refresher) as Arc<dyn TokenRefresher>);
        vec![Arc::new(auth)]
    }

    fn get() -> ApiRequest {
        ApiRequest::get("https://api.example.com/me")
    }

    #[tokio::test]
    async fn test_attaches_stored_token() {
        let credentials = Arc::new(InMemoryCredentials::with_token(DEFAULT_CREDENTIAL_KEY, "t1"));
        let transport = Scripted::new(vec![Scripted::status(200)]);
        let chain: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(AuthMiddleware::new(credentials as Arc<dyn CredentialProvider>))];

        Next::new(&chain, &transport).run(get(), &mut RequestContext::new()).await.unwrap();
        let sent = transport.last_request().unwrap();
        assert_eq!(sent.headers.get("authorization"), Some("Bearer t1"));
    }

    #[tokio::test]
    async fn test_refreshes_once_on_401() {
        let credentials =
            Arc::new(InMemoryCredentials::with_token(DEFAULT_CREDENTIAL_KEY, "stale"));
        let refresher =
            Arc::new(FixedRefresher { token: Some("fresh"), calls: AtomicUsize::new(0) });
        let transport = Scripted::new(vec![Scripted::status(401), Scripted::status(200)]);
        let chain = middleware(&credentials, &refresher);

        let response =
            Next::new(&chain, &transport).run(get(), &mut RequestContext::new()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(credentials.token(DEFAULT_CREDENTIAL_KEY).as_deref(), Some("fresh"));
        let resent = transport.last_request().unwrap();
        assert_eq!(resent.headers.get("authorization"), Some("Bearer fresh"));
    }

    #[tokio::test]
    async fn test_second_401_is_surfaced() {
        let credentials =
            Arc::new(InMemoryCredentials::with_token(DEFAULT_CREDENTIAL_KEY, "stale"));
        let refresher =
            Arc::new(FixedRefresher { token: Some("fresh"), calls: AtomicUsize::new(0) });
        let transport = Scripted::new(vec![Scripted::status(401)]);
        let chain = middleware(&credentials, &refresher);

        let mut ctx = RequestContext::new();
        let response = Next::new(&chain, &transport).run(get(), &mut ctx).await.unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(transport.calls(), 2);
        assert!(ctx.auth_refreshed);

        // A later attempt in the same logical request does not refresh again
        Next::new(&chain, &transport).run(get(), &mut ctx).await.unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_declined_refresh_clears_credential() {
        let credentials =
            Arc::new(InMemoryCredentials::with_token(DEFAULT_CREDENTIAL_KEY, "stale"));
        let refresher = Arc::new(FixedRefresher { token: None, calls: AtomicUsize::new(0) });
        let transport = Scripted::new(vec![Scripted::status(401)]);
        let chain = middleware(&credentials, &refresher);

        let response =
            Next::new(&chain, &transport).run(get(), &mut RequestContext::new()).await.unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(transport.calls(), 1);
        assert_eq!(credentials.token(DEFAULT_CREDENTIAL_KEY), None);
    }

    #[tokio::test]
    async fn test_authenticated_transport_attaches_current_token() {
        let credentials = Arc::new(InMemoryCredentials::with_token(DEFAULT_CREDENTIAL_KEY, "t9"));
        let scripted = Arc::new(Scripted::new(vec![Scripted::status(201)]));
        let transport = AuthenticatedTransport::new(
            Arc::clone(&scripted) as Arc<dyn Transport>,
            credentials as Arc<dyn CredentialProvider>,
            DEFAULT_CREDENTIAL_KEY,
        );

        transport.send(&ApiRequest::post("https://api.example.com/notes")).await.unwrap();
        let sent = scripted.last_request().unwrap();
        assert_eq!(sent.headers.get("authorization"), Some("Bearer t9"));
    }
}
