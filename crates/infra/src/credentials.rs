use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use resilink_core::CredentialProvider;
use resilink_domain::ApiResult;

/// Process-local credential provider
///
/// Useful for tests and hosts that keep tokens in memory; secure platform
/// storage plugs in through [`CredentialProvider`] instead.
#[derive(Debug, Default)]
pub struct InMemoryCredentials {
    tokens: RwLock<HashMap<String, String>>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(key: impl Into<String>, token: impl Into<String>) -> Self {
        let credentials = Self::new();
        credentials.tokens.write().insert(key.into(), token.into());
        credentials
    }

    pub fn token(&self, key: &str) -> Option<String> {
        self.tokens.read().get(key).cloned()
    }
}

#[async_trait]
impl CredentialProvider for InMemoryCredentials {
    async fn read(&self, key: &str) -> ApiResult<Option<String>> {
        Ok(self.token(key))
    }

    async fn write(&self, key: &str, token: &str) -> ApiResult<()> {
        self.tokens.write().insert(key.to_owned(), token.to_owned());
        Ok(())
    }

    async fn delete(&self, key: &str) -> ApiResult<()> {
        self.tokens.write().remove(key);
        Ok(())
    }
}
