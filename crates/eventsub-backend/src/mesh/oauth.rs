//! OAuth2 client-credentials token source.
//!
//! Fetches access tokens from the mesh token endpoint and caches the
//! current one until shortly before it expires. Concurrent callers that
//! find the cache empty wait on a single fetch.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::BackendError;

/// Lifetime assumed when the endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

/// Client credentials for the event mesh.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuth2Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub certs_url: Option<String>,
}

impl OAuth2Credentials {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: token_url.into(),
            certs_url: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.client_id.is_empty() {
            return Err("oauth2 client id must not be empty".into());
        }
        if self.client_secret.is_empty() {
            return Err("oauth2 client secret must not be empty".into());
        }
        if url::Url::parse(&self.token_url).is_err() {
            return Err(format!("oauth2 token url {:?} is not a valid URL", self.token_url));
        }
        Ok(())
    }
}

impl fmt::Debug for OAuth2Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .field("certs_url", &self.certs_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct ClientCredentialsTokenSource {
    http_client: reqwest::Client,
    credentials: OAuth2Credentials,
    refresh_margin: Duration,
    cache: RwLock<Option<CachedToken>>,
}

impl ClientCredentialsTokenSource {
    pub fn new(
        credentials: OAuth2Credentials,
        request_timeout: Duration,
        refresh_margin: Duration,
    ) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            credentials,
            refresh_margin,
            cache: RwLock::new(None),
        })
    }

    pub fn credentials(&self) -> &OAuth2Credentials {
        &self.credentials
    }

    /// A valid access token, fetching a new one if needed.
    pub async fn token(&self) -> Result<String, BackendError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && Instant::now() < cached.refresh_at
            {
                return Ok(cached.value.clone());
            }
        }

        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.as_ref()
            && Instant::now() < cached.refresh_at
        {
            return Ok(cached.value.clone());
        }

        let fetched = self.fetch().await?;
        let value = fetched.value.clone();
        *cache = Some(fetched);
        Ok(value)
    }

    /// Drop the cached token, e.g. after the API answered 401.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn fetch(&self) -> Result<CachedToken, BackendError> {
        tracing::debug!(token_url = %self.credentials.token_url, "Fetching access token");

        let response = self
            .http_client
            .post(&self.credentials.token_url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(token_url = %self.credentials.token_url, error = %e, "Token request failed");
                BackendError::Token(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Token(format!("status {}: {}", status.as_u16(), body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Token(format!("invalid token response: {e}")))?;

        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        Ok(CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(self.refresh_margin),
        })
    }
}

impl fmt::Debug for ClientCredentialsTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsTokenSource")
            .field("credentials", &self.credentials)
            .field("refresh_margin", &self.refresh_margin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> ClientCredentialsTokenSource {
        ClientCredentialsTokenSource::new(
            OAuth2Credentials::new("client", "secret", format!("{}/oauth/token", server.uri())),
            Duration::from_secs(5),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_token_is_cached_until_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(header_exists("authorization"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = source(&server);
        assert_eq!(tokens.token().await.unwrap(), "tok-1");
        assert_eq!(tokens.token().await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok",
                "expires_in": 3600
            })))
            .expect(2)
            .mount(&server)
            .await;

        let tokens = source(&server);
        tokens.token().await.unwrap();
        tokens.invalidate().await;
        tokens.token().await.unwrap();
    }

    #[tokio::test]
    async fn test_short_lived_token_is_not_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok",
                "expires_in": 10
            })))
            .expect(2)
            .mount(&server)
            .await;

        let tokens = source(&server);
        tokens.token().await.unwrap();
        tokens.token().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_token_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad client"))
            .mount(&server)
            .await;

        let err = source(&server).token().await.unwrap_err();
        assert!(matches!(err, BackendError::Token(ref m) if m.contains("401")));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = OAuth2Credentials::new("client", "hunter2", "https://auth/token");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
