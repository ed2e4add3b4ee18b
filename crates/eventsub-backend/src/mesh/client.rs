//! Event mesh management API client.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};

use super::oauth::ClientCredentialsTokenSource;
use super::types::{MeshSubscription, StateAction, StateChange};
use crate::error::BackendError;

pub struct MeshClient {
    http_client: reqwest::Client,
    base_url: String,
    tokens: Arc<ClientCredentialsTokenSource>,
}

impl MeshClient {
    pub fn new(
        api_url: &str,
        request_timeout: Duration,
        tokens: Arc<ClientCredentialsTokenSource>,
    ) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: format!("{}/events/subscriptions", api_url.trim_end_matches('/')),
            tokens,
        })
    }

    fn subscription_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    /// Send with a bearer token; on 401 refresh the token once and retry.
    async fn send(
        &self,
        method: Method,
        url: &str,
        build: impl Fn(RequestBuilder) -> RequestBuilder,
    ) -> Result<Response, BackendError> {
        let mut refreshed = false;
        loop {
            let token = self.tokens.token().await?;
            let request = build(self.http_client.request(method.clone(), url)).bearer_auth(token);
            let response = request.send().await.map_err(|e| {
                tracing::warn!(%method, url, error = %e, "Event mesh request failed");
                BackendError::Network(e.to_string())
            })?;

            if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
                tracing::debug!(url, "Access token rejected, refreshing");
                self.tokens.invalidate().await;
                refreshed = true;
                continue;
            }
            return Ok(response);
        }
    }

    async fn error_for(method: &Method, url: &str, response: Response) -> BackendError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        BackendError::http(format!("{method} {url}"), status, body)
    }

    /// Returns `None` on 404.
    pub async fn get(&self, name: &str) -> Result<Option<MeshSubscription>, BackendError> {
        let url = self.subscription_url(name);
        let response = self.send(Method::GET, &url, |r| r).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => response
                .json()
                .await
                .map(Some)
                .map_err(|e| BackendError::Decode(e.to_string())),
            _ => Err(Self::error_for(&Method::GET, &url, response).await),
        }
    }

    /// Anything above 202 other than 409 is a failure.
    pub async fn create(&self, subscription: &MeshSubscription) -> Result<(), BackendError> {
        let response = self
            .send(Method::POST, &self.base_url, |r| r.json(subscription))
            .await?;
        let status = response.status();
        if status.as_u16() > 202 && status != StatusCode::CONFLICT {
            return Err(Self::error_for(&Method::POST, &self.base_url, response).await);
        }
        Ok(())
    }

    /// 204 and 404 both mean gone.
    pub async fn delete(&self, name: &str) -> Result<(), BackendError> {
        let url = self.subscription_url(name);
        let response = self.send(Method::DELETE, &url, |r| r).await?;
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND | StatusCode::OK => Ok(()),
            _ => Err(Self::error_for(&Method::DELETE, &url, response).await),
        }
    }

    pub async fn resume(&self, name: &str) -> Result<(), BackendError> {
        self.change_state(name, StateAction::Resume).await
    }

    async fn change_state(&self, name: &str, action: StateAction) -> Result<(), BackendError> {
        let url = format!("{}/state", self.subscription_url(name));
        let body = StateChange { action };
        let response = self.send(Method::PUT, &url, |r| r.json(&body)).await?;
        if !response.status().is_success() {
            return Err(Self::error_for(&Method::PUT, &url, response).await);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MeshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
