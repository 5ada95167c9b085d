//! HTTP client for the inventory sync API

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::wire::{
    DeltaRequest, DeltaResponse, ResolveConflictRequest, ServerSyncStatus, SubmitRequest,
    SubmitResponse,
};
use super::{SyncTransport, TransportError, TransportResult};
use crate::connectivity::ConnectivityProbe;
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Upper bound on a single sync request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SYNC_PATH: &str = "/inventory/sync";

#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(base_url: impl AsRef<str>) -> TransportResult<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl AsRef<str>, timeout: Duration) -> TransportResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url.as_ref())?,
            token: None,
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    /// Attach a bearer token to every request; blank tokens are ignored
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = normalize_text_option(token);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}{SYNC_PATH}/{name}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> TransportResult<reqwest::Response> {
        let response = self.authorize(request).send().await.map_err(|error| {
            if error.is_connect() || error.is_timeout() {
                TransportError::Unreachable(error.to_string())
            } else {
                TransportError::Http(error)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Api(parse_api_error(status, &body)));
        }
        Ok(response)
    }

    async fn send_json<R: DeserializeOwned>(&self, request: RequestBuilder) -> TransportResult<R> {
        Ok(self.send(request).await?.json::<R>().await?)
    }
}

impl SyncTransport for HttpTransport {
    async fn submit(&self, request: SubmitRequest) -> TransportResult<SubmitResponse> {
        self.send_json(self.client.post(self.endpoint("submit")).json(&request))
            .await
    }

    async fn delta(&self, request: DeltaRequest) -> TransportResult<DeltaResponse> {
        self.send_json(self.client.post(self.endpoint("delta")).json(&request))
            .await
    }

    async fn resolve_conflict(&self, request: ResolveConflictRequest) -> TransportResult<()> {
        self.send(
            self.client
                .post(self.endpoint("resolve-conflict"))
                .json(&request),
        )
        .await?;
        Ok(())
    }

    async fn status(&self) -> TransportResult<ServerSyncStatus> {
        self.send_json(self.client.get(self.endpoint("status"))).await
    }
}

impl ConnectivityProbe for HttpTransport {
    async fn probe(&self) -> bool {
        match self.status().await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("Connectivity probe failed: {error}");
                false
            }
        }
    }
}

/// Validate and trim a server base URL
pub fn normalize_base_url(url: &str) -> TransportResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(TransportError::InvalidConfiguration(
            "API URL must not be empty".to_string(),
        ));
    }
    if !is_http_url(trimmed) {
        return Err(TransportError::InvalidConfiguration(
            "API URL must include http:// or https://".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
