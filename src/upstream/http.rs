//! HTTP transport for the upstream query API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::client::UpstreamApi;
use super::types::{PageRequest, PageResponse, UpstreamError};
use crate::config::UpstreamConfig;
use crate::error::SyncError;

/// Error envelope. The upstream uses it with non-2xx statuses, and also
/// inside 200 responses (`{"code": ...}` or `{"errors": [{"extensions": {"code": ...}}]}`).
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEntry {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    extensions: Option<ErrorExtensions>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorExtensions {
    #[serde(default)]
    code: Option<String>,
}

impl ErrorBody {
    fn is_error(&self) -> bool {
        self.code.is_some() || !self.errors.is_empty()
    }

    fn code(&self) -> Option<&str> {
        self.code.as_deref().or_else(|| {
            self.errors
                .iter()
                .find_map(|e| e.extensions.as_ref().and_then(|x| x.code.as_deref()))
        })
    }

    fn message(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or_else(|| self.errors.iter().find_map(|e| e.message.as_deref()))
    }
}

/// Upstream API client posting JSON page queries to `<base_url>/query/<entity>`.
pub struct HttpUpstream {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, SyncError> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| SyncError::Config("upstream.base_url is required for the HTTP upstream".into()))?;
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            timeout,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl UpstreamApi for HttpUpstream {
    async fn query_page(&self, request: PageRequest) -> Result<PageResponse, UpstreamError> {
        let url = format!("{}/query/{}", self.base_url, request.entity);
        let response = self
            .authorized(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) if status.is_success() => return Err(self.transport_error(e)),
            Err(_) => String::new(),
        };

        // Throttling can arrive as a 200 carrying an error envelope
        let envelope: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        if status.is_success() && !envelope.is_error() {
            return serde_json::from_str::<PageResponse>(&text).map_err(|e| UpstreamError::Decode(e.to_string()));
        }

        debug!(%status, code = ?envelope.code(), "Upstream returned an error");
        let message = envelope.message().map(str::to_string).unwrap_or(text);
        Err(error_for_status(status, envelope.code(), message, retry_after))
    }

    async fn ping(&self) -> Result<(), UpstreamError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(error_for_status(status, None, status.to_string(), None))
        }
    }
}

impl std::fmt::Debug for HttpUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUpstream")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Map an error response to an error variant.
///
/// A rate-limit error code in the body wins over the status; some gateways
/// report throttling as a plain 400 or even a 200.
fn error_for_status(
    status: StatusCode,
    code: Option<&str>,
    message: String,
    retry_after: Option<Duration>,
) -> UpstreamError {
    if matches!(code, Some("RATE_LIMITED") | Some("THROTTLED")) || status == StatusCode::TOO_MANY_REQUESTS {
        return UpstreamError::RateLimited { retry_after };
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UpstreamError::Auth(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => UpstreamError::InvalidQuery(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => UpstreamError::Timeout(Duration::ZERO),
        s if s.is_server_error() => UpstreamError::Unavailable(format!("{}: {}", s, message)),
        s if s.is_success() => UpstreamError::InvalidQuery(format!("{}: {}", code.unwrap_or("error"), message)),
        s => UpstreamError::InvalidQuery(format!("unexpected status {}: {}", s, message)),
    }
}
