pub mod chat;
pub mod image;
pub mod media;
pub mod narrative;

use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::warn;

use crate::llm::media::summarize_error_body;

/// Failure of a single provider call. Renderers and the narrative generator
/// turn these into degraded results; they never reach HTTP callers directly.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} is not configured: {missing} is empty")]
    NotConfigured {
        provider: &'static str,
        missing: &'static str,
    },
    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} returned HTTP {status}: {detail}")]
    Status {
        provider: &'static str,
        status: StatusCode,
        detail: String,
        retry_after_secs: Option<u64>,
        request_id: Option<String>,
    },
    #[error("{provider} returned an unusable payload: {reason}")]
    Payload {
        provider: &'static str,
        reason: String,
    },
}

impl ProviderError {
    pub fn payload(provider: &'static str, reason: impl Into<String>) -> Self {
        ProviderError::Payload {
            provider,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub body: Value,
    pub request_id: Option<String>,
}

fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// `retry-after` in whole seconds; HTTP-date values are ignored.
fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

async fn error_for_status(provider: &'static str, response: Response) -> ProviderError {
    let status = response.status();
    let retry_after_secs = retry_after_secs(response.headers());
    let request_id = request_id(response.headers());
    let body = response.text().await.unwrap_or_default();
    let (message, body_summary) = summarize_error_body(&body);
    warn!(
        "{} API error: status={}, request_id={:?}, body={}",
        provider, status, request_id, body_summary
    );
    ProviderError::Status {
        provider,
        status,
        detail: message.unwrap_or(body_summary),
        retry_after_secs,
        request_id,
    }
}

/// Sends a prepared request and decodes a JSON body, mapping every failure
/// mode onto `ProviderError`.
pub async fn send_json(
    provider: &'static str,
    request: RequestBuilder,
) -> Result<ProviderResponse, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|source| ProviderError::Transport { provider, source })?;

    if !response.status().is_success() {
        return Err(error_for_status(provider, response).await);
    }

    let request_id = request_id(response.headers());
    let body = response
        .json::<Value>()
        .await
        .map_err(|err| ProviderError::payload(provider, format!("invalid JSON body: {err}")))?;
    Ok(ProviderResponse { body, request_id })
}

#[cfg(test)]
pub(crate) mod testing {
    use axum::Router;
    use tokio::net::TcpListener;

    /// Serves `router` on an ephemeral local port and returns its base URL.
    pub async fn spawn_mock(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// A base URL nothing listens on.
    pub const UNREACHABLE: &str = "http://127.0.0.1:1";
}
