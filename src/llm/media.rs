use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::warn;

use crate::utils::http::get_http_client;

const DOWNLOAD_MAX_ATTEMPTS: usize = 3;
const DOWNLOAD_BASE_DELAY_MS: u64 = 400;
const DOWNLOAD_ERROR_BODY_LIMIT: usize = 800;
const ERROR_BODY_LIMIT: usize = 2000;

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

/// Pulls a human-readable message out of a provider error body, returning it
/// alongside a log-safe summary of the whole body.
pub fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .or_else(|| value.get("message").and_then(|v| v.as_str()))
            .or_else(|| value.get("error").and_then(|v| v.as_str()))
            .map(|v| v.to_string());
        return (message, truncate_for_log(&value.to_string(), ERROR_BODY_LIMIT));
    }

    (None, truncate_for_log(trimmed, ERROR_BODY_LIMIT))
}

pub fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

pub fn data_uri(mime_type: &str, b64: &str) -> String {
    format!("data:{mime_type};base64,{b64}")
}

/// Encodes raw image bytes as a data URI, sniffing the MIME type.
pub fn image_data_uri(bytes: &[u8]) -> String {
    let mime_type = detect_mime_type(bytes).unwrap_or_else(|| "image/png".to_string());
    data_uri(&mime_type, &general_purpose::STANDARD.encode(bytes))
}

/// Accepts either a `data:<mime>;base64,` URI or bare base64 and returns the
/// decoded bytes.
pub fn decode_image_payload(input: &str) -> Option<Vec<u8>> {
    let trimmed = input.trim();
    let encoded = match trimmed.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',')?;
            if !header.ends_with(";base64") {
                return None;
            }
            payload
        }
        None => trimmed,
    };
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    general_purpose::STANDARD
        .decode(compact.as_bytes())
        .ok()
        .filter(|bytes| !bytes.is_empty())
}

/// Fetches an image a provider handed back by URL instead of inline.
pub async fn download_image(url: &str, timeout: Duration) -> Option<Vec<u8>> {
    let client = get_http_client();
    for attempt in 0..DOWNLOAD_MAX_ATTEMPTS {
        let response = match client.get(url).timeout(timeout).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(
                    "Failed to fetch image {url}: {err} (timeout={}, connect={}, attempt={}/{})",
                    err.is_timeout(),
                    err.is_connect(),
                    attempt + 1,
                    DOWNLOAD_MAX_ATTEMPTS
                );
                if !should_retry_error(&err) || attempt + 1 == DOWNLOAD_MAX_ATTEMPTS {
                    return None;
                }
                tokio::time::sleep(Duration::from_millis(DOWNLOAD_BASE_DELAY_MS << attempt)).await;
                continue;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Image download failed for {url} with status {}: {}",
                status,
                truncate_for_log(&body, DOWNLOAD_ERROR_BODY_LIMIT)
            );
            if !should_retry_status(status) || attempt + 1 == DOWNLOAD_MAX_ATTEMPTS {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(DOWNLOAD_BASE_DELAY_MS << attempt)).await;
            continue;
        }

        return match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(err) => {
                warn!("Failed to read image bytes from {url}: {err}");
                None
            }
        };
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIXEL: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR4nGNgYAAAAAMAASsJTYQAAAAASUVORK5CYII=";

    #[test]
    fn decodes_data_uris_and_bare_base64() {
        let bare = decode_image_payload(PIXEL).unwrap();
        let uri = decode_image_payload(&data_uri("image/png", PIXEL)).unwrap();
        assert_eq!(bare, uri);
        assert_eq!(detect_mime_type(&bare).as_deref(), Some("image/png"));
        assert!(image_data_uri(&bare).starts_with("data:image/png;base64,"));
    }

    #[test]
    fn rejects_garbage_payloads() {
        assert!(decode_image_payload("").is_none());
        assert!(decode_image_payload("data:image/png,abc").is_none());
        assert!(decode_image_payload("%%%not base64%%%").is_none());
    }

    #[test]
    fn summarizes_openai_style_errors() {
        let body = r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#;
        let (message, summary) = summarize_error_body(body);
        assert_eq!(message.as_deref(), Some("Rate limit reached"));
        assert!(summary.contains("requests"));
        assert_eq!(summarize_error_body("  ").1, "empty response body");
    }

    #[test]
    fn retries_only_throttling_and_server_errors() {
        assert!(should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry_status(StatusCode::BAD_GATEWAY));
        assert!(!should_retry_status(StatusCode::BAD_REQUEST));
        assert!(!should_retry_status(StatusCode::UNAUTHORIZED));
    }
}
