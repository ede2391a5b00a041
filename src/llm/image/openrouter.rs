use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};
use tracing::debug;

use super::ImageJob;
use crate::config::ImageSettings;
use crate::llm::media::download_image;
use crate::llm::{send_json, ProviderError};
use crate::utils::http::get_http_client;

const PROVIDER: &str = "openrouter";

/// OpenRouter's OpenAI-compatible images endpoint. Some models answer with a
/// URL instead of inline base64; those are fetched and re-encoded.
pub(super) async fn generate(
    settings: &ImageSettings,
    job: &ImageJob<'_>,
) -> Result<String, ProviderError> {
    if settings.openrouter_api_key.is_empty() {
        return Err(ProviderError::NotConfigured {
            provider: PROVIDER,
            missing: "OPENROUTER_API_KEY",
        });
    }

    let payload = json!({
        "model": settings.openrouter_model,
        "prompt": job.prompt,
        "size": job.size.as_str(),
        "response_format": "b64_json",
    });
    let request = get_http_client()
        .post(format!(
            "{}/images",
            settings.openrouter_base_url.trim_end_matches('/')
        ))
        .bearer_auth(&settings.openrouter_api_key)
        .header("HTTP-Referer", &settings.site_url)
        .header("X-Title", &settings.app_name)
        .timeout(job.timeout)
        .json(&payload);
    let response = send_json(PROVIDER, request).await?;

    if let Some(b64) = response
        .body
        .pointer("/data/0/b64_json")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
    {
        return Ok(b64.to_string());
    }

    let url = response
        .body
        .pointer("/data/0/url")
        .and_then(Value::as_str)
        .filter(|value| value.starts_with("http"))
        .ok_or_else(|| ProviderError::payload(PROVIDER, "response had neither b64_json nor url"))?;
    debug!("OpenRouter returned an image URL; downloading {}", url);
    let bytes = download_image(url, job.timeout)
        .await
        .ok_or_else(|| ProviderError::payload(PROVIDER, format!("could not download {url}")))?;
    Ok(general_purpose::STANDARD.encode(bytes))
}
