use serde_json::{json, Value};

use super::ImageJob;
use crate::config::ImageSettings;
use crate::llm::{send_json, ProviderError};
use crate::utils::http::get_http_client;

const PROVIDER: &str = "openai";

/// OpenAI images API. There is no negative prompt parameter, so negatives
/// have to be baked into the prompt itself.
pub(super) async fn generate(
    settings: &ImageSettings,
    job: &ImageJob<'_>,
) -> Result<String, ProviderError> {
    if settings.openai_api_key.is_empty() {
        return Err(ProviderError::NotConfigured {
            provider: PROVIDER,
            missing: "IMG_OPENAI_API_KEY",
        });
    }

    let mut payload = json!({
        "model": settings.openai_model,
        "prompt": job.prompt,
        "size": job.size.as_str(),
    });
    if job.high_detail {
        payload["quality"] = json!("high");
    }

    let request = get_http_client()
        .post(format!(
            "{}/images/generations",
            settings.openai_base_url.trim_end_matches('/')
        ))
        .bearer_auth(&settings.openai_api_key)
        .timeout(job.timeout)
        .json(&payload);
    let response = send_json(PROVIDER, request).await?;

    response
        .body
        .pointer("/data/0/b64_json")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::payload(PROVIDER, "response had no data[0].b64_json"))
}
