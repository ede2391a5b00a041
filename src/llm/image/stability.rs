use serde_json::{json, Value};

use super::ImageJob;
use crate::config::ImageSettings;
use crate::llm::{send_json, ProviderError};
use crate::utils::http::get_http_client;

const PROVIDER: &str = "stability";
const STEPS: u32 = 30;
const CFG_SCALE: f32 = 7.0;

pub(super) async fn generate(
    settings: &ImageSettings,
    job: &ImageJob<'_>,
) -> Result<String, ProviderError> {
    if settings.stability_api_key.is_empty() {
        return Err(ProviderError::NotConfigured {
            provider: PROVIDER,
            missing: "STABILITY_API_KEY",
        });
    }

    // Negatives ride along as a second text prompt with negative weight.
    let edge = job.size.edge();
    let payload = json!({
        "text_prompts": [
            { "text": job.prompt, "weight": 1 },
            { "text": job.negative_prompt, "weight": -1 },
        ],
        "samples": 1,
        "width": edge,
        "height": edge,
        "steps": STEPS,
        "cfg_scale": CFG_SCALE,
        "seed": job.seed,
    });

    let request = get_http_client()
        .post(format!(
            "{}/generation/{}/text-to-image",
            settings.stability_base_url.trim_end_matches('/'),
            settings.stability_model
        ))
        .bearer_auth(&settings.stability_api_key)
        .header("Accept", "application/json")
        .timeout(job.timeout)
        .json(&payload);
    let response = send_json(PROVIDER, request).await?;

    response
        .body
        .pointer("/artifacts/0/base64")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::payload(PROVIDER, "response had no artifacts[0].base64"))
}
