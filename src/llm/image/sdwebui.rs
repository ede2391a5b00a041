use serde_json::{json, Value};

use super::ImageJob;
use crate::config::ImageSettings;
use crate::llm::{send_json, ProviderError};
use crate::utils::http::get_http_client;

const PROVIDER: &str = "sdwebui";
const STEPS: u32 = 28;
const CFG_SCALE: f32 = 7.0;
const SAMPLER: &str = "DPM++ 2M Karras";

/// AUTOMATIC1111-style `txt2img`. Honors both the seed and negative prompt.
pub(super) async fn generate(
    settings: &ImageSettings,
    job: &ImageJob<'_>,
) -> Result<String, ProviderError> {
    let base_url = settings.sdwebui_url.trim_end_matches('/');
    if base_url.is_empty() {
        return Err(ProviderError::NotConfigured {
            provider: PROVIDER,
            missing: "SD_WEBUI_URL",
        });
    }

    let edge = job.size.edge();
    let payload = json!({
        "prompt": job.prompt,
        "negative_prompt": job.negative_prompt,
        "width": edge,
        "height": edge,
        "steps": STEPS,
        "cfg_scale": CFG_SCALE,
        "sampler_name": SAMPLER,
        "seed": job.seed,
    });

    let mut request = get_http_client()
        .post(format!("{base_url}/sdapi/v1/txt2img"))
        .timeout(job.timeout)
        .json(&payload);
    if !settings.sdwebui_auth.is_empty() {
        request = request.bearer_auth(&settings.sdwebui_auth);
    }
    let response = send_json(PROVIDER, request).await?;

    response
        .body
        .pointer("/images/0")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::payload(PROVIDER, "response had no images[0]"))
}
