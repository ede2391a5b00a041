//! Text-to-image rendering across several providers with a soft landing:
//! `ImageRenderer::render` always yields an image, tagging failures as
//! degraded instead of returning an error.

mod openai;
mod openrouter;
mod sdwebui;
mod stability;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::config::ImageSettings;
use crate::llm::media::{data_uri, detect_mime_type};
use crate::llm::ProviderError;
use crate::utils::hash::keccak256;
use crate::utils::timing::log_provider_timing;

/// 1x1 transparent PNG returned when no provider produced an image.
pub const FALLBACK_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAAC0lEQVR42mNgAAIAAAUAAen63NgAAAAASUVORK5CYII=";

/// Payloads shorter than this are placeholders, not renders.
const MIN_IMAGE_B64_LEN: usize = 120;
const SEED_MODULUS: u64 = 2_147_483_647;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageProvider {
    OpenAi,
    SdWebUi,
    Stability,
    OpenRouter,
}

impl ImageProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageProvider::OpenAi => "openai",
            ImageProvider::SdWebUi => "sdwebui",
            ImageProvider::Stability => "stability",
            ImageProvider::OpenRouter => "openrouter",
        }
    }

    fn honors_seed(self) -> bool {
        matches!(self, ImageProvider::SdWebUi | ImageProvider::Stability)
    }
}

impl fmt::Display for ImageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown image provider '{0}'")]
pub struct UnknownImageProvider(pub String);

impl FromStr for ImageProvider {
    type Err = UnknownImageProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ImageProvider::OpenAi),
            "sdwebui" | "sd-webui" | "sd_webui" => Ok(ImageProvider::SdWebUi),
            "stability" => Ok(ImageProvider::Stability),
            "openrouter" => Ok(ImageProvider::OpenRouter),
            _ => Err(UnknownImageProvider(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSize {
    #[default]
    #[serde(rename = "1024x1024")]
    Square1024,
    #[serde(rename = "768x768")]
    Square768,
    #[serde(rename = "512x512")]
    Square512,
}

impl ImageSize {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageSize::Square1024 => "1024x1024",
            ImageSize::Square768 => "768x768",
            ImageSize::Square512 => "512x512",
        }
    }

    pub fn edge(self) -> u32 {
        match self {
            ImageSize::Square1024 => 1024,
            ImageSize::Square768 => 768,
            ImageSize::Square512 => 512,
        }
    }

    /// Lenient parse for request bodies; anything unrecognised is 1024x1024.
    pub fn parse_or_default(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("768x768") | Some("768") => ImageSize::Square768,
            Some("512x512") | Some("512") => ImageSize::Square512,
            _ => ImageSize::Square1024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderRequest {
    pub prompt: String,
    pub size: ImageSize,
    /// Overrides the configured default provider for this call only.
    pub provider: Option<ImageProvider>,
    pub negative_prompt: Option<String>,
    pub high_detail: bool,
    pub seed_input: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RenderStatus {
    Rendered,
    Degraded { reason: String },
}

#[derive(Debug, Clone)]
pub struct RenderResult {
    pub image_b64: String,
    pub mime_type: String,
    pub provider_used: ImageProvider,
    pub prompt_used: String,
    pub seed: Option<u32>,
    pub size: ImageSize,
    pub status: RenderStatus,
}

impl RenderResult {
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, RenderStatus::Degraded { .. })
    }

    pub fn data_uri(&self) -> String {
        data_uri(&self.mime_type, &self.image_b64)
    }

    pub fn image_bytes(&self) -> Option<Vec<u8>> {
        general_purpose::STANDARD.decode(&self.image_b64).ok()
    }

    /// Swaps the payload for the placeholder pixel, keeping provider, prompt
    /// and seed.
    pub fn degrade(self, reason: impl Into<String>) -> Self {
        RenderResult {
            image_b64: FALLBACK_PNG_B64.to_string(),
            mime_type: "image/png".to_string(),
            status: RenderStatus::Degraded {
                reason: reason.into(),
            },
            ..self
        }
    }
}

/// Everything an adapter needs for one call, already resolved.
pub(crate) struct ImageJob<'a> {
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub size: ImageSize,
    pub high_detail: bool,
    pub seed: u32,
    pub timeout: Duration,
}

/// Keccak of `seed_input` reduced into `1..2^31-1`; random when no input is
/// given.
pub fn derive_seed(seed_input: Option<&str>) -> u32 {
    match seed_input.filter(|value| !value.is_empty()) {
        Some(input) => {
            let reduced = keccak256(input.as_bytes())
                .iter()
                .fold(0u64, |acc, byte| (acc * 256 + u64::from(*byte)) % SEED_MODULUS);
            if reduced == 0 {
                1
            } else {
                reduced as u32
            }
        }
        None => rand::thread_rng().gen_range(1..SEED_MODULUS as u32),
    }
}

#[derive(Debug, Clone)]
pub struct ImageRenderer {
    settings: Arc<ImageSettings>,
}

impl ImageRenderer {
    pub fn new(settings: ImageSettings) -> Self {
        ImageRenderer {
            settings: Arc::new(settings),
        }
    }

    pub fn default_provider(&self) -> ImageProvider {
        self.settings.default_provider
    }

    fn model_for(&self, provider: ImageProvider) -> &str {
        match provider {
            ImageProvider::OpenAi => &self.settings.openai_model,
            ImageProvider::SdWebUi => "txt2img",
            ImageProvider::Stability => &self.settings.stability_model,
            ImageProvider::OpenRouter => &self.settings.openrouter_model,
        }
    }

    pub async fn render(&self, request: RenderRequest) -> RenderResult {
        let provider = request.provider.unwrap_or(self.settings.default_provider);
        let negative_prompt = request
            .negative_prompt
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.settings.negative_prompt);
        let seed = derive_seed(request.seed_input.as_deref());
        let timeout = Duration::from_millis(self.settings.timeout_ms);
        let job = ImageJob {
            prompt: &request.prompt,
            negative_prompt,
            size: request.size,
            high_detail: request.high_detail,
            seed,
            timeout,
        };

        let metadata = json!({
            "size": request.size.as_str(),
            "seeded": request.seed_input.is_some(),
            "high_detail": request.high_detail,
        });
        let outcome = log_provider_timing(
            provider.as_str(),
            self.model_for(provider),
            "render_image",
            Some(metadata),
            || async {
                let call = self.call_provider(provider, &job);
                match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::payload(
                        provider.as_str(),
                        format!("no image within {} ms", timeout.as_millis()),
                    )),
                }
            },
        )
        .await
        .and_then(|b64| validate_payload(provider, b64));

        let seed = provider.honors_seed().then_some(seed);
        match outcome {
            Ok((image_b64, mime_type)) => {
                info!(
                    "Rendered {} image via {} ({} base64 chars)",
                    request.size.as_str(),
                    provider,
                    image_b64.len()
                );
                RenderResult {
                    image_b64,
                    mime_type,
                    provider_used: provider,
                    prompt_used: request.prompt,
                    seed,
                    size: request.size,
                    status: RenderStatus::Rendered,
                }
            }
            Err(err) => {
                warn!("Image render via {} degraded to fallback pixel: {}", provider, err);
                RenderResult {
                    image_b64: FALLBACK_PNG_B64.to_string(),
                    mime_type: "image/png".to_string(),
                    provider_used: provider,
                    prompt_used: request.prompt,
                    seed,
                    size: request.size,
                    status: RenderStatus::Degraded {
                        reason: err.to_string(),
                    },
                }
            }
        }
    }

    async fn call_provider(
        &self,
        provider: ImageProvider,
        job: &ImageJob<'_>,
    ) -> Result<String, ProviderError> {
        match provider {
            ImageProvider::OpenAi => openai::generate(&self.settings, job).await,
            ImageProvider::SdWebUi => sdwebui::generate(&self.settings, job).await,
            ImageProvider::Stability => stability::generate(&self.settings, job).await,
            ImageProvider::OpenRouter => openrouter::generate(&self.settings, job).await,
        }
    }
}

fn validate_payload(provider: ImageProvider, b64: String) -> Result<(String, String), ProviderError> {
    let trimmed = b64.trim();
    if trimmed.len() < MIN_IMAGE_B64_LEN {
        return Err(ProviderError::payload(
            provider.as_str(),
            format!("image payload too small ({} chars)", trimmed.len()),
        ));
    }
    let bytes = general_purpose::STANDARD
        .decode(trimmed)
        .map_err(|err| ProviderError::payload(provider.as_str(), format!("invalid base64: {err}")))?;
    let mime_type = detect_mime_type(&bytes)
        .filter(|mime| mime.starts_with("image/"))
        .ok_or_else(|| {
            ProviderError::payload(provider.as_str(), "payload is not a recognised image")
        })?;
    Ok((trimmed.to_string(), mime_type))
}
