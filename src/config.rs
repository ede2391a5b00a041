use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use tracing::warn;

use crate::llm::chat::ChatProvider;
use crate::llm::image::ImageProvider;

pub const DEFAULT_NEGATIVE_PROMPT: &str = "low quality, blurry, watermark, text, logo, signature, extra limbs, extra fingers, mutated hands, deformed, cropped, jpeg artifacts, nsfw";

#[derive(Debug, Clone)]
pub struct ImageSettings {
    pub default_provider: ImageProvider,
    pub timeout_ms: u64,
    pub negative_prompt: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub sdwebui_url: String,
    pub sdwebui_auth: String,
    pub stability_api_key: String,
    pub stability_model: String,
    pub stability_base_url: String,
    pub openrouter_api_key: String,
    pub openrouter_base_url: String,
    pub openrouter_model: String,
    pub site_url: String,
    pub app_name: String,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: ChatProvider,
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub openrouter_api_key: String,
    pub openrouter_base_url: String,
    pub openrouter_model: String,
    pub site_url: String,
    pub app_name: String,
    pub temperature: f32,
    pub timeout_ms: u64,
    pub max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub bind_addr: String,
    pub styles_dir: Option<PathBuf>,
    pub default_style: String,
    pub assets_dir: PathBuf,
    pub image: ImageSettings,
    pub llm: LlmSettings,
}

/// Typed reads over a variable source. Production reads the process
/// environment; tests hand in a closure over a map.
struct Vars<F: Fn(&str) -> Option<String>> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|value| !value.trim().is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name).unwrap_or_else(|| default.to_string())
    }

    fn f32(&self, name: &str, default: f32) -> f32 {
        self.raw(name)
            .and_then(|value| value.trim().parse::<f32>().ok())
            .unwrap_or(default)
    }

    fn u64(&self, name: &str, default: u64) -> u64 {
        self.raw(name)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(default)
    }

    fn usize(&self, name: &str, default: usize) -> usize {
        self.raw(name)
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(default)
    }

    fn parsed<T: FromStr>(&self, name: &str, default: T) -> T {
        let Some(value) = self.raw(name) else {
            return default;
        };
        match value.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Unknown {} value '{}'; using the default.", name, value);
                default
            }
        }
    }
}

fn clamp_temperature(value: f32) -> f32 {
    if value.is_nan() {
        return 0.6;
    }
    value.clamp(0.0, 1.0)
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Self::from_vars(|name| env::var(name).ok()))
    }

    pub fn from_vars<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let vars = Vars { lookup };

        let openrouter_api_key = vars.string("OPENROUTER_API_KEY", "");
        let openrouter_base_url = vars.string("OPENROUTER_BASE_URL", "https://openrouter.ai/api/v1");
        let site_url = vars.string("OPENROUTER_SITE_URL", "http://localhost:3000");
        let app_name = vars.string("OPENROUTER_APP_NAME", "Base Persona");

        let image = ImageSettings {
            default_provider: vars.parsed("IMG_PROVIDER", ImageProvider::OpenAi),
            timeout_ms: vars.u64("IMG_TIMEOUT_MS", 30_000),
            negative_prompt: vars.string("IMG_NEGATIVE_PROMPT", DEFAULT_NEGATIVE_PROMPT),
            openai_api_key: vars.string("IMG_OPENAI_API_KEY", ""),
            openai_model: vars.string("IMG_OPENAI_MODEL", "gpt-image-1"),
            openai_base_url: vars.string("IMG_OPENAI_BASE_URL", "https://api.openai.com/v1"),
            sdwebui_url: vars.string("SD_WEBUI_URL", ""),
            sdwebui_auth: vars.string("SD_WEBUI_AUTH", ""),
            stability_api_key: vars.string("STABILITY_API_KEY", ""),
            stability_model: vars.string("STABILITY_MODEL", "stable-diffusion-xl-1024-v1-0"),
            stability_base_url: vars.string("STABILITY_BASE_URL", "https://api.stability.ai/v1"),
            openrouter_api_key: openrouter_api_key.clone(),
            openrouter_base_url: openrouter_base_url.clone(),
            openrouter_model: vars.string("IMG_OPENROUTER_MODEL", "black-forest-labs/flux-1.1-pro"),
            site_url: site_url.clone(),
            app_name: app_name.clone(),
        };

        let llm = LlmSettings {
            provider: vars.parsed("LLM_PROVIDER", ChatProvider::OpenAi),
            openai_api_key: vars.string("LLM_OPENAI_API_KEY", ""),
            openai_model: vars.string("LLM_OPENAI_MODEL", "gpt-4o-mini"),
            openai_base_url: vars.string("LLM_OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openrouter_api_key,
            openrouter_base_url,
            openrouter_model: vars.string("LLM_OPENROUTER_MODEL", "openai/gpt-4o-mini"),
            site_url,
            app_name,
            temperature: clamp_temperature(vars.f32("LLM_TEMPERATURE", 0.6)),
            timeout_ms: vars.u64("LLM_TIMEOUT_MS", 25_000),
            max_attempts: vars.usize("LLM_MAX_ATTEMPTS", 3).max(1),
            retry_base_delay_ms: vars.u64("LLM_RETRY_BASE_MS", 400),
        };

        Config {
            log_level: vars.string("LOG_LEVEL", "info").to_lowercase(),
            bind_addr: vars.string("BIND_ADDR", "0.0.0.0:3000"),
            styles_dir: vars.raw("PERSONA_STYLES_DIR").map(PathBuf::from),
            default_style: vars.string("PERSONA_DEFAULT_STYLE", "anime-cyberpunk"),
            assets_dir: PathBuf::from(vars.string("PERSONA_ASSETS_DIR", "assets")),
            image,
            llm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_vars(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = config_from(&[]);
        assert_eq!(config.image.default_provider, ImageProvider::OpenAi);
        assert_eq!(config.image.timeout_ms, 30_000);
        assert_eq!(config.llm.provider, ChatProvider::OpenAi);
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.default_style, "anime-cyberpunk");
        assert!(config.styles_dir.is_none());
    }

    #[test]
    fn provider_names_and_numbers_are_parsed() {
        let config = config_from(&[
            ("IMG_PROVIDER", "SDWebUI"),
            ("LLM_PROVIDER", "openrouter"),
            ("IMG_TIMEOUT_MS", "1500"),
            ("LLM_TEMPERATURE", "3.5"),
        ]);
        assert_eq!(config.image.default_provider, ImageProvider::SdWebUi);
        assert_eq!(config.llm.provider, ChatProvider::OpenRouter);
        assert_eq!(config.image.timeout_ms, 1500);
        assert_eq!(config.llm.temperature, 1.0);
    }

    #[test]
    fn unknown_provider_keeps_default() {
        let config = config_from(&[("IMG_PROVIDER", "midjourney"), ("LLM_MAX_ATTEMPTS", "0")]);
        assert_eq!(config.image.default_provider, ImageProvider::OpenAi);
        assert_eq!(config.llm.max_attempts, 1);
    }
}
