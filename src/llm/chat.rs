use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::LlmSettings;
use crate::llm::{send_json, ProviderError};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_provider_timing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatProvider {
    OpenAi,
    OpenRouter,
}

impl ChatProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatProvider::OpenAi => "openai",
            ChatProvider::OpenRouter => "openrouter",
        }
    }
}

impl fmt::Display for ChatProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown chat provider '{0}'")]
pub struct UnknownChatProvider(pub String);

impl FromStr for ChatProvider {
    type Err = UnknownChatProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ChatProvider::OpenAi),
            "openrouter" => Ok(ChatProvider::OpenRouter),
            _ => Err(UnknownChatProvider(value.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub request_id: Option<String>,
}

/// One OpenAI-compatible chat endpoint, chosen at construction.
#[derive(Debug, Clone)]
pub struct ChatClient {
    settings: Arc<LlmSettings>,
}

impl ChatClient {
    pub fn new(settings: LlmSettings) -> Self {
        ChatClient {
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    pub fn provider(&self) -> ChatProvider {
        self.settings.provider
    }

    pub fn model(&self) -> &str {
        match self.settings.provider {
            ChatProvider::OpenAi => &self.settings.openai_model,
            ChatProvider::OpenRouter => &self.settings.openrouter_model,
        }
    }

    fn api_key(&self) -> &str {
        match self.settings.provider {
            ChatProvider::OpenAi => &self.settings.openai_api_key,
            ChatProvider::OpenRouter => &self.settings.openrouter_api_key,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key().trim().is_empty()
    }

    /// One attempt, no retries. `json_mode` asks the provider for a JSON
    /// object response.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        json_mode: bool,
        operation: &str,
    ) -> Result<ChatCompletion, ProviderError> {
        let provider = self.provider().as_str();
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured {
                provider,
                missing: match self.provider() {
                    ChatProvider::OpenAi => "LLM_OPENAI_API_KEY",
                    ChatProvider::OpenRouter => "OPENROUTER_API_KEY",
                },
            });
        }

        let mut payload = json!({
            "model": self.model(),
            "temperature": self.settings.temperature,
            "messages": messages
                .iter()
                .map(|message| json!({ "role": message.role, "content": message.content }))
                .collect::<Vec<_>>(),
        });
        if json_mode {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        debug!(
            "{} chat request: model={}, messages={}, json_mode={}",
            provider,
            self.model(),
            messages.len(),
            json_mode
        );

        let request = self.build_request(&payload);
        let response = log_provider_timing(provider, self.model(), operation, None, || {
            send_json(provider, request)
        })
        .await?;

        let content = response
            .body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        Ok(ChatCompletion {
            content,
            request_id: response.request_id,
        })
    }

    fn build_request(&self, payload: &Value) -> reqwest::RequestBuilder {
        let timeout = Duration::from_millis(self.settings.timeout_ms);
        let client = get_http_client();
        let request = match self.settings.provider {
            ChatProvider::OpenAi => client
                .post(format!(
                    "{}/chat/completions",
                    self.settings.openai_base_url.trim_end_matches('/')
                ))
                .bearer_auth(&self.settings.openai_api_key),
            ChatProvider::OpenRouter => client
                .post(format!(
                    "{}/chat/completions",
                    self.settings.openrouter_base_url.trim_end_matches('/')
                ))
                .bearer_auth(&self.settings.openrouter_api_key)
                .header("HTTP-Referer", &self.settings.site_url)
                .header("X-Title", &self.settings.app_name),
        };
        request.timeout(timeout).json(payload)
    }
}
