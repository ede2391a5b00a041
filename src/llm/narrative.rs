//! Persona narrative copy from a chat model, with bounded retries and a
//! field-by-field fallback. `NarrativeGenerator::generate` never fails.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::llm::chat::{ChatClient, ChatMessage};
use crate::llm::media::should_retry_status;
use crate::llm::ProviderError;

const SYSTEM_PROMPT: &str = "You are a precise, brand-safe copywriter. Output strict JSON with keys:\n\
{ \"title\": string, \"oneLiner\": string, \"summary\": string, \"highlights\": string[], \"personalityTags\": string[] }.\n\
- No financial advice, no identity claims, no sensitive judgments.\n\
- Keep it concise.";
const USER_PREAMBLE: &str = "Generate a short persona narrative JSON for this input:";
const STATUS_JITTER_MS: u64 = 200;
const TRANSPORT_JITTER_MS: u64 = 150;
const MAX_RETRY_AFTER_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Narrative {
    pub title: String,
    pub one_liner: String,
    pub summary: String,
    pub highlights: Vec<String>,
    pub personality_tags: Vec<String>,
}

impl Narrative {
    pub fn fallback() -> Self {
        Narrative {
            title: "Your Onchain Persona".to_string(),
            one_liner: "Clean lines, degen spirit. You play the long game.".to_string(),
            summary: "Anchored to Base wallet activity. Deterministic narrative.".to_string(),
            highlights: vec![
                "Consistent activity".to_string(),
                "Risk-aware".to_string(),
                "Builder-friendly".to_string(),
            ],
            personality_tags: vec![
                "degen".to_string(),
                "neutral".to_string(),
                "builder".to_string(),
            ],
        }
    }

    /// Keeps every well-shaped field from `value` and substitutes the
    /// fallback for the rest.
    pub fn repair(value: &Value) -> Self {
        let fallback = Narrative::fallback();
        let text = |key: &str, default: String| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or(default)
        };
        let list = |key: &str, default: Vec<String>| {
            let items: Vec<String> = value
                .get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .filter(|item| !item.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if items.is_empty() {
                default
            } else {
                items
            }
        };

        Narrative {
            title: text("title", fallback.title),
            one_liner: text("oneLiner", fallback.one_liner),
            summary: text("summary", fallback.summary),
            highlights: list("highlights", fallback.highlights),
            personality_tags: list("personalityTags", fallback.personality_tags),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeMeta {
    /// Provider that produced the copy, or `fallback`.
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limited: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_sec: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tries: usize,
}

impl NarrativeMeta {
    fn fallback(error: impl Into<String>, tries: usize) -> Self {
        NarrativeMeta {
            provider: "fallback".to_string(),
            rate_limited: None,
            retry_after_sec: None,
            request_id: None,
            error: Some(error.into()),
            tries,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NarrativeOutcome {
    pub narrative: Narrative,
    pub meta: NarrativeMeta,
}

impl NarrativeOutcome {
    fn fallback(meta: NarrativeMeta) -> Self {
        NarrativeOutcome {
            narrative: Narrative::fallback(),
            meta,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NarrativeGenerator {
    client: ChatClient,
}

impl NarrativeGenerator {
    pub fn new(client: ChatClient) -> Self {
        NarrativeGenerator { client }
    }

    pub fn provider_name(&self) -> &'static str {
        self.client.provider().as_str()
    }

    fn backoff(&self, attempt: usize, jitter_ms: u64) -> Duration {
        let base = self.client.settings().retry_base_delay_ms;
        let jitter = rand::thread_rng().gen_range(0..jitter_ms.max(1));
        Duration::from_millis(base * attempt as u64 + jitter)
    }

    pub async fn generate(&self, payload: &Value) -> NarrativeOutcome {
        if !self.client.is_configured() {
            return NarrativeOutcome::fallback(NarrativeMeta::fallback("provider_or_key_missing", 0));
        }

        let provider = self.provider_name();
        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(USER_PREAMBLE),
            ChatMessage::user(payload.to_string()),
        ];
        let max_attempts = self.client.settings().max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let last_attempt = attempt == max_attempts;
            match self.client.complete(&messages, true, "narrative").await {
                Ok(completion) => {
                    let content = if completion.content.is_empty() {
                        "{}"
                    } else {
                        completion.content.as_str()
                    };
                    let Some(parsed) = serde_json::from_str::<Value>(content)
                        .ok()
                        .filter(Value::is_object)
                    else {
                        warn!("Narrative response from {} was not a JSON object", provider);
                        let mut meta = NarrativeMeta::fallback("json_parse_failed", attempt);
                        meta.request_id = completion.request_id;
                        return NarrativeOutcome::fallback(meta);
                    };
                    info!("Narrative generated via {} after {} attempt(s)", provider, attempt);
                    return NarrativeOutcome {
                        narrative: Narrative::repair(&parsed),
                        meta: NarrativeMeta {
                            provider: provider.to_string(),
                            rate_limited: None,
                            retry_after_sec: None,
                            request_id: completion.request_id,
                            error: None,
                            tries: attempt,
                        },
                    };
                }
                Err(ProviderError::Status {
                    status,
                    retry_after_secs,
                    request_id,
                    ..
                }) => {
                    warn!(
                        "Narrative request to {} failed with HTTP {} (try {}/{})",
                        provider, status, attempt, max_attempts
                    );
                    if should_retry_status(status) && !last_attempt {
                        let wait = match retry_after_secs {
                            Some(secs) => Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)),
                            None => self.backoff(attempt, STATUS_JITTER_MS),
                        };
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    return NarrativeOutcome::fallback(NarrativeMeta {
                        provider: "fallback".to_string(),
                        rate_limited: Some(status.as_u16() == 429),
                        retry_after_sec: retry_after_secs,
                        request_id,
                        error: Some(format!("{}_{}", provider, status.as_u16())),
                        tries: attempt,
                    });
                }
                Err(err @ ProviderError::NotConfigured { .. }) => {
                    warn!("Narrative provider unavailable: {}", err);
                    return NarrativeOutcome::fallback(NarrativeMeta::fallback(
                        "provider_or_key_missing",
                        attempt - 1,
                    ));
                }
                Err(err) => {
                    warn!(
                        "Narrative request to {} errored (try {}/{}): {}",
                        provider, attempt, max_attempts, err
                    );
                    if !last_attempt {
                        tokio::time::sleep(self.backoff(attempt, TRANSPORT_JITTER_MS)).await;
                        continue;
                    }
                    return NarrativeOutcome::fallback(NarrativeMeta::fallback(
                        "network_or_timeout",
                        attempt,
                    ));
                }
            }
        }

        NarrativeOutcome::fallback(NarrativeMeta::fallback("unexpected", max_attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LlmSettings};
    use crate::llm::testing::{spawn_mock, UNREACHABLE};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn settings(base_url: &str) -> LlmSettings {
        let mut settings = Config::from_vars(|_| None).llm;
        settings.openai_api_key = "sk-test".to_string();
        settings.openai_base_url = base_url.to_string();
        settings.retry_base_delay_ms = 5;
        settings.timeout_ms = 2_000;
        settings
    }

    fn generator(base_url: &str) -> NarrativeGenerator {
        NarrativeGenerator::new(ChatClient::new(settings(base_url)))
    }

    fn counting_router(
        hits: Arc<AtomicUsize>,
        status: StatusCode,
        content: &'static str,
    ) -> Router {
        Router::new().route(
            "/chat/completions",
            post(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                async move {
                    (
                        status,
                        Json(json!({ "choices": [{ "message": { "content": content } }] })),
                    )
                }
            }),
        )
    }

    #[test]
    fn repair_keeps_valid_fields_only() {
        let value = json!({
            "title": "Quiet Voltage",
            "oneLiner": 42,
            "highlights": ["ships weekly", 7, ""],
            "personalityTags": "builder",
        });
        let narrative = Narrative::repair(&value);
        let fallback = Narrative::fallback();
        assert_eq!(narrative.title, "Quiet Voltage");
        assert_eq!(narrative.one_liner, fallback.one_liner);
        assert_eq!(narrative.summary, fallback.summary);
        assert_eq!(narrative.highlights, vec!["ships weekly".to_string()]);
        assert_eq!(narrative.personality_tags, fallback.personality_tags);
    }

    #[tokio::test]
    async fn missing_key_falls_back_without_trying() {
        let mut settings = settings(UNREACHABLE);
        settings.openai_api_key.clear();
        let outcome = NarrativeGenerator::new(ChatClient::new(settings))
            .generate(&json!({}))
            .await;
        assert_eq!(outcome.narrative, Narrative::fallback());
        assert_eq!(outcome.meta.error.as_deref(), Some("provider_or_key_missing"));
        assert_eq!(outcome.meta.tries, 0);
    }

    #[tokio::test]
    async fn always_rate_limited_exhausts_attempts() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_mock(counting_router(hits.clone(), StatusCode::TOO_MANY_REQUESTS, "{}")).await;
        let outcome = generator(&base).generate(&json!({ "persona": {} })).await;

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.narrative, Narrative::fallback());
        assert_eq!(outcome.meta.provider, "fallback");
        assert_eq!(outcome.meta.rate_limited, Some(true));
        assert_eq!(outcome.meta.tries, 3);
        assert_eq!(outcome.meta.error.as_deref(), Some("openai_429"));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_mock(counting_router(hits.clone(), StatusCode::BAD_REQUEST, "{}")).await;
        let outcome = generator(&base).generate(&json!({})).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.meta.rate_limited, Some(false));
        assert_eq!(outcome.meta.error.as_deref(), Some("openai_400"));
        assert_eq!(outcome.meta.tries, 1);
    }

    #[tokio::test]
    async fn recovers_after_a_server_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/chat/completions",
            post(move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        return (StatusCode::BAD_GATEWAY, Json(json!({}))).into_response();
                    }
                    Json(json!({
                        "choices": [{ "message": { "content": "{\"title\":\"Halo Runner\",\"highlights\":[\"steady\"]}" } }]
                    }))
                    .into_response()
                }
            }),
        );
        let base = spawn_mock(router).await;
        let outcome = generator(&base).generate(&json!({})).await;

        assert_eq!(outcome.meta.provider, "openai");
        assert_eq!(outcome.meta.tries, 2);
        assert_eq!(outcome.narrative.title, "Halo Runner");
        assert_eq!(outcome.narrative.highlights, vec!["steady".to_string()]);
        assert_eq!(outcome.narrative.summary, Narrative::fallback().summary);
    }

    #[tokio::test]
    async fn malformed_json_falls_back() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_mock(counting_router(hits, StatusCode::OK, "not json at all")).await;
        let outcome = generator(&base).generate(&json!({})).await;
        assert_eq!(outcome.meta.error.as_deref(), Some("json_parse_failed"));
        assert_eq!(outcome.meta.tries, 1);
    }

    #[tokio::test]
    async fn non_object_json_counts_as_parse_failure() {
        for content in ["null", "[1, 2]", "\"a title\""] {
            let hits = Arc::new(AtomicUsize::new(0));
            let base = spawn_mock(counting_router(hits, StatusCode::OK, content)).await;
            let outcome = generator(&base).generate(&json!({})).await;
            assert_eq!(outcome.meta.provider, "fallback");
            assert_eq!(outcome.meta.error.as_deref(), Some("json_parse_failed"));
        }
    }

    #[tokio::test]
    async fn unreachable_provider_reports_network_failure() {
        let outcome = generator(UNREACHABLE).generate(&json!({})).await;
        assert_eq!(outcome.meta.error.as_deref(), Some("network_or_timeout"));
        assert_eq!(outcome.meta.tries, 3);
    }
}
