use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::image::{ImageProvider, ImageSize};
use crate::llm::narrative::{Narrative, NarrativeMeta};
use crate::metrics::WalletMetrics;
use crate::traits::catalog::TraitPick;
use crate::traits::rules::Species;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    pub ts: String,
    pub img_provider: ImageProvider,
    pub llm_provider: &'static str,
    pub default_style: String,
    pub styles: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraitsRequest {
    pub address: Option<String>,
    pub metrics: WalletMetrics,
    pub style: Option<String>,
    pub model_version: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraitsResponse {
    pub ok: bool,
    pub style: String,
    pub style_version: String,
    pub species: Species,
    pub names: BTreeMap<String, String>,
    pub traits: BTreeMap<String, Option<TraitPick>>,
    pub prompt: String,
    pub prompt_hash: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptRequest {
    pub names: Option<BTreeMap<String, String>>,
    pub style: Option<String>,
    pub species: Option<Species>,
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PromptResponse {
    pub ok: bool,
    pub style: String,
    pub prompt: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageRequest {
    pub prompt: Option<String>,
    pub size: Option<String>,
    pub provider: Option<String>,
    pub negative_prompt: Option<String>,
    pub high_detail: Option<bool>,
    pub seed_input: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub ok: bool,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    pub provider_used: ImageProvider,
    pub prompt_used: String,
    pub size: ImageSize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NarrativeRequest {
    pub persona: Option<Value>,
    pub traits: Option<Value>,
    pub analytics: Option<Value>,
    pub time_anchor: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeResponse {
    pub ok: bool,
    pub narrative_json: Narrative,
    pub seed: String,
    pub meta: NarrativeMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComposeRequest {
    pub subject_image: Option<String>,
    pub background_name: Option<String>,
    pub style: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ComposeResponse {
    pub ok: bool,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonaRequest {
    pub address: Option<String>,
    pub metrics: WalletMetrics,
    pub style: Option<String>,
    pub persona: Option<Value>,
    pub model_version: Option<String>,
    pub dry_run: bool,
    pub img_provider: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaResponse {
    pub ok: bool,
    pub id: String,
    pub address: String,
    pub model_version: String,
    pub style: String,
    pub trait_names: BTreeMap<String, String>,
    pub prompt: String,
    pub prompt_hash: String,
    pub narrative: Narrative,
    pub narrative_meta: NarrativeMeta,
    #[serde(rename = "imageURL", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(rename = "imageSHA256", skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<ImageProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
