//! The end-to-end persona pipeline shared by the HTTP API and the batch
//! generator: traits, prompt, render, composite.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::compose::{ComposeError, ComposedImage};
use crate::llm::image::{ImageProvider, ImageSize, RenderRequest, RenderResult};
use crate::metrics::WalletMetrics;
use crate::prompt::build_prompt;
use crate::state::AppState;
use crate::traits::catalog::TraitCatalog;
use crate::traits::rules::{background_for, species_for_address, BackgroundName, Species};
use crate::traits::select::{select_traits, LayerResult};
use crate::utils::hash::{canonical_json, keccak_hex};

pub const DEFAULT_MODEL_VERSION: &str = "persona_v1";
const BACKGROUND_LAYER: &str = "Background";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error("compositor task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Traits and prompt for one wallet under one style.
#[derive(Debug, Clone)]
pub struct TraitSheet {
    pub traits: LayerResult,
    pub species: Species,
    pub prompt: String,
    pub prompt_hash: String,
    pub background: BackgroundName,
}

impl TraitSheet {
    pub fn names(&self) -> BTreeMap<String, String> {
        self.traits.names()
    }
}

/// keccak256 over the canonical `{modelVersion, names, prompt}` document.
pub fn prompt_hash(model_version: &str, names: &BTreeMap<String, String>, prompt: &str) -> String {
    keccak_hex(&canonical_json(&json!({
        "modelVersion": model_version,
        "names": names,
        "prompt": prompt,
    })))
}

/// Seed input for a wallet's render, stable across calls for the same
/// address and model version.
pub fn seed_input(address: &str, model_version: &str) -> String {
    canonical_json(&json!({
        "address": address.to_lowercase(),
        "modelVersion": model_version,
    }))
}

/// Background asset for the selection; styles whose Background layer is not
/// one of the known names fall back to the NFT-holding rule.
pub fn background_of(traits: &LayerResult, metrics: &WalletMetrics) -> BackgroundName {
    traits
        .name(BACKGROUND_LAYER)
        .and_then(BackgroundName::from_label)
        .unwrap_or_else(|| background_for(metrics.holds_base_builder, metrics.holds_base_introduced))
}

pub fn trait_sheet(
    catalog: &TraitCatalog,
    address: &str,
    metrics: &WalletMetrics,
    model_version: &str,
) -> TraitSheet {
    let traits = select_traits(catalog, metrics);
    let species = species_for_address(address);
    let prompt = build_prompt(catalog, &traits, Some(species));
    let prompt_hash = prompt_hash(model_version, &traits.names(), &prompt);
    let background = background_of(&traits, metrics);
    TraitSheet {
        traits,
        species,
        prompt,
        prompt_hash,
        background,
    }
}

#[derive(Debug, Clone)]
pub struct PersonaImage {
    pub render: RenderResult,
    /// Present only when the render succeeded.
    pub composed: Option<ComposedImage>,
}

/// Renders the subject and composites it. A degraded render skips
/// compositing and carries the placeholder through.
pub async fn render_persona(
    state: &AppState,
    catalog: Arc<TraitCatalog>,
    sheet: &TraitSheet,
    seed_input: String,
    provider: Option<ImageProvider>,
) -> Result<PersonaImage, PipelineError> {
    let render = state
        .renderer
        .render(RenderRequest {
            prompt: sheet.prompt.clone(),
            size: ImageSize::Square1024,
            provider,
            negative_prompt: None,
            high_detail: true,
            seed_input: Some(seed_input),
        })
        .await;

    if render.is_degraded() {
        warn!(
            "Render via {} degraded; skipping composite",
            render.provider_used
        );
        return Ok(PersonaImage {
            render,
            composed: None,
        });
    }
    let Some(subject) = render.image_bytes() else {
        return Ok(PersonaImage {
            render: render.degrade("subject payload is not base64"),
            composed: None,
        });
    };

    let compositor = state.compositor.clone();
    let background = sheet.background;
    let composed = tokio::task::spawn_blocking(move || {
        compositor.composite(&subject, background, &catalog.postprocess)
    })
    .await?;
    let composed = match composed {
        Ok(composed) => composed,
        Err(err @ ComposeError::InvalidSubject(_)) => {
            warn!("Render via {} returned an unusable subject: {}", render.provider_used, err);
            return Ok(PersonaImage {
                render: render.degrade(err.to_string()),
                composed: None,
            });
        }
        Err(err) => return Err(err.into()),
    };
    info!(
        "Composited {}x{} persona on {} ({} bytes)",
        composed.width,
        composed.height,
        background,
        composed.png.len()
    );

    Ok(PersonaImage {
        render,
        composed: Some(composed),
    })
}
