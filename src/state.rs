use std::sync::Arc;

use anyhow::{Context, Result};

use crate::compose::Compositor;
use crate::config::Config;
use crate::llm::chat::ChatClient;
use crate::llm::image::ImageRenderer;
use crate::llm::narrative::NarrativeGenerator;
use crate::traits::catalog::TraitRegistry;

/// Everything a request handler needs, built once at startup and cloned
/// into each request. Nothing in here is mutated after construction.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<TraitRegistry>,
    pub renderer: ImageRenderer,
    pub narrator: NarrativeGenerator,
    pub compositor: Compositor,
}

impl AppState {
    pub fn from_config(config: Config) -> Result<Self> {
        let registry = TraitRegistry::load(config.styles_dir.as_deref(), &config.default_style)
            .context("Failed to load trait styles")?;
        Ok(Self::with_registry(config, registry))
    }

    pub fn with_registry(config: Config, registry: TraitRegistry) -> Self {
        AppState {
            renderer: ImageRenderer::new(config.image.clone()),
            narrator: NarrativeGenerator::new(ChatClient::new(config.llm.clone())),
            compositor: Compositor::new(config.assets_dir.clone()),
            registry: Arc::new(registry),
            config: Arc::new(config),
        }
    }
}
