//! Typed trait catalogs. Each art style is one JSON document describing its
//! layers, their threshold tables and the prompt mode; documents are parsed
//! and validated once, at startup, into the structures below.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::compose::PostprocessSettings;
use crate::metrics::Metric;
use crate::traits::bucket::TierOrder;
use crate::traits::rules::{BackgroundName, Gender};

const BUNDLED_STYLES: [(&str, &str); 2] = [
    (
        "anime-cyberpunk.json",
        include_str!("../../config/styles/anime-cyberpunk.json"),
    ),
    (
        "minimal-lite.json",
        include_str!("../../config/styles/minimal-lite.json"),
    ),
];

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read style file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse style document {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Style '{style}' layer '{layer}' is invalid: {reason}")]
    InvalidLayer {
        style: String,
        layer: String,
        reason: String,
    },
    #[error("Style '{style}' is invalid: {reason}")]
    InvalidStyle { style: String, reason: String },
    #[error("Style '{0}' is defined more than once")]
    DuplicateStyle(String),
    #[error("Unknown style '{0}'")]
    UnknownStyle(String),
    #[error("No styles found in {0}")]
    Empty(PathBuf),
}

/// One named, prompt-bearing trait value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitPick {
    pub name: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SignatureTier {
    pub min_top: usize,
    #[serde(rename = "trait")]
    pub trait_name: String,
}

/// Where a layer's trait comes from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerSource {
    Metric {
        metric: Metric,
        #[serde(default)]
        order: TierOrder,
    },
    BirthMonth,
    NftHoldings,
    Fixed,
    /// Awarded from the number of other layers sitting at their best tier.
    Signature { tiers: Vec<SignatureTier> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PromptStyle {
    /// Named `{placeholder}` substitution into a single template.
    Template { template: String },
    /// Fixed-order fragment list wrapped in immutable style-lock clauses.
    Locked {
        order: Vec<String>,
        #[serde(default)]
        lead: Vec<String>,
        #[serde(default)]
        tail: Vec<String>,
        #[serde(default)]
        species_cue: bool,
    },
}

#[derive(Debug, Deserialize)]
struct StyleDocument {
    style: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    description: String,
    prompt: PromptStyle,
    layers: Vec<LayerDocument>,
    #[serde(default)]
    postprocess: PostprocessSettings,
}

#[derive(Debug, Deserialize)]
struct LayerDocument {
    name: String,
    source: LayerSource,
    #[serde(default)]
    buckets: Vec<BucketDocument>,
}

#[derive(Debug, Deserialize)]
struct BucketDocument {
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(rename = "trait")]
    trait_pick: TraitPick,
}

#[derive(Debug, Clone)]
pub struct TraitLayer {
    pub name: String,
    pub source: LayerSource,
    /// Cutoffs handed to the bucketizer, ascending. Empty for layers that are
    /// not metric-driven.
    pub stops: Vec<f64>,
    pub traits: Vec<TraitPick>,
}

impl TraitLayer {
    pub fn find(&self, trait_name: &str) -> Option<&TraitPick> {
        self.traits.iter().find(|pick| pick.name == trait_name)
    }

    /// Trait for a tier index, clamped to the last configured entry.
    pub fn at_tier(&self, tier: usize) -> Option<&TraitPick> {
        let last = self.traits.len().checked_sub(1)?;
        self.traits.get(tier.min(last))
    }

    /// The best trait this layer can award, if the layer is ranked at all.
    pub fn top_tier(&self) -> Option<&TraitPick> {
        match &self.source {
            LayerSource::Metric {
                order: TierOrder::LowerIsBetter,
                ..
            } => self.traits.first(),
            LayerSource::Metric { .. } | LayerSource::NftHoldings => self.traits.last(),
            LayerSource::BirthMonth | LayerSource::Fixed | LayerSource::Signature { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TraitCatalog {
    pub style: String,
    pub version: String,
    pub description: String,
    pub prompt: PromptStyle,
    pub layers: Vec<TraitLayer>,
    pub postprocess: PostprocessSettings,
}

impl TraitCatalog {
    pub fn from_json(origin: &str, raw: &str) -> Result<Self, CatalogError> {
        let document: StyleDocument =
            serde_json::from_str(raw).map_err(|source| CatalogError::Parse {
                origin: origin.to_string(),
                source,
            })?;
        Self::from_document(document)
    }

    pub fn layer(&self, name: &str) -> Option<&TraitLayer> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    fn from_document(document: StyleDocument) -> Result<Self, CatalogError> {
        let style = document.style.trim().to_string();
        if style.is_empty() {
            return Err(CatalogError::InvalidStyle {
                style: "<unnamed>".to_string(),
                reason: "style name is empty".to_string(),
            });
        }
        if document.layers.is_empty() {
            return Err(CatalogError::InvalidStyle {
                style,
                reason: "no layers defined".to_string(),
            });
        }

        let mut seen = HashSet::new();
        let mut layers = Vec::with_capacity(document.layers.len());
        for layer in document.layers {
            if !seen.insert(layer.name.clone()) {
                return Err(CatalogError::InvalidLayer {
                    style,
                    layer: layer.name,
                    reason: "duplicate layer name".to_string(),
                });
            }
            layers.push(validate_layer(&style, layer)?);
        }

        if let PromptStyle::Locked { order, .. } = &document.prompt {
            if let Some(missing) = order.iter().find(|name| !seen.contains(*name)) {
                return Err(CatalogError::InvalidStyle {
                    style,
                    reason: format!("locked prompt order references unknown layer '{missing}'"),
                });
            }
        }

        let catalog = TraitCatalog {
            style,
            version: document.version,
            description: document.description,
            prompt: document.prompt,
            layers,
            postprocess: document.postprocess,
        };
        catalog.warn_on_missing_names();
        Ok(catalog)
    }

    /// Names the selector derives in code but looks up by label. A gap here
    /// resolves to an empty pick at selection time, so it is only reported.
    fn warn_on_missing_names(&self) {
        for layer in &self.layers {
            let expected: Vec<String> = match &layer.source {
                LayerSource::BirthMonth => [Gender::Male, Gender::Female]
                    .iter()
                    .map(|gender| gender.label().to_string())
                    .collect(),
                LayerSource::NftHoldings => BackgroundName::ALL
                    .iter()
                    .map(|name| name.label().to_string())
                    .collect(),
                LayerSource::Signature { tiers } => {
                    tiers.iter().map(|tier| tier.trait_name.clone()).collect()
                }
                LayerSource::Metric { .. } | LayerSource::Fixed => Vec::new(),
            };
            for name in expected {
                if layer.find(&name).is_none() {
                    warn!(
                        "Style '{}' layer '{}' has no trait named '{}'; picks for it will be empty.",
                        self.style, layer.name, name
                    );
                }
            }
        }
    }
}

fn validate_layer(style: &str, layer: LayerDocument) -> Result<TraitLayer, CatalogError> {
    let invalid = |reason: String| CatalogError::InvalidLayer {
        style: style.to_string(),
        layer: layer.name.clone(),
        reason,
    };

    if layer.name.trim().is_empty() {
        return Err(invalid("layer name is empty".to_string()));
    }
    let is_signature = matches!(layer.source, LayerSource::Signature { .. });
    if layer.buckets.is_empty() && !is_signature {
        return Err(invalid("no buckets defined".to_string()));
    }
    if let Some(bucket) = layer
        .buckets
        .iter()
        .find(|bucket| bucket.trait_pick.name.trim().is_empty())
    {
        return Err(invalid(format!(
            "bucket with prompt '{}' has an empty trait name",
            bucket.trait_pick.prompt
        )));
    }

    let stops = match &layer.source {
        LayerSource::Metric { order, .. } => {
            // Ascending tables treat the first bucket as the floor; lower-is-better
            // tables treat the last bucket as "beyond every ceiling".
            let cutoffs: Vec<&BucketDocument> = match order {
                TierOrder::Ascending => layer.buckets.iter().skip(1).collect(),
                TierOrder::LowerIsBetter => {
                    let keep = layer.buckets.len().saturating_sub(1);
                    layer.buckets.iter().take(keep).collect()
                }
            };
            let mut stops = Vec::with_capacity(cutoffs.len());
            for bucket in cutoffs {
                let Some(threshold) = bucket.threshold else {
                    return Err(invalid(format!(
                        "trait '{}' is missing its threshold",
                        bucket.trait_pick.name
                    )));
                };
                if !threshold.is_finite() {
                    return Err(invalid(format!(
                        "trait '{}' has a non-finite threshold",
                        bucket.trait_pick.name
                    )));
                }
                if stops.last().is_some_and(|previous| threshold <= *previous) {
                    return Err(invalid(format!(
                        "threshold {threshold} for '{}' is not strictly ascending",
                        bucket.trait_pick.name
                    )));
                }
                stops.push(threshold);
            }
            stops
        }
        LayerSource::Signature { tiers } => {
            if tiers.is_empty() {
                return Err(invalid("signature layer has no tiers".to_string()));
            }
            if tiers.iter().any(|tier| tier.min_top == 0) {
                return Err(invalid("signature tier min_top must be positive".to_string()));
            }
            Vec::new()
        }
        LayerSource::BirthMonth | LayerSource::NftHoldings | LayerSource::Fixed => Vec::new(),
    };

    let mut source = layer.source;
    if let LayerSource::Signature { tiers } = &mut source {
        tiers.sort_by(|a, b| b.min_top.cmp(&a.min_top));
    }

    Ok(TraitLayer {
        name: layer.name,
        source,
        stops,
        traits: layer
            .buckets
            .into_iter()
            .map(|bucket| bucket.trait_pick)
            .collect(),
    })
}

/// All registered art styles, keyed by style id.
#[derive(Debug, Clone)]
pub struct TraitRegistry {
    styles: BTreeMap<String, Arc<TraitCatalog>>,
    default_style: String,
}

impl TraitRegistry {
    pub fn bundled(default_style: &str) -> Result<Self, CatalogError> {
        let catalogs = BUNDLED_STYLES
            .iter()
            .map(|(origin, raw)| TraitCatalog::from_json(origin, raw))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_catalogs(catalogs, default_style)
    }

    pub fn load_dir(dir: &Path, default_style: &str) -> Result<Self, CatalogError> {
        let entries = fs::read_dir(dir).map_err(|source| CatalogError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CatalogError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();
        if paths.is_empty() {
            return Err(CatalogError::Empty(dir.to_path_buf()));
        }

        let mut catalogs = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = fs::read_to_string(&path).map_err(|source| CatalogError::Io {
                path: path.clone(),
                source,
            })?;
            catalogs.push(TraitCatalog::from_json(&path.display().to_string(), &raw)?);
        }
        Self::from_catalogs(catalogs, default_style)
    }

    /// Styles from `dir` when given, otherwise the bundled set.
    pub fn load(dir: Option<&Path>, default_style: &str) -> Result<Self, CatalogError> {
        let registry = match dir {
            Some(dir) => Self::load_dir(dir, default_style)?,
            None => Self::bundled(default_style)?,
        };
        info!(
            "Loaded {} persona style(s): {} (default: {})",
            registry.styles.len(),
            registry.style_names().join(", "),
            registry.default_style
        );
        Ok(registry)
    }

    pub fn from_catalogs(
        catalogs: Vec<TraitCatalog>,
        default_style: &str,
    ) -> Result<Self, CatalogError> {
        let mut styles = BTreeMap::new();
        for catalog in catalogs {
            let style = catalog.style.clone();
            if styles.insert(style.clone(), Arc::new(catalog)).is_some() {
                return Err(CatalogError::DuplicateStyle(style));
            }
        }
        if !styles.contains_key(default_style) {
            return Err(CatalogError::UnknownStyle(default_style.to_string()));
        }
        Ok(TraitRegistry {
            styles,
            default_style: default_style.to_string(),
        })
    }

    /// The requested style, or the default when none is named.
    pub fn get(&self, style: Option<&str>) -> Result<Arc<TraitCatalog>, CatalogError> {
        let name = style
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.default_style);
        self.styles
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownStyle(name.to_string()))
    }

    pub fn default_style(&self) -> &str {
        &self.default_style
    }

    pub fn style_names(&self) -> Vec<String> {
        self.styles.keys().cloned().collect()
    }
}
