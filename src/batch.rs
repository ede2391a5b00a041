//! Offline generator: renders a persona for every wallet in a JSON file and
//! writes the subject, the final composite and token metadata to disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::metrics::WalletMetrics;
use crate::persona::{render_persona, seed_input, trait_sheet, DEFAULT_MODEL_VERSION};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct BatchArgs {
    pub input: PathBuf,
    pub limit: Option<usize>,
    pub out_dir: PathBuf,
    pub style: Option<String>,
    pub model_version: String,
}

impl BatchArgs {
    pub fn new(input: PathBuf) -> Self {
        BatchArgs {
            input,
            limit: None,
            out_dir: PathBuf::from("output"),
            style: None,
            model_version: DEFAULT_MODEL_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub generated: usize,
    pub degraded: usize,
    pub failed: usize,
}

#[derive(Debug, Deserialize)]
struct WalletRecord {
    address: String,
    #[serde(flatten)]
    metrics: WalletMetrics,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenAttribute {
    pub trait_type: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub description: String,
    pub image: String,
    pub attributes: Vec<TokenAttribute>,
}

/// Lowercased, with everything outside `[a-z0-9]` replaced by `_`.
pub fn sanitize_address(address: &str) -> String {
    address
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '_' })
        .collect()
}

async fn read_wallets(path: &Path) -> Result<Vec<WalletRecord>> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read wallet file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Wallet file {} is not a JSON array of wallets", path.display()))
}

pub async fn run_batch(state: &AppState, args: BatchArgs) -> Result<BatchSummary> {
    let catalog = state.registry.get(args.style.as_deref())?;
    let wallets = read_wallets(&args.input).await?;
    let take = args.limit.unwrap_or(wallets.len()).min(wallets.len());

    let subjects_dir = args.out_dir.join("subjects");
    let finals_dir = args.out_dir.join("finals");
    let metadata_dir = args.out_dir.join("metadata");
    for dir in [&subjects_dir, &finals_dir, &metadata_dir] {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    info!(
        "Starting batch: input={}, wallets={}, limit={}, style={}, out={}",
        args.input.display(),
        wallets.len(),
        take,
        catalog.style,
        args.out_dir.display()
    );

    let mut summary = BatchSummary::default();
    for (index, wallet) in wallets.into_iter().take(take).enumerate() {
        summary.total += 1;
        let safe_name = sanitize_address(&wallet.address);
        let sheet = trait_sheet(&catalog, &wallet.address, &wallet.metrics, &args.model_version);

        let image = match render_persona(
            state,
            catalog.clone(),
            &sheet,
            seed_input(&wallet.address, &args.model_version),
            None,
        )
        .await
        {
            Ok(image) => image,
            Err(err) => {
                summary.failed += 1;
                warn!("Skipping {}: {}", wallet.address, err);
                continue;
            }
        };

        let subject = image.render.image_bytes().unwrap_or_default();
        fs::write(subjects_dir.join(format!("{safe_name}.png")), &subject).await?;

        let final_png = match image.composed {
            Some(composed) => composed.png,
            None => {
                summary.degraded += 1;
                let compositor = state.compositor.clone();
                let catalog = catalog.clone();
                let background = sheet.background;
                let composed = tokio::task::spawn_blocking(move || {
                    compositor.composite(&subject, background, &catalog.postprocess)
                })
                .await?;
                match composed {
                    Ok(composed) => composed.png,
                    Err(err) => {
                        summary.failed += 1;
                        warn!("Skipping {}: {}", wallet.address, err);
                        continue;
                    }
                }
            }
        };
        let final_name = format!("{safe_name}.png");
        let final_path = finals_dir.join(&final_name);
        fs::write(&final_path, &final_png).await?;

        let metadata = TokenMetadata {
            name: format!("Base Persona {}", index + 1),
            description: catalog.description.clone(),
            image: final_name,
            attributes: sheet
                .traits
                .entries()
                .iter()
                .map(|entry| TokenAttribute {
                    trait_type: entry.layer.clone(),
                    value: entry.name.clone(),
                })
                .collect(),
        };
        fs::write(
            metadata_dir.join(format!("{safe_name}.json")),
            serde_json::to_string_pretty(&metadata)?,
        )
        .await?;

        summary.generated += 1;
        info!("Generated {} -> {}", wallet.address, final_path.display());
    }

    info!(
        "Batch complete: total={} generated={} degraded={} failed={}",
        summary.total, summary.generated, summary.degraded, summary.failed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::image::ImageProvider;
    use crate::llm::testing::{spawn_mock, UNREACHABLE};
    use crate::traits::catalog::TraitRegistry;
    use crate::traits::rules::BackgroundName;
    use axum::routing::post;
    use axum::{Json, Router};
    use base64::{engine::general_purpose, Engine as _};
    use serde_json::json;

    #[test]
    fn addresses_are_sanitized_for_file_names() {
        assert_eq!(sanitize_address("0xAbC-12.x"), "0xabc_12_x");
        assert_eq!(sanitize_address("wallet one"), "wallet_one");
    }

    fn batch_state(assets: &Path, sdwebui_url: &str) -> AppState {
        let mut config = Config::from_vars(|_| None);
        config.assets_dir = assets.to_path_buf();
        config.image.default_provider = ImageProvider::SdWebUi;
        config.image.sdwebui_url = sdwebui_url.to_string();
        config.image.timeout_ms = 2_000;
        let registry = TraitRegistry::bundled(&config.default_style).unwrap();
        AppState::with_registry(config, registry)
    }

    #[tokio::test]
    async fn rendered_wallets_are_composited_on_their_holdings_background() {
        let mut subject = Vec::new();
        ::image::RgbaImage::from_fn(48, 48, |x, y| ::image::Rgba([(x * 5) as u8, (y * 5) as u8, 200, 255]))
            .write_to(&mut std::io::Cursor::new(&mut subject), ::image::ImageFormat::Png)
            .unwrap();
        let payload = general_purpose::STANDARD.encode(&subject);
        let router = Router::new().route(
            "/sdapi/v1/txt2img",
            post(move || {
                let payload = payload.clone();
                async move { Json(json!({ "images": [payload] })) }
            }),
        );
        let url = spawn_mock(router).await;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("wallets.json");
        std::fs::write(
            &input,
            json!([{
                "address": "0x00000000000000000000000000000000000000d1",
                "holds_base_builder": true,
                "holds_base_introduced": true,
                "total_txs": 120,
            }])
            .to_string(),
        )
        .unwrap();

        let state = batch_state(&dir.path().join("assets"), &url);
        let mut args = BatchArgs::new(input);
        args.out_dir = dir.path().join("out");
        let summary = run_batch(&state, args).await.unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                total: 1,
                generated: 1,
                degraded: 0,
                failed: 0,
            }
        );

        let out = dir.path().join("out");
        let stem = "0x00000000000000000000000000000000000000d1";
        let written = std::fs::read(out.join("subjects").join(format!("{stem}.png"))).unwrap();
        assert_eq!(written, subject);

        let final_png = std::fs::read(out.join("finals").join(format!("{stem}.png"))).unwrap();
        let decoded = ::image::load_from_memory(&final_png).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (1024, 1024));
        assert_eq!(decoded.get_pixel(0, 0).0, BackgroundName::DualCore.fallback_rgb());

        let raw = std::fs::read_to_string(out.join("metadata").join(format!("{stem}.json"))).unwrap();
        let metadata: TokenMetadata = serde_json::from_str(&raw).unwrap();
        assert_eq!(metadata.attributes[0].value, "Dual Core");
        let catalog = state.registry.get(None).unwrap();
        let types: Vec<&str> = metadata
            .attributes
            .iter()
            .map(|attr| attr.trait_type.as_str())
            .collect();
        let in_catalog_order: Vec<&str> = catalog
            .layers
            .iter()
            .map(|layer| layer.name.as_str())
            .filter(|name| types.contains(name))
            .collect();
        assert_eq!(types, in_catalog_order);
        assert!(types.len() >= 8);
    }

    #[tokio::test]
    async fn writes_finals_and_metadata_even_when_rendering_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("wallets.json");
        std::fs::write(
            &input,
            json!([
                { "address": "0x00000000000000000000000000000000000000AA", "unique_contracts": 600, "holds_base_builder": true },
                { "address": "0x00000000000000000000000000000000000000bb" },
                { "address": "0x00000000000000000000000000000000000000cc" },
            ])
            .to_string(),
        )
        .unwrap();

        let state = batch_state(&dir.path().join("assets"), UNREACHABLE);

        let mut args = BatchArgs::new(input);
        args.limit = Some(2);
        args.out_dir = dir.path().join("out");
        let summary = run_batch(&state, args).await.unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                total: 2,
                generated: 2,
                degraded: 2,
                failed: 0,
            }
        );

        let out = dir.path().join("out");
        let stem = "0x00000000000000000000000000000000000000aa";
        let final_png = std::fs::read(out.join("finals").join(format!("{stem}.png"))).unwrap();
        let decoded = ::image::load_from_memory(&final_png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1024, 1024));
        assert!(out.join("subjects").join(format!("{stem}.png")).exists());
        assert!(!out.join("finals").join("0x00000000000000000000000000000000000000cc.png").exists());

        let raw = std::fs::read_to_string(out.join("metadata").join(format!("{stem}.json"))).unwrap();
        let metadata: TokenMetadata = serde_json::from_str(&raw).unwrap();
        assert_eq!(metadata.name, "Base Persona 1");
        assert_eq!(metadata.image, format!("{stem}.png"));
        assert_eq!(metadata.attributes[0].trait_type, "Background");
        assert_eq!(metadata.attributes[0].value, "Builder Grid");
        assert!(metadata
            .attributes
            .iter()
            .any(|attr| attr.trait_type == "Headwear" && attr.value == "Omni Headdress"));
    }
}
