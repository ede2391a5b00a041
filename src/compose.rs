//! Final card composition: background, soft shadow, subject, logo.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageError, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::traits::rules::BackgroundName;

const MAX_CANVAS_EDGE: u32 = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("Subject image could not be decoded: {0}")]
    InvalidSubject(#[source] ImageError),
    #[error("Canvas size {width}x{height} is out of range")]
    InvalidCanvas { width: u32, height: u32 },
    #[error("Failed to encode final PNG: {0}")]
    Encode(#[source] ImageError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogoAnchor {
    #[default]
    TopRight,
    TopLeft,
    BottomRight,
    BottomLeft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogoSettings {
    pub path: Option<PathBuf>,
    pub anchor: LogoAnchor,
    pub padding: u32,
    /// Logo width as a fraction of canvas width.
    pub scale: f32,
    pub opacity: f32,
}

impl Default for LogoSettings {
    fn default() -> Self {
        LogoSettings {
            path: Some(PathBuf::from("logo.png")),
            anchor: LogoAnchor::TopRight,
            padding: 32,
            scale: 0.12,
            opacity: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    pub enabled: bool,
    pub blur: f32,
    pub opacity: f32,
    #[serde(rename = "offsetY", alias = "offset_y")]
    pub offset_y: i32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        ShadowSettings {
            enabled: true,
            blur: 18.0,
            opacity: 0.35,
            offset_y: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeSettings {
    pub canvas_size: [u32; 2],
    /// Subject width as a fraction of canvas width.
    pub subject_scale: f32,
    pub subject_shadow: ShadowSettings,
}

impl Default for CompositeSettings {
    fn default() -> Self {
        CompositeSettings {
            canvas_size: [1024, 1024],
            subject_scale: 0.82,
            subject_shadow: ShadowSettings::default(),
        }
    }
}

/// Per-style compositor settings. Asset paths are relative to the
/// compositor's assets directory unless absolute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostprocessSettings {
    pub assets: BTreeMap<BackgroundName, PathBuf>,
    pub logo: LogoSettings,
    pub composite: CompositeSettings,
}

#[derive(Debug, Clone)]
pub struct ComposedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct Compositor {
    assets_dir: PathBuf,
}

impl Compositor {
    pub fn new(assets_dir: impl Into<PathBuf>) -> Self {
        Compositor {
            assets_dir: assets_dir.into(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.assets_dir.join(path)
        }
    }

    /// Builds the final PNG. Missing or unreadable background and logo assets
    /// are replaced by a solid colour and omitted respectively; only an
    /// undecodable subject or a bad canvas size is an error.
    pub fn composite(
        &self,
        subject: &[u8],
        background: BackgroundName,
        settings: &PostprocessSettings,
    ) -> Result<ComposedImage, ComposeError> {
        let [width, height] = settings.composite.canvas_size;
        if width == 0 || height == 0 || width > MAX_CANVAS_EDGE || height > MAX_CANVAS_EDGE {
            return Err(ComposeError::InvalidCanvas { width, height });
        }
        let subject = image::load_from_memory(subject).map_err(ComposeError::InvalidSubject)?;

        let mut canvas = self.background(background, settings, width, height);
        let subject = scale_to_fit(
            &subject,
            fraction_of(width, settings.composite.subject_scale),
            height,
        );

        let shadow = &settings.composite.subject_shadow;
        if shadow.enabled && shadow.opacity > 0.0 {
            draw_shadow(&mut canvas, subject.width(), subject.height(), shadow);
        }

        let x = centered(width, subject.width());
        let y = centered(height, subject.height());
        imageops::overlay(&mut canvas, &subject, x, y);

        if let Some(logo) = self.logo(&settings.logo, width, height) {
            let (x, y) = anchor_position(&settings.logo, width, height, logo.width(), logo.height());
            imageops::overlay(&mut canvas, &logo, x, y);
        }

        let flattened = DynamicImage::ImageRgba8(canvas).to_rgb8();
        let mut png = Vec::new();
        PngEncoder::new_with_quality(Cursor::new(&mut png), CompressionType::Best, PngFilter::Adaptive)
            .write_image(flattened.as_raw(), width, height, ExtendedColorType::Rgb8)
            .map_err(ComposeError::Encode)?;

        Ok(ComposedImage { png, width, height })
    }

    fn background(
        &self,
        name: BackgroundName,
        settings: &PostprocessSettings,
        width: u32,
        height: u32,
    ) -> RgbaImage {
        if let Some(relative) = settings.assets.get(&name) {
            let path = self.resolve(relative);
            match image::open(&path) {
                Ok(asset) => return asset.resize_to_fill(width, height, FilterType::Lanczos3).to_rgba8(),
                Err(err) => debug!(
                    "Background '{}' unavailable at {}: {}; using solid colour",
                    name,
                    path.display(),
                    err
                ),
            }
        }
        let [r, g, b] = name.fallback_rgb();
        RgbaImage::from_pixel(width, height, Rgba([r, g, b, 255]))
    }

    fn logo(&self, settings: &LogoSettings, canvas_width: u32, canvas_height: u32) -> Option<RgbaImage> {
        let path = self.resolve(settings.path.as_deref()?);
        let logo = match image::open(&path) {
            Ok(logo) => logo,
            Err(err) => {
                debug!("Logo unavailable at {}: {}; skipping", path.display(), err);
                return None;
            }
        };
        let mut logo = scale_to_fit(&logo, fraction_of(canvas_width, settings.scale), canvas_height);
        let opacity = settings.opacity.clamp(0.0, 1.0);
        if opacity < 1.0 {
            for pixel in logo.pixels_mut() {
                pixel[3] = (f32::from(pixel[3]) * opacity).round() as u8;
            }
        }
        Some(logo)
    }
}

fn fraction_of(edge: u32, fraction: f32) -> u32 {
    ((edge as f32 * fraction).floor() as u32).max(1)
}

fn centered(outer: u32, inner: u32) -> i64 {
    (i64::from(outer) - i64::from(inner)) / 2
}

/// Resizes to `max_width`, keeping the aspect ratio, unless that would exceed
/// `max_height`; tall sources are fitted to the height instead.
fn scale_to_fit(source: &DynamicImage, max_width: u32, max_height: u32) -> RgbaImage {
    source.resize(max_width, max_height, FilterType::Lanczos3).to_rgba8()
}

fn draw_shadow(canvas: &mut RgbaImage, width: u32, height: u32, shadow: &ShadowSettings) {
    let blur = shadow.blur.max(0.0);
    let pad = (blur * 3.0).ceil() as u32;
    let alpha = (shadow.opacity.clamp(0.0, 1.0) * 255.0).round() as u8;

    let mut layer = RgbaImage::new(width + pad * 2, height + pad * 2);
    for y in pad..pad + height {
        for x in pad..pad + width {
            layer.put_pixel(x, y, Rgba([0, 0, 0, alpha]));
        }
    }
    let layer = if blur > 0.0 {
        imageops::blur(&layer, blur)
    } else {
        layer
    };

    let x = centered(canvas.width(), width) - i64::from(pad);
    let y = centered(canvas.height(), height) + i64::from(shadow.offset_y) - i64::from(pad);
    imageops::overlay(canvas, &layer, x, y);
}

fn anchor_position(
    settings: &LogoSettings,
    canvas_width: u32,
    canvas_height: u32,
    logo_width: u32,
    logo_height: u32,
) -> (i64, i64) {
    let padding = i64::from(settings.padding);
    let right = i64::from(canvas_width) - i64::from(logo_width) - padding;
    let bottom = i64::from(canvas_height) - i64::from(logo_height) - padding;
    match settings.anchor {
        LogoAnchor::TopRight => (right, padding),
        LogoAnchor::TopLeft => (padding, padding),
        LogoAnchor::BottomRight => (right, bottom),
        LogoAnchor::BottomLeft => (padding, bottom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    fn png_bytes(image: &RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn small_settings() -> PostprocessSettings {
        PostprocessSettings {
            assets: BTreeMap::from([(
                BackgroundName::BuilderGrid,
                PathBuf::from("backgrounds/missing.png"),
            )]),
            logo: LogoSettings {
                path: Some(PathBuf::from("missing-logo.png")),
                ..LogoSettings::default()
            },
            composite: CompositeSettings {
                canvas_size: [96, 64],
                subject_scale: 0.5,
                subject_shadow: ShadowSettings {
                    blur: 2.0,
                    ..ShadowSettings::default()
                },
            },
        }
    }

    #[test]
    fn missing_assets_still_produce_canvas_sized_png() {
        let dir = tempfile::tempdir().unwrap();
        let subject = png_bytes(&RgbaImage::from_pixel(20, 40, Rgba([255, 255, 255, 255])));
        let composed = Compositor::new(dir.path())
            .composite(&subject, BackgroundName::BuilderGrid, &small_settings())
            .unwrap();

        let decoded = image::load_from_memory(&composed.png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (96, 64));
        assert_eq!((composed.width, composed.height), (96, 64));
        let corner = decoded.to_rgb8().get_pixel(0, 0).0;
        assert_eq!(corner, BackgroundName::BuilderGrid.fallback_rgb());
        let center = decoded.to_rgb8().get_pixel(48, 32).0;
        assert_eq!(center, [255, 255, 255]);
    }

    #[test]
    fn assets_and_logo_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("backgrounds")).unwrap();
        let background = RgbaImage::from_pixel(10, 10, Rgba([0, 200, 0, 255]));
        background
            .save(dir.path().join("backgrounds/dual.png"))
            .unwrap();
        let logo = RgbaImage::from_pixel(8, 8, Rgba([250, 0, 0, 255]));
        logo.save(dir.path().join("logo.png")).unwrap();

        let settings = PostprocessSettings {
            assets: BTreeMap::from([(BackgroundName::DualCore, PathBuf::from("backgrounds/dual.png"))]),
            logo: LogoSettings {
                path: Some(PathBuf::from("logo.png")),
                anchor: LogoAnchor::TopLeft,
                padding: 4,
                scale: 0.25,
                opacity: 1.0,
            },
            composite: CompositeSettings {
                canvas_size: [64, 64],
                subject_scale: 0.25,
                subject_shadow: ShadowSettings {
                    enabled: false,
                    ..ShadowSettings::default()
                },
            },
        };
        let subject = png_bytes(&RgbaImage::from_pixel(16, 16, Rgba([0, 0, 255, 255])));
        let composed = Compositor::new(dir.path())
            .composite(&subject, BackgroundName::DualCore, &settings)
            .unwrap();

        let decoded = image::load_from_memory(&composed.png).unwrap().to_rgb8();
        assert_eq!(decoded.get_pixel(6, 6).0, [250, 0, 0]);
        assert_eq!(decoded.get_pixel(60, 60).0, [0, 200, 0]);
        assert_eq!(decoded.get_pixel(32, 32).0, [0, 0, 255]);
    }

    #[test]
    fn shadow_darkens_below_subject() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = small_settings();
        settings.composite.subject_shadow = ShadowSettings {
            enabled: true,
            blur: 0.0,
            opacity: 1.0,
            offset_y: 6,
        };
        let subject = png_bytes(&RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 255])));
        let composed = Compositor::new(dir.path())
            .composite(&subject, BackgroundName::SimpleBlue, &settings)
            .unwrap();
        let decoded = image::load_from_memory(&composed.png).unwrap().to_rgb8();
        // Subject covers rows 8..56; the offset shadow covers rows 14..62.
        assert_eq!(decoded.get_pixel(48, 58).0, [0, 0, 0]);
        assert_eq!(decoded.get_pixel(48, 30).0, [255, 255, 255]);
    }

    #[test]
    fn tall_subjects_are_fitted_inside_the_canvas() {
        let sliver = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 400, Rgba([9, 9, 9, 255])));
        let fitted = scale_to_fit(&sliver, fraction_of(256, 0.82), 256);
        assert!(fitted.width() <= 209 && fitted.height() <= 256);
        assert_eq!(fitted.height(), 256);

        let wide = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 20, Rgba([9, 9, 9, 255])));
        assert_eq!(scale_to_fit(&wide, 80, 256).dimensions(), (80, 40));

        let mut settings = small_settings();
        settings.composite.canvas_size = [256, 256];
        settings.composite.subject_scale = 0.82;
        let subject = png_bytes(&RgbaImage::from_pixel(1, 400, Rgba([255, 255, 255, 255])));
        let composed = Compositor::new("assets")
            .composite(&subject, BackgroundName::SimpleBlue, &settings)
            .unwrap();
        assert_eq!((composed.width, composed.height), (256, 256));
    }

    #[test]
    fn rejects_undecodable_subject_and_bad_canvas() {
        let compositor = Compositor::new("assets");
        let err = compositor
            .composite(b"not an image", BackgroundName::SimpleBlue, &small_settings())
            .unwrap_err();
        assert!(matches!(err, ComposeError::InvalidSubject(_)));

        let mut settings = small_settings();
        settings.composite.canvas_size = [0, 10];
        let subject = png_bytes(&RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])));
        let err = compositor
            .composite(&subject, BackgroundName::SimpleBlue, &settings)
            .unwrap_err();
        assert!(matches!(err, ComposeError::InvalidCanvas { .. }));
    }

    #[test]
    fn settings_parse_from_style_json() {
        let raw = r#"{
            "assets": { "Dual Core": "bg/dual.png" },
            "logo": { "anchor": "bottom-left", "padding": 10 },
            "composite": { "canvas_size": [512, 512], "subject_shadow": { "offsetY": 4 } }
        }"#;
        let settings: PostprocessSettings = serde_json::from_str(raw).unwrap();
        assert_eq!(
            settings.assets.get(&BackgroundName::DualCore),
            Some(&PathBuf::from("bg/dual.png"))
        );
        assert_eq!(settings.logo.anchor, LogoAnchor::BottomLeft);
        assert_eq!(settings.logo.scale, 0.12);
        assert_eq!(settings.composite.subject_shadow.offset_y, 4);
        assert!(settings.composite.subject_shadow.enabled);
    }
}
