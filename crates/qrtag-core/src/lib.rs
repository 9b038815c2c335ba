//! QR Sticker Core Library
//!
//! This library turns a list of sticker records into a print-ready PDF:
//! - QR code rasterization of each payload
//! - One page per sticker, stamped with a shared background page
//! - Captions set in a standard or embedded TrueType font
//! - Transient barcode images that never outlive a build

pub mod artifact;
pub mod barcode;
pub mod config;
pub mod error;
pub mod pdf;
pub mod sticker;
pub mod util;

pub use artifact::{ArtifactHandle, ArtifactScope, ArtifactStore};
pub use barcode::{BarcodeEncoder, BarcodeSpec, RasterImage};
pub use config::{AppConfig, BarcodeConfig, ErrorCorrection, LayoutPolicy, PageSize};
pub use error::{Error, Result};
pub use pdf::{
    Alignment, CaptionStyle, EmbeddedFont, LayoutPrimitive, PageTemplate, PdfRenderer,
    StoryRenderer, TemplateRegistry,
};
pub use sticker::StickerRecord;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name the background page template is registered under
pub const BACKGROUND_TEMPLATE: &str = "background";

/// Result of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub output: PathBuf,
    /// One page per record
    pub pages: usize,
}

/// Builds sticker documents: encodes every record, lays the stickers out one
/// per page and renders the result.
pub struct DocumentAssembler {
    config: AppConfig,
    encoder: BarcodeEncoder,
    store: ArtifactStore,
    renderer: Arc<dyn StoryRenderer>,
}

impl DocumentAssembler {
    /// Create an assembler that renders with [`PdfRenderer`].
    ///
    /// The configured font file, if any, is loaded here once.
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let renderer = create_renderer(&config)?;
        Ok(Self::from_parts(config, renderer))
    }

    /// Create with a custom renderer
    pub fn with_renderer(config: AppConfig, renderer: Arc<dyn StoryRenderer>) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, renderer))
    }

    fn from_parts(config: AppConfig, renderer: Arc<dyn StoryRenderer>) -> Self {
        let encoder = BarcodeEncoder::new(&config.barcode);
        let store = ArtifactStore::new(config.artifact_dir());
        Self {
            config,
            encoder,
            store,
            renderer,
        }
    }

    /// Build the sticker document at `output`.
    pub fn build(
        &self,
        output: &Path,
        records: &[StickerRecord],
        background: &Path,
    ) -> Result<BuildReport> {
        self.build_with_progress(output, records, background, None)
    }

    /// Build the sticker document, reporting `(done, total)` after each
    /// sticker is encoded.
    ///
    /// Either `output` holds the complete document afterwards, or it was not
    /// written. Transient images are removed in both cases.
    pub fn build_with_progress(
        &self,
        output: &Path,
        records: &[StickerRecord],
        background: &Path,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<BuildReport> {
        if records.is_empty() {
            return Err(Error::EmptyInput);
        }

        info!(
            "Building {} sticker(s) into {}",
            records.len(),
            output.display()
        );

        let layout = &self.config.layout;
        let template = PageTemplate::load(background, layout.page_width(), layout.page_height())?;
        let mut templates = TemplateRegistry::new();
        templates.register(BACKGROUND_TEMPLATE, template);

        let mut scope = self.store.scope();
        let result = self
            .compose_story(records, &mut scope, progress)
            .and_then(|story| self.renderer.render(&story, &templates, output));

        // Cleanup problems are logged, never returned over the build result
        if let Err(e) = scope.release() {
            warn!("{e}");
        }
        result?;

        info!("Wrote {} page(s) to {}", records.len(), output.display());
        Ok(BuildReport {
            output: output.to_path_buf(),
            pages: records.len(),
        })
    }

    /// Encode every record into `scope` and return the story that lays them
    /// out, one page per record in input order.
    pub fn compose_story(
        &self,
        records: &[StickerRecord],
        scope: &mut ArtifactScope<'_>,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<Vec<LayoutPrimitive>> {
        let layout = &self.config.layout;
        let size = layout.barcode_draw_size();
        let style = layout.caption_style();
        let total = records.len();

        let mut story = Vec::with_capacity(total * 5);
        for (i, record) in records.iter().enumerate() {
            let raster = self.encoder.encode(&BarcodeSpec::new(
                record.payload(),
                self.config.barcode.min_module_size,
            ))?;

            let handle = scope.acquire()?;
            raster.write_png(handle.path())?;
            debug!(
                "Sticker {}/{}: {}px barcode at {}",
                i + 1,
                total,
                raster.width(),
                handle.path().display()
            );

            story.extend([
                LayoutPrimitive::TemplateSwitch(BACKGROUND_TEMPLATE.to_string()),
                LayoutPrimitive::Spacer {
                    width: layout.inner_width(),
                    height: 2.0 * layout.pad(),
                },
                LayoutPrimitive::Image {
                    path: handle.path().to_path_buf(),
                    width: size,
                    height: size,
                    align: Alignment::Center,
                },
                LayoutPrimitive::Caption {
                    text: record.caption().to_string(),
                    style: style.clone(),
                },
                LayoutPrimitive::PageBreak,
            ]);

            if let Some(callback) = progress {
                callback(i + 1, total);
            }
        }

        Ok(story)
    }

    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    pub const fn store(&self) -> &ArtifactStore {
        &self.store
    }
}

/// Create the default renderer for a configuration
pub fn create_renderer(config: &AppConfig) -> Result<Arc<dyn StoryRenderer>> {
    let mut renderer = PdfRenderer::new(config.layout.clone());
    if let Some(path) = &config.font_path {
        let font = EmbeddedFont::from_file(path)?;
        debug!(
            "Registered {} as font '{}'",
            path.display(),
            config.layout.caption_font_name
        );
        renderer = renderer.with_font(config.layout.caption_font_name.clone(), font);
    }
    Ok(Arc::new(renderer))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.barcode.min_module_size, 1);
        assert_eq!(config.layout.caption_font_name, "Helvetica");
        assert!(DocumentAssembler::new(config).is_ok());
    }

    #[test]
    fn test_missing_font_file_fails_early() {
        let config = AppConfig {
            font_path: Some(PathBuf::from("/nonexistent/GoodDog.ttf")),
            ..Default::default()
        };
        assert!(matches!(DocumentAssembler::new(config), Err(Error::Font(_))));
    }

    #[test]
    fn test_story_shape_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            temp_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let assembler = DocumentAssembler::new(config).unwrap();
        let records = [StickerRecord::new("a", "A"), StickerRecord::new("b", "B")];

        let mut scope = assembler.store().scope();
        let story = assembler.compose_story(&records, &mut scope, None).unwrap();

        assert_eq!(story.len(), 10);
        assert_eq!(scope.len(), 2);
        assert!(matches!(&story[0], LayoutPrimitive::TemplateSwitch(name) if name == BACKGROUND_TEMPLATE));
        assert!(matches!(story[1], LayoutPrimitive::Spacer { .. }));
        assert!(matches!(story[2], LayoutPrimitive::Image { align: Alignment::Center, .. }));
        assert!(matches!(&story[3], LayoutPrimitive::Caption { text, .. } if text == "A"));
        assert!(matches!(story[4], LayoutPrimitive::PageBreak));
        assert!(matches!(&story[8], LayoutPrimitive::Caption { text, .. } if text == "B"));

        scope.release().unwrap();
    }
}
