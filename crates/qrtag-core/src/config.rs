use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::barcode::MAX_RASTER_SIDE;
use crate::error::{Error, Result};
use crate::pdf::{Alignment, CaptionStyle};

/// Points per centimeter.
pub const CM: f32 = 72.0 / 2.54;

/// Standard page sizes in PDF points
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    /// ISO A4, 210 × 297 mm
    #[default]
    A4,
    /// US Letter, 8.5 × 11 in
    Letter,
    /// Arbitrary size in points
    Custom { width: f32, height: f32 },
}

impl PageSize {
    /// Width and height in points
    pub const fn dimensions(self) -> (f32, f32) {
        match self {
            Self::A4 => (595.275_6, 841.889_8),
            Self::Letter => (612.0, 792.0),
            Self::Custom { width, height } => (width, height),
        }
    }
}

/// Rectangle the flow layout places content into (PDF coordinates, origin bottom-left)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Frame {
    pub fn top(&self) -> f32 {
        self.y + self.height
    }
}

/// Page geometry and caption style for one sticker per page.
///
/// Only `page_size`, `pad_cm` and the caption font settings are stored.
/// Everything else is derived, so a different margin moves the barcode size
/// and caption spacing along with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutPolicy {
    #[serde(default)]
    pub page_size: PageSize,

    /// Margin around the content frame, in centimeters
    #[serde(default = "default_pad_cm")]
    pub pad_cm: f32,

    /// Name of the font the caption is set in
    #[serde(default = "default_caption_font_name")]
    pub caption_font_name: String,

    #[serde(default = "default_caption_font_size")]
    pub caption_font_size: f32,

    /// Baseline distance between wrapped caption lines (defaults to 1.2 × size)
    #[serde(default)]
    pub caption_leading: Option<f32>,
}

const fn default_pad_cm() -> f32 {
    1.25
}

fn default_caption_font_name() -> String {
    "Helvetica".to_string()
}

const fn default_caption_font_size() -> f32 {
    60.0
}

impl Default for LayoutPolicy {
    fn default() -> Self {
        Self {
            page_size: PageSize::default(),
            pad_cm: default_pad_cm(),
            caption_font_name: default_caption_font_name(),
            caption_font_size: default_caption_font_size(),
            caption_leading: None,
        }
    }
}

impl LayoutPolicy {
    pub const fn page_width(&self) -> f32 {
        self.page_size.dimensions().0
    }

    pub const fn page_height(&self) -> f32 {
        self.page_size.dimensions().1
    }

    /// Margin in points
    pub fn pad(&self) -> f32 {
        self.pad_cm * CM
    }

    pub fn inner_width(&self) -> f32 {
        self.page_width() - 2.0 * self.pad()
    }

    /// Side length the barcode image is drawn at
    pub fn barcode_draw_size(&self) -> f32 {
        self.inner_width() - 4.0 * self.pad()
    }

    pub fn caption_space_before(&self) -> f32 {
        1.65 * self.pad()
    }

    pub fn caption_space_after(&self) -> f32 {
        self.pad()
    }

    pub fn caption_leading(&self) -> f32 {
        self.caption_leading.unwrap_or(self.caption_font_size * 1.2)
    }

    pub fn caption_style(&self) -> CaptionStyle {
        CaptionStyle {
            font_name: self.caption_font_name.clone(),
            font_size: self.caption_font_size,
            leading: self.caption_leading(),
            alignment: Alignment::Center,
            first_line_indent: 0.0,
            space_before: self.caption_space_before(),
            space_after: self.caption_space_after(),
        }
    }

    /// Content frame inset by `pad` on every side
    pub fn frame(&self) -> Frame {
        let pad = self.pad();
        Frame {
            x: pad,
            y: pad,
            width: self.inner_width(),
            height: self.page_height() - 2.0 * pad,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let (width, height) = self.page_size.dimensions();
        if width <= 0.0 || height <= 0.0 {
            return Err(invalid("layout.page_size", "page dimensions must be positive"));
        }
        if self.pad_cm < 0.0 {
            return Err(invalid("layout.pad_cm", "margin must not be negative"));
        }
        if self.barcode_draw_size() <= 0.0 {
            return Err(invalid(
                "layout.pad_cm",
                &format!(
                    "margin of {} cm leaves no room for the barcode on a {width}x{height} pt page",
                    self.pad_cm
                ),
            ));
        }
        if self.caption_font_size <= 0.0 {
            return Err(invalid("layout.caption_font_size", "font size must be positive"));
        }
        if self.caption_leading() <= 0.0 {
            return Err(invalid("layout.caption_leading", "leading must be positive"));
        }
        Ok(())
    }
}

/// QR error correction level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCorrection {
    /// ~7% recovery
    #[default]
    Low,
    /// ~15% recovery
    Medium,
    /// ~25% recovery
    Quartile,
    /// ~30% recovery
    High,
}

/// Barcode rasterization settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeConfig {
    /// Requested lower bound for the raster side length, in pixels
    #[serde(default = "default_min_module_size")]
    pub min_module_size: u32,

    /// Light border around the symbol, in modules
    #[serde(default = "default_quiet_zone")]
    pub quiet_zone: u32,

    #[serde(default)]
    pub error_correction: ErrorCorrection,
}

const fn default_min_module_size() -> u32 {
    1
}

const fn default_quiet_zone() -> u32 {
    4
}

impl Default for BarcodeConfig {
    fn default() -> Self {
        Self {
            min_module_size: default_min_module_size(),
            quiet_zone: default_quiet_zone(),
            error_correction: ErrorCorrection::default(),
        }
    }
}

impl BarcodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_module_size == 0 {
            return Err(invalid("barcode.min_module_size", "must be at least 1"));
        }
        if self.min_module_size > MAX_RASTER_SIDE {
            return Err(invalid(
                "barcode.min_module_size",
                &format!("must be at most {MAX_RASTER_SIDE} pixels"),
            ));
        }
        Ok(())
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Page geometry and caption style
    #[serde(default)]
    pub layout: LayoutPolicy,

    /// Barcode rasterization
    #[serde(default)]
    pub barcode: BarcodeConfig,

    /// PDF whose first page is stretched behind every sticker
    #[serde(default = "default_background")]
    pub background: PathBuf,

    /// TrueType font registered under `layout.caption_font_name`
    #[serde(default)]
    pub font_path: Option<PathBuf>,

    /// Directory for transient barcode images (defaults to the system temp dir)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

fn default_background() -> PathBuf {
    PathBuf::from("background.pdf")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            layout: LayoutPolicy::default(),
            barcode: BarcodeConfig::default(),
            background: default_background(),
            font_path: None,
            temp_dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::ConfigLoad(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigLoad(format!("Failed to parse config: {e}")))
    }

    /// Load from default locations (~/.config/qrtag/config.toml, ./qrtag.toml)
    pub fn load() -> Self {
        if let Some(config_dir) = crate::util::config_dir() {
            let user_config = config_dir.join("qrtag").join("config.toml");
            if user_config.exists() {
                match Self::from_file(&user_config) {
                    Ok(config) => {
                        tracing::debug!("Loaded config from {}", user_config.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        let local_config = PathBuf::from("qrtag.toml");
        if local_config.exists() {
            match Self::from_file(&local_config) {
                Ok(config) => {
                    tracing::debug!("Loaded config from ./qrtag.toml");
                    return config;
                }
                Err(e) => {
                    tracing::warn!("Failed to load ./qrtag.toml: {}", e);
                }
            }
        }

        tracing::debug!("No config file found, using defaults");
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;
        self.barcode.validate()
    }

    /// Directory transient barcode images are written to
    pub fn artifact_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn invalid(field: &str, reason: &str) -> Error {
    Error::ConfigInvalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_default_geometry_derivations() {
        let layout = LayoutPolicy::default();
        let pad = 1.25 * CM;

        assert!(close(layout.pad(), pad));
        assert!(close(layout.inner_width(), 595.275_6 - 2.0 * pad));
        assert!(close(layout.barcode_draw_size(), layout.inner_width() - 4.0 * pad));
        assert!(close(layout.caption_space_before(), 1.65 * pad));
        assert!(close(layout.caption_space_after(), pad));
    }

    #[test]
    fn test_pad_change_rederives_everything() {
        let narrow = LayoutPolicy { pad_cm: 1.0, ..Default::default() };
        let wide = LayoutPolicy { pad_cm: 2.0, ..Default::default() };

        assert!(wide.barcode_draw_size() < narrow.barcode_draw_size());
        assert!(wide.caption_space_before() > narrow.caption_space_before());
        assert!(close(wide.caption_space_after(), 2.0 * narrow.caption_space_after()));
    }

    #[test]
    fn test_caption_style_is_centered_without_indent() {
        let style = LayoutPolicy::default().caption_style();
        assert_eq!(style.alignment, Alignment::Center);
        assert!(close(style.first_line_indent, 0.0));
        assert_eq!(style.font_name, "Helvetica");
        assert!(close(style.leading, 72.0));
    }

    #[test]
    fn test_frame_matches_margins() {
        let layout = LayoutPolicy { page_size: PageSize::Letter, ..Default::default() };
        let frame = layout.frame();
        assert!(close(frame.x, layout.pad()));
        assert!(close(frame.top(), 792.0 - layout.pad()));
        assert!(close(frame.width, layout.inner_width()));
    }

    #[test]
    fn test_validate_rejects_oversized_margin() {
        let layout = LayoutPolicy { pad_cm: 4.0, ..Default::default() };
        let err = layout.validate().unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { ref field, .. } if field == "layout.pad_cm"));
    }

    #[test]
    fn test_validate_rejects_zero_module_size() {
        let config = AppConfig {
            barcode: BarcodeConfig { min_module_size: 0, ..Default::default() },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_module_size() {
        let mut barcode = BarcodeConfig { min_module_size: MAX_RASTER_SIDE, ..Default::default() };
        assert!(barcode.validate().is_ok());

        barcode.min_module_size = 4_000_000_000;
        assert!(matches!(
            barcode.validate(),
            Err(Error::ConfigInvalid { field, .. }) if field == "barcode.min_module_size"
        ));
    }

    #[test]
    fn test_parse_toml() {
        let config = AppConfig::from_toml(
            r#"
            background = "qringly.pdf"

            [layout]
            page_size = "letter"
            pad_cm = 1.5
            caption_font_name = "GoodDog"

            [barcode]
            min_module_size = 300
            error_correction = "high"
            "#,
        )
        .unwrap();

        assert_eq!(config.background, PathBuf::from("qringly.pdf"));
        assert_eq!(config.layout.page_size, PageSize::Letter);
        assert!(close(config.layout.pad_cm, 1.5));
        assert_eq!(config.layout.caption_font_name, "GoodDog");
        assert!(close(config.layout.caption_font_size, 60.0));
        assert_eq!(config.barcode.min_module_size, 300);
        assert_eq!(config.barcode.quiet_zone, 4);
        assert_eq!(config.barcode.error_correction, ErrorCorrection::High);
        assert!(config.font_path.is_none());
    }

    #[test]
    fn test_parse_custom_page_size() {
        let config = AppConfig::from_toml(
            r"
            [layout.page_size.custom]
            width = 300.0
            height = 400.0
            ",
        )
        .unwrap();
        assert_eq!(config.layout.page_size.dimensions(), (300.0, 400.0));
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(matches!(AppConfig::from_toml("layout = 3"), Err(Error::ConfigLoad(_))));
    }
}
