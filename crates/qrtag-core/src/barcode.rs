//! QR code rasterization.
//!
//! Payloads are always encoded in 8-bit byte mode, so the data is carried
//! exactly as given (case-sensitive, no alphabet normalization). The smallest
//! symbol version that fits the payload is chosen, then the symbol is drawn
//! into a square grayscale image using whole pixels per module.

use std::path::Path;

use image::{GrayImage, ImageFormat, Luma};
use qrcode::bits::Bits;
use qrcode::{Color, EcLevel, QrCode, Version};
use tracing::debug;

use crate::config::{BarcodeConfig, ErrorCorrection};
use crate::error::{Error, Result};

/// Highest QR symbol version
const MAX_VERSION: i16 = 40;

/// Largest raster side, in pixels. One byte per pixel, so 256 MiB at most.
pub const MAX_RASTER_SIDE: u32 = 16_384;

const DARK: Luma<u8> = Luma([0]);
const LIGHT: Luma<u8> = Luma([255]);

/// Input to a single encode call
#[derive(Debug, Clone, Copy)]
pub struct BarcodeSpec<'a> {
    pub payload: &'a str,
    /// Lower bound for the side length of the resulting image, in pixels
    pub min_module_size: u32,
}

impl<'a> BarcodeSpec<'a> {
    pub const fn new(payload: &'a str, min_module_size: u32) -> Self {
        Self {
            payload,
            min_module_size,
        }
    }
}

/// A square barcode bitmap.
#[derive(Debug, Clone)]
pub struct RasterImage {
    image: GrayImage,
    version: i16,
}

impl RasterImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// QR symbol version the payload was encoded at
    pub const fn version(&self) -> i16 {
        self.version
    }

    pub const fn as_image(&self) -> &GrayImage {
        &self.image
    }

    /// Write the bitmap as PNG
    pub fn write_png(&self, path: &Path) -> Result<()> {
        self.image
            .save_with_format(path, ImageFormat::Png)
            .map_err(|e| Error::ArtifactIo {
                path: path.to_path_buf(),
                reason: format!("Failed to write PNG: {e}"),
            })
    }
}

/// Encodes payloads into square QR bitmaps.
#[derive(Debug, Clone)]
pub struct BarcodeEncoder {
    quiet_zone: u32,
    ec_level: EcLevel,
}

impl Default for BarcodeEncoder {
    fn default() -> Self {
        Self::new(&BarcodeConfig::default())
    }
}

impl BarcodeEncoder {
    pub fn new(config: &BarcodeConfig) -> Self {
        let ec_level = match config.error_correction {
            ErrorCorrection::Low => EcLevel::L,
            ErrorCorrection::Medium => EcLevel::M,
            ErrorCorrection::Quartile => EcLevel::Q,
            ErrorCorrection::High => EcLevel::H,
        };

        Self {
            quiet_zone: config.quiet_zone,
            ec_level,
        }
    }

    /// Encode a payload.
    ///
    /// The result is square and its side is the smallest multiple of the
    /// symbol's module count (quiet zone included) that is at least
    /// `min_module_size`.
    pub fn encode(&self, spec: &BarcodeSpec<'_>) -> Result<RasterImage> {
        if spec.min_module_size == 0 {
            return Err(Error::Encoding {
                reason: "minimum module size must be at least 1".to_string(),
            });
        }

        let code = self.build_symbol(spec.payload.as_bytes())?;
        let version = match code.version() {
            Version::Normal(v) | Version::Micro(v) => v,
        };

        let image = self.rasterize(&code, spec.min_module_size)?;

        debug!(
            "Encoded {} byte payload at version {} ({}x{} px)",
            spec.payload.len(),
            version,
            image.width(),
            image.height()
        );

        Ok(RasterImage { image, version })
    }

    /// Find the first version whose byte-mode capacity holds `data`.
    fn build_symbol(&self, data: &[u8]) -> Result<QrCode> {
        for v in 1..=MAX_VERSION {
            let mut bits = Bits::new(Version::Normal(v));
            if bits.push_byte_data(data).is_err() || bits.push_terminator(self.ec_level).is_err() {
                continue;
            }

            return QrCode::with_bits(bits, self.ec_level).map_err(|e| Error::Encoding {
                reason: format!("QR code construction failed at version {v}: {e}"),
            });
        }

        Err(Error::Encoding {
            reason: format!(
                "payload of {} bytes does not fit a version {MAX_VERSION} symbol",
                data.len()
            ),
        })
    }

    fn rasterize(&self, code: &QrCode, min_size: u32) -> Result<GrayImage> {
        let too_large = || Error::Encoding {
            reason: "barcode raster dimensions overflow".to_string(),
        };

        let symbol = code.width();
        let symbol_px = u32::try_from(symbol).map_err(|_| too_large())?;
        let modules = self
            .quiet_zone
            .checked_mul(2)
            .and_then(|q| q.checked_add(symbol_px))
            .ok_or_else(too_large)?;
        let scale = min_size.div_ceil(modules).max(1);
        let side = modules.checked_mul(scale).ok_or_else(too_large)?;
        if side > MAX_RASTER_SIDE {
            return Err(Error::Encoding {
                reason: format!(
                    "barcode raster of {side}x{side} px exceeds the {MAX_RASTER_SIDE} px limit"
                ),
            });
        }

        let mut image = GrayImage::from_pixel(side, side, LIGHT);
        let offset = self.quiet_zone * scale;

        for (row, colors) in (0u32..).zip(code.to_colors().chunks(symbol)) {
            for (col, &module) in (0u32..).zip(colors) {
                if module != Color::Dark {
                    continue;
                }
                let x0 = offset + col * scale;
                let y0 = offset + row * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        image.put_pixel(x0 + dx, y0 + dy, DARK);
                    }
                }
            }
        }

        Ok(image)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(payload: &str, min: u32) -> Result<RasterImage> {
        BarcodeEncoder::default().encode(&BarcodeSpec::new(payload, min))
    }

    #[test]
    fn test_encode_is_square_and_large_enough() {
        let img = encode("foobar", 50).unwrap();
        assert_eq!(img.width(), img.height());
        assert!(img.width() >= 50);
    }

    #[test]
    fn test_minimum_size_gives_one_pixel_modules() {
        // Version 1 is 21 modules wide, plus a 4 module quiet zone on each side
        let img = encode("code", 1).unwrap();
        assert_eq!(img.version(), 1);
        assert_eq!(img.width(), 29);
    }

    #[test]
    fn test_size_rounds_up_to_whole_modules() {
        let img = encode("code", 30).unwrap();
        assert_eq!(img.width(), 58);
    }

    #[test]
    fn test_quiet_zone_is_light() {
        let img = encode("code", 1).unwrap();
        let raster = img.as_image();
        for i in 0..4 {
            assert_eq!(*raster.get_pixel(i, i), LIGHT);
        }
        // Top-left finder pattern corner
        assert_eq!(*raster.get_pixel(4, 4), DARK);
    }

    #[test]
    fn test_payload_is_case_sensitive() {
        let lower = encode("http://example.com/ab12", 1).unwrap();
        let upper = encode("HTTP://EXAMPLE.COM/AB12", 1).unwrap();
        assert_ne!(lower.as_image().as_raw(), upper.as_image().as_raw());
    }

    #[test]
    fn test_longer_payload_selects_higher_version() {
        let img = encode(&"x".repeat(200), 1).unwrap();
        assert!(img.version() > 1);
    }

    #[test]
    fn test_payload_too_long() {
        let result = encode(&"x".repeat(3000), 1);
        assert!(matches!(result, Err(Error::Encoding { .. })));
    }

    #[test]
    fn test_huge_min_size_is_an_error() {
        for min in [MAX_RASTER_SIDE + 1, 4_000_000_000, u32::MAX] {
            assert!(matches!(encode("code", min), Err(Error::Encoding { .. })));
        }
    }

    #[test]
    fn test_rounding_past_the_limit_is_an_error() {
        // 29 modules never divide the limit evenly, so the side rounds past it
        assert!(matches!(encode("code", MAX_RASTER_SIDE), Err(Error::Encoding { .. })));
    }

    #[test]
    fn test_zero_min_size_rejected() {
        assert!(matches!(encode("code", 0), Err(Error::Encoding { .. })));
    }

    #[test]
    fn test_higher_error_correction_needs_larger_symbol() {
        let payload = "x".repeat(100);
        let low = encode(&payload, 1).unwrap();
        let high = BarcodeEncoder::new(&BarcodeConfig {
            error_correction: ErrorCorrection::High,
            ..Default::default()
        })
        .encode(&BarcodeSpec::new(&payload, 1))
        .unwrap();
        assert!(high.version() > low.version());
    }

    #[test]
    fn test_write_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("code.png");
        encode("code", 1).unwrap().write_png(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..8], &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
    }

    proptest! {
        #[test]
        fn prop_encoded_image_is_square_and_bounded(
            payload in "[ -~]{1,120}",
            min in 1u32..400,
        ) {
            let img = encode(&payload, min).unwrap();
            prop_assert_eq!(img.width(), img.height());
            prop_assert!(img.width() >= min);
        }
    }
}
