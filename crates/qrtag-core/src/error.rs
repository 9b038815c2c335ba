use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for qrtag-core
///
/// This enum encompasses all error cases that can occur while building a
/// sticker document:
/// - Barcode encoding
/// - Background asset loading
/// - Transient artifact creation and cleanup
/// - Layout and PDF rendering
/// - Configuration loading and validation
#[derive(Error, Debug)]
pub enum Error {
    // ==========================================================================
    // Barcode Errors
    // ==========================================================================
    /// Payload cannot be rasterized at any supported symbol version
    #[error("failed to encode barcode: {reason}")]
    Encoding { reason: String },

    // ==========================================================================
    // Asset Errors
    // ==========================================================================
    /// Background document is missing, unreadable, or has no usable page
    #[error("failed to load background {}: {reason}", path.display())]
    AssetLoad { path: PathBuf, reason: String },

    /// Caption font could not be read or parsed
    #[error("failed to load font: {0}")]
    Font(String),

    // ==========================================================================
    // Artifact Errors
    // ==========================================================================
    /// Could not create or write a transient raster file
    #[error("transient artifact I/O failed for {}: {reason}", path.display())]
    ArtifactIo { path: PathBuf, reason: String },

    /// One or more transient files could not be removed
    #[error("failed to release {} transient artifact(s): {}", failures.len(), failures.join("; "))]
    ArtifactCleanup { failures: Vec<String> },

    // ==========================================================================
    // Render Errors
    // ==========================================================================
    /// Layout engine could not produce the output document
    #[error("failed to render document: {0}")]
    Render(String),

    /// Build was requested for zero stickers
    #[error("no stickers to build")]
    EmptyInput,

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    /// Failed to load configuration file
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Invalid configuration value
    #[error("invalid config value for '{field}': {reason}")]
    ConfigInvalid { field: String, reason: String },

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
