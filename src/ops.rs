// src/ops.rs
//
// Value types shared by every stage: crop geometry, quality, output format
// and the per-form pipeline configuration.
// These are cheap to create and copy - the expensive work happens in the engine.

use crate::error::IntakeError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Zoom range offered by the crop stage.
pub const MIN_ZOOM: f32 = 1.0;
pub const MAX_ZOOM: f32 = 3.0;

/// Clamp a zoom factor into [MIN_ZOOM, MAX_ZOOM]. Non-finite input maps to MIN_ZOOM.
pub fn clamp_zoom(zoom: f32) -> f32 {
    if !zoom.is_finite() {
        return MIN_ZOOM;
    }
    zoom.clamp(MIN_ZOOM, MAX_ZOOM)
}

/// Normalize degrees into [0, 360). Non-finite input maps to 0.
pub fn normalize_rotation(degrees: f32) -> f32 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Transform applied to a decoded bitmap to produce the cropped raster.
///
/// `offset_x`/`offset_y`/`width`/`height` are pixels in the bounding box of
/// the bitmap after rotation by `rotation_degrees`. `zoom` is informational
/// once the crop is confirmed; it is what produced the rectangle size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CropSpec {
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
    pub zoom: f32,
    pub rotation_degrees: f32,
}

impl CropSpec {
    /// Whole-image crop with no rotation.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            offset_x: 0,
            offset_y: 0,
            width,
            height,
            zoom: MIN_ZOOM,
            rotation_degrees: 0.0,
        }
    }
}

/// Exact quarter turns (0..=3) for angles that are multiples of 90 degrees.
pub fn quarter_turns(degrees: f32) -> Option<u8> {
    let normalized = normalize_rotation(degrees);
    let turns = normalized / 90.0;
    let rounded = turns.round();
    if (turns - rounded).abs() < 1e-4 {
        Some((rounded as u8) % 4)
    } else {
        None
    }
}

/// Fixed aspect ratio of the crop rectangle (width:height).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub const SQUARE: AspectRatio = AspectRatio {
        width: 1,
        height: 1,
    };

    pub fn as_f64(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::SQUARE
    }
}

/// Lossy encoder quality, stored as an integer percent (1..=100).
///
/// Percent steps keep the back-off ladder exact; 0.9 - 8 * 0.1 in floating
/// point is not 0.1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quality(u8);

impl Quality {
    pub const MAX: Quality = Quality(100);

    pub fn from_percent(percent: u8) -> Self {
        Self(percent.clamp(1, 100))
    }

    /// Convert a 0..=1 fraction (the unit forms configure in) to percent.
    pub fn from_fraction(fraction: f32) -> Result<Self, IntakeError> {
        if !fraction.is_finite() || fraction <= 0.0 || fraction > 1.0 {
            return Err(IntakeError::invalid_argument(
                "quality",
                fraction.to_string(),
                "quality must be in (0, 1]",
            ));
        }
        Ok(Self::from_percent((fraction * 100.0).round() as u8))
    }

    pub fn percent(&self) -> u8 {
        self.0
    }

    pub fn as_fraction(&self) -> f32 {
        self.0 as f32 / 100.0
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.as_fraction())
    }
}

/// Output format for artifacts. The pipeline emits a single lossy format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jpeg,
}

impl OutputFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
        }
    }
}

// =============================================================================
// CONFIGURATION - per-form pipeline settings and named presets
// =============================================================================

const KIB: u64 = 1024;

/// 150 KB budget for reviews and social content.
pub const REVIEW_TARGET_BYTES: u64 = 150 * KIB;
/// 0.48 MB budget for product and banner images (~491 KB).
pub const PRODUCT_TARGET_BYTES: u64 = 48 * KIB * KIB / 100;
/// Picked files larger than this are flagged for a UI warning.
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 500 * KIB;
/// Longest edge after the one-time downscale.
pub const DEFAULT_MAX_DIMENSION: u32 = 1200;
pub const DEFAULT_MAX_IMAGES: usize = 5;

fn default_target_size_bytes() -> u64 {
    REVIEW_TARGET_BYTES
}
fn default_initial_quality() -> f32 {
    0.9
}
fn default_min_quality() -> f32 {
    0.1
}
fn default_quality_step() -> f32 {
    0.1
}
fn default_max_dimension() -> u32 {
    DEFAULT_MAX_DIMENSION
}
fn default_large_file_threshold() -> u64 {
    DEFAULT_LARGE_FILE_THRESHOLD
}
fn default_max_images() -> usize {
    DEFAULT_MAX_IMAGES
}
fn default_filename_prefix() -> String {
    "image".to_string()
}
fn default_background() -> [u8; 3] {
    [255, 255, 255]
}

/// Settings for one image-bearing form.
///
/// Deserializes from JSON with every field optional; missing fields take
/// the review defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Byte budget for the quality search.
    #[serde(default = "default_target_size_bytes")]
    pub target_size_bytes: u64,
    /// First quality tried (0..=1).
    #[serde(default = "default_initial_quality")]
    pub initial_quality: f32,
    /// Quality floor; reaching it stops the search unconditionally.
    #[serde(default = "default_min_quality")]
    pub min_quality: f32,
    #[serde(default = "default_quality_step")]
    pub quality_step: f32,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default = "default_large_file_threshold")]
    pub large_file_threshold_bytes: u64,
    /// Cap on persisted + staged images for the form.
    #[serde(default = "default_max_images")]
    pub max_images: usize,
    pub aspect: AspectRatio,
    #[serde(default = "default_filename_prefix")]
    pub filename_prefix: String,
    /// Colour transparent pixels are flattened onto before JPEG encoding.
    #[serde(default = "default_background")]
    pub background: [u8; 3],
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_size_bytes: default_target_size_bytes(),
            initial_quality: default_initial_quality(),
            min_quality: default_min_quality(),
            quality_step: default_quality_step(),
            max_dimension: default_max_dimension(),
            large_file_threshold_bytes: default_large_file_threshold(),
            max_images: default_max_images(),
            aspect: AspectRatio::SQUARE,
            filename_prefix: default_filename_prefix(),
            background: default_background(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, IntakeError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| IntakeError::invalid_config(format!("malformed JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn for_preset(preset: UploadPreset) -> Self {
        preset.config()
    }

    pub fn with_target_size(mut self, bytes: u64) -> Self {
        self.target_size_bytes = bytes;
        self
    }

    pub fn with_max_images(mut self, max: usize) -> Self {
        self.max_images = max;
        self
    }

    pub fn with_filename_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filename_prefix = prefix.into();
        self
    }

    pub fn with_quality(mut self, initial: f32, floor: f32) -> Self {
        self.initial_quality = initial;
        self.min_quality = floor;
        self
    }

    pub fn initial_quality(&self) -> Result<Quality, IntakeError> {
        Quality::from_fraction(self.initial_quality)
    }

    pub fn min_quality(&self) -> Result<Quality, IntakeError> {
        Quality::from_fraction(self.min_quality)
    }

    /// Step in whole percent (never zero).
    pub fn quality_step_percent(&self) -> u8 {
        ((self.quality_step * 100.0).round() as i64).clamp(1, 100) as u8
    }

    pub fn validate(&self) -> Result<(), IntakeError> {
        let initial = self.initial_quality()?;
        let floor = self.min_quality()?;
        if initial < floor {
            return Err(IntakeError::invalid_config(format!(
                "initial_quality {} is below min_quality {}",
                self.initial_quality, self.min_quality
            )));
        }
        if !self.quality_step.is_finite() || self.quality_step <= 0.0 || self.quality_step > 1.0 {
            return Err(IntakeError::invalid_config(format!(
                "quality_step {} must be in (0, 1]",
                self.quality_step
            )));
        }
        if self.target_size_bytes == 0 {
            return Err(IntakeError::invalid_config("target_size_bytes must be positive"));
        }
        if self.max_dimension == 0 {
            return Err(IntakeError::invalid_config("max_dimension must be positive"));
        }
        if self.max_images == 0 {
            return Err(IntakeError::invalid_config("max_images must be positive"));
        }
        if self.aspect.width == 0 || self.aspect.height == 0 {
            return Err(IntakeError::invalid_config(format!(
                "aspect ratio {}:{} has a zero side",
                self.aspect.width, self.aspect.height
            )));
        }
        if self.filename_prefix.is_empty()
            || self
                .filename_prefix
                .chars()
                .any(|c| c == '/' || c == '\\' || c.is_control())
        {
            return Err(IntakeError::invalid_config(format!(
                "filename_prefix '{}' is not a plain file stem",
                self.filename_prefix
            )));
        }
        Ok(())
    }
}

/// Named configurations for the storefront's image-bearing forms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadPreset {
    /// Customer review photos: 150 KB, up to 5 images.
    Review,
    /// Catalog product images: ~491 KB, up to 5 images.
    Product,
    /// Home page banners: ~491 KB, one image.
    Banner,
    /// Profile pictures: 150 KB, one image.
    Profile,
}

impl UploadPreset {
    pub fn config(&self) -> PipelineConfig {
        let base = PipelineConfig::default();
        match self {
            Self::Review => base
                .with_target_size(REVIEW_TARGET_BYTES)
                .with_filename_prefix("review"),
            Self::Product => base
                .with_target_size(PRODUCT_TARGET_BYTES)
                .with_filename_prefix("product"),
            Self::Banner => base
                .with_target_size(PRODUCT_TARGET_BYTES)
                .with_max_images(1)
                .with_filename_prefix("banner"),
            Self::Profile => base
                .with_target_size(REVIEW_TARGET_BYTES)
                .with_max_images(1)
                .with_filename_prefix("profile"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Product => "product",
            Self::Banner => "banner",
            Self::Profile => "profile",
        }
    }
}

impl FromStr for UploadPreset {
    type Err = IntakeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_lowercase().as_str() {
            "review" | "social" => Ok(Self::Review),
            "product" => Ok(Self::Product),
            "banner" => Ok(Self::Banner),
            "profile" | "avatar" => Ok(Self::Profile),
            _ => Err(IntakeError::invalid_preset(name.to_string())),
        }
    }
}
