// src/engine/limits.rs
//
// Receiving-side checks for uploaded artifacts.
//
// The client accepts artifacts that stay over budget at the quality floor, so
// nothing stops an oversized or forged upload from reaching the server. An
// `UploadPolicy` is the server's own gate: byte cap, JPEG magic, a header and
// full decode, and the longest side.

use crate::engine::decoder::{check_dimensions, decode_image};
use crate::error::IntakeError;
use crate::ops::{PipelineConfig, UploadPreset};
use image::{ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::debug;

/// Lenient policies allow this multiple of the byte budget, covering
/// artifacts that reached the quality floor without meeting it.
const LENIENT_BYTES_FACTOR: u64 = 2;

const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyMode {
    /// Byte cap equals the budget.
    Strict,
    /// Byte cap is a multiple of the budget.
    Lenient,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadPolicy {
    pub mode: PolicyMode,
    pub max_bytes: u64,
    pub max_dimension: u32,
}

impl UploadPolicy {
    pub fn strict(config: &PipelineConfig) -> Self {
        Self {
            mode: PolicyMode::Strict,
            max_bytes: config.target_size_bytes,
            max_dimension: config.max_dimension,
        }
    }

    pub fn lenient(config: &PipelineConfig) -> Self {
        Self {
            mode: PolicyMode::Lenient,
            max_bytes: config.target_size_bytes.saturating_mul(LENIENT_BYTES_FACTOR),
            max_dimension: config.max_dimension,
        }
    }

    pub fn for_preset(preset: UploadPreset, mode: PolicyMode) -> Self {
        let config = preset.config();
        match mode {
            PolicyMode::Strict => Self::strict(&config),
            PolicyMode::Lenient => Self::lenient(&config),
        }
    }

    pub fn enforce_len(&self, len: usize) -> Result<(), IntakeError> {
        let len = len as u64;
        if len == 0 {
            return Err(IntakeError::upload_rejected("upload is empty"));
        }
        if len > self.max_bytes {
            return Err(IntakeError::upload_rejected(format!(
                "upload is {len} bytes; limit is {} bytes",
                self.max_bytes
            )));
        }
        Ok(())
    }

    pub fn enforce_format(&self, data: &[u8]) -> Result<(), IntakeError> {
        if data.starts_with(&JPEG_MAGIC) {
            Ok(())
        } else {
            Err(IntakeError::upload_rejected("upload is not a JPEG"))
        }
    }

    pub fn enforce_dimensions(&self, width: u32, height: u32) -> Result<(), IntakeError> {
        check_dimensions(width, height)?;
        let longest = width.max(height);
        if longest > self.max_dimension {
            return Err(IntakeError::upload_rejected(format!(
                "upload is {width}x{height}; longest side may be at most {}",
                self.max_dimension
            )));
        }
        Ok(())
    }

    /// Run every check, cheapest first. Returns the image dimensions.
    pub fn validate(&self, data: &[u8]) -> Result<(u32, u32), IntakeError> {
        self.enforce_len(data.len())?;
        self.enforce_format(data)?;

        let (width, height) = ImageReader::with_format(Cursor::new(data), ImageFormat::Jpeg)
            .into_dimensions()
            .map_err(|e| IntakeError::upload_rejected(format!("unreadable JPEG header: {e}")))?;
        self.enforce_dimensions(width, height)?;

        let (decoded, _) = decode_image(data).map_err(|e| {
            IntakeError::upload_rejected(format!("upload does not decode: {e}"))
        })?;
        if (decoded.width(), decoded.height()) != (width, height) {
            return Err(IntakeError::upload_rejected(
                "decoded size does not match the JPEG header",
            ));
        }

        debug!(
            target: "photo_intake::compress",
            bytes = data.len(),
            width,
            height,
            mode = ?self.mode,
            "upload accepted"
        );
        Ok((width, height))
    }
}
