// lib.rs
//
// photo-intake: capture, crop and size-constrained compression of storefront
// images (product, review, profile and banner forms).
//
// Design goals:
// - Every artifact fits its form's byte budget, or is the best the quality
//   floor allows
// - The camera is released on every path out of acquisition
// - Failures return the form to idle with its staged images intact

pub mod engine;
pub mod error;
pub mod ops;

use error::IntakeError;
use image::ImageReader;
use std::io::{BufRead, BufReader, Cursor, Seek};

pub use engine::{
    CancelToken, CompressedArtifact, Compressor, CropSession, IntakeSession, IntakeState,
    PickedFile, StagedImages, UploadPolicy,
};
pub use error::{CameraFailure, ErrorCategory};
pub use ops::{CropSpec, PipelineConfig, Quality, UploadPreset};

/// Header facts about a picked file, read without decoding pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    /// Lowercase format name (jpeg, png, webp...)
    pub format: Option<String>,
}

fn read_header<R: BufRead + Seek>(reader: R) -> std::result::Result<ImageHeader, IntakeError> {
    let reader = ImageReader::new(reader)
        .with_guessed_format()
        .map_err(|e| IntakeError::decode_failed(format!("failed to read image header: {e}")))?;

    let format = reader.format().map(|f| format!("{f:?}").to_lowercase());
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| IntakeError::decode_failed(format!("failed to read dimensions: {e}")))?;

    Ok(ImageHeader {
        width,
        height,
        format,
    })
}

/// Read dimensions and format from the header only (<1ms).
///
/// Forms can use this to show a picked file's size before the full decode.
pub fn inspect_header(data: &[u8]) -> std::result::Result<ImageHeader, IntakeError> {
    read_header(Cursor::new(data))
}

pub fn inspect_file(path: &str) -> std::result::Result<ImageHeader, IntakeError> {
    use std::fs::File;

    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => IntakeError::file_not_found(path.to_string()),
        _ => IntakeError::file_read_failed(path.to_string(), e),
    })?;
    read_header(BufReader::new(file))
}

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Formats a picked file may be in.
pub fn supported_input_formats() -> &'static [&'static str] {
    &["jpeg", "jpg", "png", "webp"]
}
