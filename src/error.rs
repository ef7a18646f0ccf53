// src/error.rs
//
// Unified error handling for photo-intake
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - UserError: Invalid input or an action the current state does not allow
// - CodecError: Format/encoding issues
// - ResourceLimit: Hardware, file-system, dimension limits
// - InternalBug: Library bugs (should not happen)

use std::borrow::Cow;
use thiserror::Error;

/// Error taxonomy used to pick the notification shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCategory {
    /// Invalid input or disallowed action, recoverable by user
    UserError,
    /// Format/encoding issues
    CodecError,
    /// Camera/file-system/dimension limits
    ResourceLimit,
    /// Library bugs (should not happen)
    InternalBug,
}

/// Why a camera stream could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFailure {
    /// The user (or platform policy) refused access.
    PermissionDenied,
    /// No device matches the requested constraints.
    NotFound,
    /// The device exists but another consumer holds it.
    Busy,
    /// Anything the platform could not classify.
    Other,
}

impl CameraFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission denied",
            Self::NotFound => "no camera available",
            Self::Busy => "camera busy",
            Self::Other => "camera error",
        }
    }
}

impl std::fmt::Display for CameraFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// photo-intake error types
#[derive(Debug, Error)]
pub enum IntakeError {
    // Acquisition Errors
    #[error("Camera unavailable ({failure}): {message}")]
    CameraUnavailable {
        failure: CameraFailure,
        message: Cow<'static, str>,
    },

    #[error("Failed to capture camera frame: {message}")]
    CaptureFailed { message: Cow<'static, str> },

    #[error("File not found: {path}")]
    FileNotFound { path: Cow<'static, str> },

    #[error("Failed to read file '{path}': {source}")]
    FileReadFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to memory-map file '{path}': {source}")]
    MmapFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    // Decode Errors
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Empty image source")]
    EmptySource,

    // Size Limit Errors
    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    #[error("Upload rejected: {reason}")]
    UploadRejected { reason: Cow<'static, str> },

    // Crop/Transform Errors
    #[error("Invalid crop dimensions: width={width}, height={height}")]
    InvalidCropDimensions { width: u32, height: u32 },

    #[error("Resize failed ({source_width}x{source_height} -> {target_width}x{target_height}): {message}")]
    ResizeFailed {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        message: Cow<'static, str>,
    },

    // Encode Errors
    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    // Configuration Errors
    #[error("Unknown preset: '{name}'. Available: review, product, banner, profile")]
    InvalidPreset { name: Cow<'static, str> },

    #[error("Invalid value for {name}: {value}. {reason}")]
    InvalidArgument {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    #[error("Invalid pipeline configuration: {message}")]
    InvalidConfig { message: Cow<'static, str> },

    // State Errors
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error("Image limit reached ({count} of {max}); remove an image before adding another")]
    StagingFull { count: usize, max: usize },

    #[error("No staged image at index {index} (have {len})")]
    StagedIndexOutOfRange { index: usize, len: usize },

    #[error("Operation cancelled")]
    Cancelled,

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },
}

impl Clone for IntakeError {
    fn clone(&self) -> Self {
        match self {
            Self::CameraUnavailable { failure, message } => Self::CameraUnavailable {
                failure: *failure,
                message: message.clone(),
            },
            Self::CaptureFailed { message } => Self::CaptureFailed {
                message: message.clone(),
            },
            Self::FileNotFound { path } => Self::FileNotFound { path: path.clone() },
            Self::FileReadFailed { path, source } => Self::FileReadFailed {
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::MmapFailed { path, source } => Self::MmapFailed {
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::UnsupportedFormat { format } => Self::UnsupportedFormat {
                format: format.clone(),
            },
            Self::DecodeFailed { message } => Self::DecodeFailed {
                message: message.clone(),
            },
            Self::EmptySource => Self::EmptySource,
            Self::DimensionExceedsLimit { dimension, max } => Self::DimensionExceedsLimit {
                dimension: *dimension,
                max: *max,
            },
            Self::PixelCountExceedsLimit { pixels, max } => Self::PixelCountExceedsLimit {
                pixels: *pixels,
                max: *max,
            },
            Self::UploadRejected { reason } => Self::UploadRejected {
                reason: reason.clone(),
            },
            Self::InvalidCropDimensions { width, height } => Self::InvalidCropDimensions {
                width: *width,
                height: *height,
            },
            Self::ResizeFailed {
                source_width,
                source_height,
                target_width,
                target_height,
                message,
            } => Self::ResizeFailed {
                source_width: *source_width,
                source_height: *source_height,
                target_width: *target_width,
                target_height: *target_height,
                message: message.clone(),
            },
            Self::EncodeFailed { format, message } => Self::EncodeFailed {
                format: format.clone(),
                message: message.clone(),
            },
            Self::InvalidPreset { name } => Self::InvalidPreset { name: name.clone() },
            Self::InvalidArgument {
                name,
                value,
                reason,
            } => Self::InvalidArgument {
                name: name.clone(),
                value: value.clone(),
                reason: reason.clone(),
            },
            Self::InvalidConfig { message } => Self::InvalidConfig {
                message: message.clone(),
            },
            Self::InvalidTransition { action, state } => Self::InvalidTransition {
                action: *action,
                state: *state,
            },
            Self::StagingFull { count, max } => Self::StagingFull {
                count: *count,
                max: *max,
            },
            Self::StagedIndexOutOfRange { index, len } => Self::StagedIndexOutOfRange {
                index: *index,
                len: *len,
            },
            Self::Cancelled => Self::Cancelled,
            Self::InternalPanic { message } => Self::InternalPanic {
                message: message.clone(),
            },
        }
    }
}

// Constructor Helpers
impl IntakeError {
    pub fn camera_unavailable(
        failure: CameraFailure,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::CameraUnavailable {
            failure,
            message: message.into(),
        }
    }

    pub fn capture_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::CaptureFailed {
            message: message.into(),
        }
    }

    pub fn file_not_found(path: impl Into<Cow<'static, str>>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub fn file_read_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            source,
        }
    }

    pub fn mmap_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::MmapFailed {
            path: path.into(),
            source,
        }
    }

    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn upload_rejected(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::UploadRejected {
            reason: reason.into(),
        }
    }

    pub fn invalid_crop_dimensions(width: u32, height: u32) -> Self {
        Self::InvalidCropDimensions { width, height }
    }

    pub fn resize_failed(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ResizeFailed {
            source_width: source_dims.0,
            source_height: source_dims.1,
            target_width: target_dims.0,
            target_height: target_dims.1,
            message: message.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn invalid_preset(name: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidPreset { name: name.into() }
    }

    pub fn invalid_argument(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn invalid_transition(action: &'static str, state: &'static str) -> Self {
        Self::InvalidTransition { action, state }
    }

    pub fn staging_full(count: usize, max: usize) -> Self {
        Self::StagingFull { count, max }
    }

    pub fn staged_index_out_of_range(index: usize, len: usize) -> Self {
        Self::StagedIndexOutOfRange { index, len }
    }

    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (user can fix it)
    ///
    /// Consistent with category():
    /// - UserError and ResourceLimit are recoverable (grant permission, pick another file)
    /// - CodecError and InternalBug are not
    pub fn is_recoverable(&self) -> bool {
        match self.category() {
            ErrorCategory::UserError | ErrorCategory::ResourceLimit => true,
            ErrorCategory::CodecError | ErrorCategory::InternalBug => false,
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::FileNotFound { .. }
            | Self::EmptySource
            | Self::InvalidCropDimensions { .. }
            | Self::InvalidPreset { .. }
            | Self::InvalidArgument { .. }
            | Self::InvalidConfig { .. }
            | Self::InvalidTransition { .. }
            | Self::StagingFull { .. }
            | Self::StagedIndexOutOfRange { .. }
            | Self::Cancelled => ErrorCategory::UserError,

            Self::UnsupportedFormat { .. }
            | Self::DecodeFailed { .. }
            | Self::EncodeFailed { .. }
            // Resize happens between decode and encode and fails for the same reasons.
            | Self::ResizeFailed { .. } => ErrorCategory::CodecError,

            // Camera errors are hardware availability, file errors are usually permissions
            // or missing media. Both are fixable outside the pipeline.
            Self::CameraUnavailable { .. }
            | Self::CaptureFailed { .. }
            | Self::FileReadFailed { .. }
            | Self::MmapFailed { .. }
            | Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::UploadRejected { .. } => ErrorCategory::ResourceLimit,

            Self::InternalPanic { .. } => ErrorCategory::InternalBug,
        }
    }

    /// Short text for the blocking notification a form shows on failure.
    ///
    /// Decode and encode problems collapse into one generic notice; the
    /// detailed message is for logs.
    pub fn user_message(&self) -> Cow<'static, str> {
        match self {
            Self::CameraUnavailable { failure, .. } => match failure {
                CameraFailure::PermissionDenied => {
                    Cow::Borrowed("Camera access was denied. Allow camera access and try again.")
                }
                CameraFailure::NotFound => Cow::Borrowed("No camera was found on this device."),
                CameraFailure::Busy => {
                    Cow::Borrowed("The camera is in use by another application.")
                }
                CameraFailure::Other => Cow::Borrowed("Could not start the camera."),
            },
            Self::StagingFull { max, .. } => Cow::Owned(format!("You can add at most {max} images.")),
            Self::Cancelled => Cow::Borrowed("Cancelled."),
            _ => match self.category() {
                ErrorCategory::UserError => Cow::Owned(self.to_string()),
                ErrorCategory::CodecError
                | ErrorCategory::ResourceLimit
                | ErrorCategory::InternalBug => Cow::Borrowed("Failed to process image."),
            },
        }
    }
}

impl ErrorCategory {
    /// Get string representation of error category
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "UserError",
            ErrorCategory::CodecError => "CodecError",
            ErrorCategory::ResourceLimit => "ResourceLimit",
            ErrorCategory::InternalBug => "InternalBug",
        }
    }

    /// Stable machine-readable code for this category
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "PHOTO_INTAKE_USER_ERROR",
            ErrorCategory::CodecError => "PHOTO_INTAKE_CODEC_ERROR",
            ErrorCategory::ResourceLimit => "PHOTO_INTAKE_RESOURCE_LIMIT",
            ErrorCategory::InternalBug => "PHOTO_INTAKE_INTERNAL_BUG",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IntakeError::staging_full(5, 5);
        assert!(err.to_string().contains("5 of 5"));

        let err = IntakeError::invalid_transition("confirm crop", "idle");
        assert_eq!(err.to_string(), "Cannot confirm crop while idle");
    }

    #[test]
    fn test_error_recoverable() {
        assert!(IntakeError::camera_unavailable(CameraFailure::PermissionDenied, "denied")
            .is_recoverable());
        assert!(IntakeError::cancelled().is_recoverable());
        assert!(!IntakeError::decode_failed("bad").is_recoverable());
        assert!(!IntakeError::internal_panic("boom").is_recoverable());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            IntakeError::encode_failed("jpeg", "x").category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            IntakeError::camera_unavailable(CameraFailure::NotFound, "none").category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            IntakeError::staging_full(1, 1).category(),
            ErrorCategory::UserError
        );
        assert_eq!(
            IntakeError::internal_panic("x").category(),
            ErrorCategory::InternalBug
        );
    }

    #[test]
    fn test_user_message_hides_codec_details() {
        let err = IntakeError::decode_failed("mozjpeg: missing JPEG EOI marker");
        assert_eq!(err.user_message(), "Failed to process image.");

        let err = IntakeError::camera_unavailable(CameraFailure::PermissionDenied, "NotAllowedError");
        assert!(err.user_message().contains("denied"));
    }

    #[test]
    fn test_clone_preserves_io_kind() {
        let err = IntakeError::file_read_failed(
            "a.jpg",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        match err.clone() {
            IntakeError::FileReadFailed { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied)
            }
            other => panic!("unexpected clone: {other:?}"),
        }
    }

    #[test]
    fn test_category_codes() {
        assert_eq!(ErrorCategory::UserError.code(), "PHOTO_INTAKE_USER_ERROR");
        assert_eq!(ErrorCategory::CodecError.as_str(), "CodecError");
    }
}
