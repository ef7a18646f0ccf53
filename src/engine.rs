// src/engine.rs
//
// The core of photo-intake. Per image, control moves strictly forward:
// 1. Acquisition: a picked file or one frame from a live camera stream
// 2. Crop/transform: fixed-aspect rectangle with zoom and rotation
// 3. Compression: one-time downscale, then quality back-off to a byte budget
//
// This file is a facade over the modules in engine/.

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed image dimension (width or height) of a picked file.
/// Larger headers are rejected before decoding to stop decompression bombs.
pub const MAX_DECODE_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height).
/// 100 megapixels = 400MB uncompressed RGBA.
pub const MAX_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod camera;
mod common;
mod compress;
mod crop;
mod decoder;
mod encoder;
mod io;
mod limits;
mod metrics;
mod pipeline;
mod pool;
mod session;
mod staging;

pub use camera::{
    CameraDevice, CameraSession, CapturedFrame, FacingMode, MediaStream, StreamConstraints,
    TrackState,
};
pub use common::{run_with_panic_policy, EngineResult};
pub use compress::{
    compress, recompress, timestamped_filename, Attempt, CancelToken, CompressedArtifact,
    CompressionReport, Compressor, QualityLadder,
};
pub use crop::{CropSession, CroppedImage};
pub use decoder::{
    apply_exif_orientation, check_dimensions, decode_image, decode_source,
    detect_exif_orientation, detect_format, ensure_dimensions_safe, BitmapOrigin, DecodedBitmap,
};
pub use encoder::{encode_jpeg, flatten_alpha, Encode, MozJpegEncoder};
pub use io::{PickedFile, RawImageSource, Source};
pub use limits::{PolicyMode, UploadPolicy};
pub use metrics::{PipelineMetrics, PIPELINE_METRICS_VERSION};
pub use pipeline::{
    calc_resize_dimensions, downscale_dimensions, downscale_to_fit, extract, fast_resize_owned,
    render_crop, rotate_into_bounds, rotated_bounds, ResizeError, RotationFrame,
};
pub use pool::{compress_batch, compress_in_background, get_pool, CompressionHandle};
pub use session::{IntakeSession, IntakeState};
pub use staging::{AcquisitionControls, ImageChangeListener, StagedImages};
