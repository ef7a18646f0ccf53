// src/engine/compress.rs
//
// Size-constrained compression: one-time downscale, then quality back-off
// until the encoding fits the byte budget or the quality floor is reached.

use crate::engine::decoder::decode_image;
use crate::engine::encoder::{flatten_alpha, Encode, MozJpegEncoder};
use crate::engine::metrics::{MetricsRecorder, PipelineMetrics};
use crate::engine::pipeline::downscale_to_fit;
use crate::error::IntakeError;
use crate::ops::{PipelineConfig, Quality};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

type CompressResult<T> = std::result::Result<T, IntakeError>;

/// Cooperative cancellation flag, checked before every encode attempt.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> CompressResult<()> {
        if self.is_cancelled() {
            Err(IntakeError::cancelled())
        } else {
            Ok(())
        }
    }
}

/// Descending qualities: q0, q0 - step, ... ending exactly at the floor.
///
/// The last rung is clamped to the floor, so a run never goes below it and
/// always tries it once.
#[derive(Clone, Debug)]
pub struct QualityLadder {
    next: Option<u8>,
    floor: u8,
    step: u8,
}

impl QualityLadder {
    pub fn new(initial: Quality, floor: Quality, step_percent: u8) -> Self {
        let floor = floor.percent().min(initial.percent());
        Self {
            next: Some(initial.percent()),
            floor,
            step: step_percent.max(1),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> CompressResult<Self> {
        Ok(Self::new(
            config.initial_quality()?,
            config.min_quality()?,
            config.quality_step_percent(),
        ))
    }

    /// Upper bound on attempts: ceil((q0 - floor) / step) + 1.
    pub fn max_attempts(initial: Quality, floor: Quality, step_percent: u8) -> usize {
        let span = initial.percent().saturating_sub(floor.percent()) as usize;
        let step = step_percent.max(1) as usize;
        span.div_ceil(step) + 1
    }
}

impl Iterator for QualityLadder {
    type Item = Quality;

    fn next(&mut self) -> Option<Quality> {
        let current = self.next?;
        self.next = if current <= self.floor {
            None
        } else {
            Some(current.saturating_sub(self.step).max(self.floor))
        };
        Some(Quality::from_percent(current))
    }
}

/// One encode of the quality search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attempt {
    pub quality: Quality,
    pub size_bytes: u64,
}

/// Diagnostics for one compression run.
#[derive(Clone, Debug)]
pub struct CompressionReport {
    pub source_dims: (u32, u32),
    pub output_dims: (u32, u32),
    pub downscaled: bool,
    pub attempts: Vec<Attempt>,
    pub metrics: PipelineMetrics,
}

/// The encoded upload payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedArtifact {
    bytes: Arc<Vec<u8>>,
    filename: String,
    mime: &'static str,
    quality: Quality,
    dimensions: (u32, u32),
    within_budget: bool,
}

impl CompressedArtifact {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        Arc::try_unwrap(self.bytes).unwrap_or_else(|shared| shared.as_ref().clone())
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    /// False when the floor was reached with the encoding still over budget.
    pub fn within_budget(&self) -> bool {
        self.within_budget
    }
}

static LAST_FILENAME_MILLIS: AtomicI64 = AtomicI64::new(0);

/// `<prefix>-<unix millis>.<ext>`, strictly increasing within the process.
pub fn timestamped_filename(prefix: &str, extension: &str) -> String {
    let now = chrono::Utc::now().timestamp_millis();
    let mut last = LAST_FILENAME_MILLIS.load(Ordering::SeqCst);
    let stamp = loop {
        let candidate = now.max(last + 1);
        match LAST_FILENAME_MILLIS.compare_exchange(
            last,
            candidate,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => break candidate,
            Err(observed) => last = observed,
        }
    };
    format!("{prefix}-{stamp}.{extension}")
}

/// Runs the downscale + quality search for one form configuration.
#[derive(Clone)]
pub struct Compressor {
    config: PipelineConfig,
    encoder: Arc<dyn Encode>,
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor")
            .field("config", &self.config)
            .field("format", &self.encoder.format())
            .finish()
    }
}

impl Compressor {
    /// Validates the configuration once so every run can rely on it.
    pub fn new(config: PipelineConfig) -> CompressResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            encoder: Arc::new(MozJpegEncoder::new()),
        })
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn Encode>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn compress(&self, pixels: RgbaImage, cancel: &CancelToken) -> CompressResult<CompressedArtifact> {
        self.compress_with_report(pixels, cancel).map(|(artifact, _)| artifact)
    }

    /// Downscale once, then walk the quality ladder.
    ///
    /// Stops at the first encoding within `target_size_bytes`, or at the
    /// quality floor whatever its size. Only an encoder failure or
    /// cancellation is an error.
    pub fn compress_with_report(
        &self,
        pixels: RgbaImage,
        cancel: &CancelToken,
    ) -> CompressResult<(CompressedArtifact, CompressionReport)> {
        cancel.check()?;
        let source_dims = pixels.dimensions();
        let mut recorder = MetricsRecorder::new(pixels.as_raw().len() as u64);

        let rgb = flatten_alpha(&pixels, self.config.background);
        drop(pixels);
        let rgb = downscale_to_fit(rgb, self.config.max_dimension)?;
        let output_dims = rgb.dimensions();
        let downscaled = output_dims != source_dims;
        recorder.mark_downscale_done();
        if downscaled {
            debug!(
                target: "photo_intake::compress",
                from = ?source_dims,
                to = ?output_dims,
                "downscaled before quality search"
            );
        }

        let target = self.config.target_size_bytes;
        let ladder = QualityLadder::from_config(&self.config)?;
        let mut attempts = Vec::new();
        let mut best: Option<(Quality, Vec<u8>)> = None;

        for quality in ladder {
            cancel.check()?;
            let encoded = self.encoder.encode(&rgb, quality)?;
            recorder.record_attempt();
            let size = encoded.len() as u64;
            attempts.push(Attempt {
                quality,
                size_bytes: size,
            });
            debug!(
                target: "photo_intake::compress",
                quality = %quality,
                size,
                target,
                "encode attempt"
            );
            best = Some((quality, encoded));
            if size <= target {
                break;
            }
        }

        let (quality, bytes) = best.ok_or_else(|| {
            IntakeError::internal_panic("quality ladder produced no attempts")
        })?;
        let size = bytes.len() as u64;
        let within_budget = size <= target;
        if !within_budget {
            warn!(
                target: "photo_intake::compress",
                size,
                target,
                quality = %quality,
                "quality floor reached above byte budget; accepting"
            );
        }

        let format = self.encoder.format();
        let artifact = CompressedArtifact {
            bytes: Arc::new(bytes),
            filename: timestamped_filename(&self.config.filename_prefix, format.extension()),
            mime: format.mime_type(),
            quality,
            dimensions: output_dims,
            within_budget,
        };
        let metrics = recorder.finalize(size, quality.percent(), within_budget);
        info!(
            target: "photo_intake::compress",
            filename = artifact.filename(),
            size,
            quality = %quality,
            attempts = attempts.len(),
            total_ms = metrics.total_ms,
            "artifact produced"
        );

        Ok((
            artifact,
            CompressionReport {
                source_dims,
                output_dims,
                downscaled,
                attempts,
                metrics,
            },
        ))
    }

    /// Compress an existing artifact again under this configuration.
    ///
    /// Never returns something larger: when the new encoding is not smaller
    /// the original artifact comes back unchanged.
    pub fn recompress(
        &self,
        artifact: &CompressedArtifact,
        cancel: &CancelToken,
    ) -> CompressResult<CompressedArtifact> {
        let (decoded, _) = decode_image(artifact.bytes())?;
        let candidate = self.compress(decoded.into_rgba8(), cancel)?;
        if candidate.size_bytes() < artifact.size_bytes() {
            Ok(candidate)
        } else {
            debug!(
                target: "photo_intake::compress",
                original = artifact.size_bytes(),
                candidate = candidate.size_bytes(),
                "re-encode not smaller; keeping original"
            );
            Ok(artifact.clone())
        }
    }
}

/// Convenience for one-off runs with the default encoder.
pub fn compress(
    pixels: RgbaImage,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> CompressResult<CompressedArtifact> {
    Compressor::new(config.clone())?.compress(pixels, cancel)
}

/// See [`Compressor::recompress`].
pub fn recompress(
    artifact: &CompressedArtifact,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> CompressResult<CompressedArtifact> {
    Compressor::new(config.clone())?.recompress(artifact, cancel)
}
