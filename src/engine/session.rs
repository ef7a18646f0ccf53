// src/engine/session.rs
//
// The per-form state machine driving acquisition -> crop -> compression.
//
// States own their resources: `Acquiring` holds the camera session and
// `Cropping` the crop session, so leaving a state (cancel, failure, drop of the
// whole machine) releases them. Every failure lands back in `Idle` with the
// staged collection untouched.

use crate::engine::camera::{CameraDevice, CameraSession, StreamConstraints};
use crate::engine::compress::{CancelToken, CompressedArtifact, CompressionReport, Compressor};
use crate::engine::crop::CropSession;
use crate::engine::decoder::decode_source;
use crate::engine::encoder::Encode;
use crate::engine::io::{PickedFile, RawImageSource};
use crate::engine::metrics::PipelineMetrics;
use crate::engine::staging::{AcquisitionControls, ImageChangeListener, StagedImages};
use crate::error::IntakeError;
use crate::ops::PipelineConfig;
use image::RgbaImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

type SessionResult<T> = std::result::Result<T, IntakeError>;

#[derive(Debug, Default)]
pub enum IntakeState {
    #[default]
    Idle,
    /// Camera stream open, preview showing.
    Acquiring(CameraSession),
    /// Bitmap decoded, user adjusting the crop.
    Cropping(CropSession),
    /// Quality search running.
    Compressing,
}

impl IntakeState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Acquiring(_) => "acquiring",
            Self::Cropping(_) => "cropping",
            Self::Compressing => "compressing",
        }
    }
}

pub struct IntakeSession {
    state: IntakeState,
    compressor: Compressor,
    images: StagedImages,
    listener: Option<Box<dyn ImageChangeListener + Send>>,
    cancel: CancelToken,
    last_report: Option<CompressionReport>,
}

impl std::fmt::Debug for IntakeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeSession")
            .field("state", &self.state.name())
            .field("staged", &self.images.staged().len())
            .field("max_images", &self.images.max_images())
            .finish()
    }
}

impl IntakeSession {
    pub fn new(config: PipelineConfig) -> SessionResult<Self> {
        let images = StagedImages::new(config.max_images);
        Self::with_images(config, images)
    }

    /// Start from a form that already has persisted or staged images.
    pub fn with_images(config: PipelineConfig, images: StagedImages) -> SessionResult<Self> {
        Ok(Self {
            state: IntakeState::Idle,
            compressor: Compressor::new(config)?,
            images,
            listener: None,
            cancel: CancelToken::new(),
            last_report: None,
        })
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn Encode>) -> Self {
        self.compressor = self.compressor.with_encoder(encoder);
        self
    }

    pub fn set_listener(&mut self, listener: Box<dyn ImageChangeListener + Send>) {
        self.listener = Some(listener);
    }

    pub fn config(&self) -> &PipelineConfig {
        self.compressor.config()
    }

    pub fn state(&self) -> &IntakeState {
        &self.state
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub fn images(&self) -> &StagedImages {
        &self.images
    }

    /// Acquisition is offered only while idle and below the image cap.
    pub fn enabled_controls(&self) -> AcquisitionControls {
        match self.state {
            IntakeState::Idle => self.images.enabled_controls(),
            _ => AcquisitionControls::empty(),
        }
    }

    /// Token that cancels the current image's compression from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn last_report(&self) -> Option<&CompressionReport> {
        self.last_report.as_ref()
    }

    pub fn last_metrics(&self) -> Option<&PipelineMetrics> {
        self.last_report.as_ref().map(|r| &r.metrics)
    }

    fn ensure_idle(&self, action: &'static str) -> SessionResult<()> {
        match self.state {
            IntakeState::Idle => Ok(()),
            _ => Err(IntakeError::invalid_transition(action, self.state.name())),
        }
    }

    fn transition(&mut self, next: IntakeState) -> IntakeState {
        debug!(
            target: "photo_intake::session",
            from = self.state.name(),
            to = next.name(),
            "state transition"
        );
        std::mem::replace(&mut self.state, next)
    }

    fn fail(&mut self, action: &'static str, err: IntakeError) -> IntakeError {
        // Dropping the previous state releases any camera stream or bitmap.
        self.transition(IntakeState::Idle);
        warn!(
            target: "photo_intake::session",
            action,
            error = %err,
            category = err.category().as_str(),
            "pipeline step failed; back to idle"
        );
        err
    }

    /// Request the rear camera and start previewing.
    pub fn open_camera(&mut self, device: &mut dyn CameraDevice) -> SessionResult<()> {
        self.open_camera_with(device, &StreamConstraints::rear())
    }

    pub fn open_camera_with(
        &mut self,
        device: &mut dyn CameraDevice,
        constraints: &StreamConstraints,
    ) -> SessionResult<()> {
        self.ensure_idle("open camera")?;
        self.images.ensure_capacity()?;
        match CameraSession::open(device, constraints) {
            Ok(camera) => {
                self.transition(IntakeState::Acquiring(camera));
                Ok(())
            }
            Err(err) => Err(self.fail("open camera", err)),
        }
    }

    pub fn preview_frame(&mut self) -> SessionResult<RgbaImage> {
        match &mut self.state {
            IntakeState::Acquiring(camera) => camera.preview_frame(),
            other => Err(IntakeError::invalid_transition("preview", other.name())),
        }
    }

    /// Freeze the preview frame, release the camera and enter cropping.
    pub fn capture(&mut self) -> SessionResult<()> {
        if !matches!(self.state, IntakeState::Acquiring(_)) {
            return Err(IntakeError::invalid_transition("capture", self.state.name()));
        }
        let IntakeState::Acquiring(camera) = self.transition(IntakeState::Idle) else {
            return Err(IntakeError::internal_panic("camera session vanished"));
        };
        let frame = match camera.capture() {
            Ok(frame) => frame,
            Err(err) => return Err(self.fail("capture", err)),
        };
        self.begin_crop(RawImageSource::Frame(frame), "capture")
    }

    /// Decode a picked file and enter cropping.
    pub fn pick_file(&mut self, file: PickedFile) -> SessionResult<()> {
        self.ensure_idle("pick file")?;
        self.images.ensure_capacity()?;
        self.begin_crop(RawImageSource::File(file), "pick file")
    }

    fn begin_crop(&mut self, source: RawImageSource, action: &'static str) -> SessionResult<()> {
        let config = self.compressor.config();
        match decode_source(source, config) {
            Ok(bitmap) => {
                let crop = CropSession::new(bitmap, config.aspect);
                self.cancel = CancelToken::new();
                self.transition(IntakeState::Cropping(crop));
                Ok(())
            }
            Err(err) => Err(self.fail(action, err)),
        }
    }

    pub fn crop(&self) -> Option<&CropSession> {
        match &self.state {
            IntakeState::Cropping(crop) => Some(crop),
            _ => None,
        }
    }

    pub fn crop_mut(&mut self) -> SessionResult<&mut CropSession> {
        match &mut self.state {
            IntakeState::Cropping(crop) => Ok(crop),
            other => Err(IntakeError::invalid_transition("adjust crop", other.name())),
        }
    }

    /// Abandon the current image from any state. Idempotent.
    ///
    /// Stops the camera stream and discards the bitmap; staged images are
    /// untouched.
    pub fn cancel(&mut self) {
        if matches!(self.state, IntakeState::Idle) {
            return;
        }
        self.cancel.cancel();
        self.transition(IntakeState::Idle);
        debug!(target: "photo_intake::session", "image cancelled");
    }

    /// Render the crop, compress it and stage the artifact.
    pub fn confirm(&mut self) -> SessionResult<CompressedArtifact> {
        if !matches!(self.state, IntakeState::Cropping(_)) {
            return Err(IntakeError::invalid_transition("confirm", self.state.name()));
        }
        let IntakeState::Cropping(crop) = self.transition(IntakeState::Compressing) else {
            return Err(IntakeError::internal_panic("crop session vanished"));
        };

        // Re-check: persisted images may have been added since cropping began.
        if let Err(err) = self.images.ensure_capacity() {
            return Err(self.fail("confirm", err));
        }

        let crop_start = Instant::now();
        let cropped = match crop.confirm() {
            Ok(cropped) => cropped,
            Err(err) => return Err(self.fail("confirm", err)),
        };
        let crop_ms = crop_start.elapsed().as_secs_f64() * 1000.0;

        let (artifact, mut report) = match self
            .compressor
            .compress_with_report(cropped.pixels, &self.cancel)
        {
            Ok(done) => done,
            Err(err) => return Err(self.fail("compress", err)),
        };
        report.metrics.crop_ms = crop_ms;
        report.metrics.total_ms += crop_ms;

        let listener = self
            .listener
            .as_deref_mut()
            .map(|l| l as &mut dyn ImageChangeListener);
        if let Err(err) = self.images.append(artifact.clone(), listener) {
            return Err(self.fail("stage", err));
        }

        self.last_report = Some(report);
        self.transition(IntakeState::Idle);
        Ok(artifact)
    }

    pub fn remove_staged(&mut self, index: usize) -> SessionResult<CompressedArtifact> {
        let listener = self
            .listener
            .as_deref_mut()
            .map(|l| l as &mut dyn ImageChangeListener);
        self.images.remove_staged(index, listener)
    }

    /// Mark a persisted image for removal. Never touches the pipeline state.
    pub fn remove_existing(&mut self, index: usize) -> SessionResult<()> {
        let listener = self
            .listener
            .as_deref_mut()
            .map(|l| l as &mut dyn ImageChangeListener);
        self.images.remove_existing(index, listener)
    }

    /// Hand the staged collection to the form (for upload) and reset it.
    pub fn take_images(&mut self) -> StagedImages {
        let max = self.images.max_images();
        std::mem::replace(&mut self.images, StagedImages::new(max))
    }
}
