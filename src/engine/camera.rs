// src/engine/camera.rs
//
// Camera acquisition: device/stream seams and the RAII session that owns a
// live stream. A stream is released (all tracks stopped) on every path out of
// the session - capture, cancel, or drop during teardown.

use crate::error::IntakeError;
use chrono::{DateTime, Utc};
use image::RgbaImage;
use std::time::Instant;
use tracing::{debug, warn};

/// Which camera the stream should come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FacingMode {
    /// Rear-facing camera (products, receipts, gifts on a table)
    #[default]
    Environment,
    /// Front-facing camera
    User,
}

/// Constraints passed to the device when requesting a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct StreamConstraints {
    pub facing: FacingMode,
    pub ideal_width: Option<u32>,
    pub ideal_height: Option<u32>,
}

impl StreamConstraints {
    pub fn rear() -> Self {
        Self::default()
    }
}

/// State of one media track inside a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

/// A live video stream handed out by a [`CameraDevice`].
pub trait MediaStream: Send {
    /// Read the frame currently shown in the preview.
    fn read_frame(&mut self) -> Result<RgbaImage, IntakeError>;

    /// Stop every track of the stream. Must be idempotent.
    fn stop_all_tracks(&mut self);

    /// Current state of every track.
    fn track_states(&self) -> Vec<TrackState>;
}

/// Platform camera access (browser MediaDevices, V4L2, AVFoundation...).
pub trait CameraDevice {
    /// Request a stream. Permission prompts happen here; refusal must come back
    /// as `IntakeError::CameraUnavailable`.
    fn open(&mut self, constraints: &StreamConstraints)
        -> Result<Box<dyn MediaStream>, IntakeError>;
}

/// A still frame frozen from a camera stream.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    pixels: RgbaImage,
    captured_at: DateTime<Utc>,
}

impl CapturedFrame {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels,
            captured_at: Utc::now(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn into_pixels(self) -> RgbaImage {
        self.pixels
    }
}

/// Exclusive owner of an open camera stream.
///
/// Dropping the session stops the stream, so state machines can simply drop
/// it on cancel or teardown.
pub struct CameraSession {
    stream: Option<Box<dyn MediaStream>>,
    opened_at: Instant,
}

impl std::fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSession")
            .field("live", &self.stream.is_some())
            .field("opened_for", &self.opened_at.elapsed())
            .finish()
    }
}

impl CameraSession {
    /// Open a stream on `device`. On failure nothing is retained.
    pub fn open(
        device: &mut dyn CameraDevice,
        constraints: &StreamConstraints,
    ) -> Result<Self, IntakeError> {
        let stream = device.open(constraints).map_err(|err| {
            warn!(target: "photo_intake::camera", error = %err, "camera open failed");
            err
        })?;
        debug!(target: "photo_intake::camera", facing = ?constraints.facing, "camera stream opened");
        Ok(Self {
            stream: Some(stream),
            opened_at: Instant::now(),
        })
    }

    /// Current preview frame; the stream stays open.
    pub fn preview_frame(&mut self) -> Result<RgbaImage, IntakeError> {
        match self.stream.as_mut() {
            Some(stream) => stream.read_frame(),
            None => Err(IntakeError::capture_failed("camera stream already released")),
        }
    }

    /// Freeze the current frame and release the stream.
    ///
    /// The stream is stopped whether or not reading the frame succeeded.
    pub fn capture(mut self) -> Result<CapturedFrame, IntakeError> {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| IntakeError::capture_failed("camera stream already released"))?;
        let frame = stream.read_frame();
        stream.stop_all_tracks();
        debug!(
            target: "photo_intake::camera",
            open_ms = self.opened_at.elapsed().as_millis() as u64,
            ok = frame.is_ok(),
            "camera stream released after capture"
        );

        let pixels = frame?;
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(IntakeError::capture_failed("camera returned an empty frame"));
        }
        Ok(CapturedFrame::new(pixels))
    }

    /// Close without capturing.
    pub fn close(self) {
        drop(self);
    }

    pub fn is_live(&self) -> bool {
        self.stream
            .as_ref()
            .map(|s| s.track_states().iter().any(|t| *t == TrackState::Live))
            .unwrap_or(false)
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_all_tracks();
            debug!(
                target: "photo_intake::camera",
                open_ms = self.opened_at.elapsed().as_millis() as u64,
                "camera stream released on drop"
            );
        }
    }
}
