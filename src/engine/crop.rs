// src/engine/crop.rs
//
// Interactive crop state over a decoded bitmap.
//
// Coordinates are pixels in the bounding box of the bitmap rotated by the
// current angle. The rectangle keeps the configured aspect ratio and its size
// is the largest rectangle inscribed in the rotated bitmap divided by zoom.
// After every zoom, rotation, or pan change it is re-clamped so all four
// corners map back inside the bitmap.

use crate::engine::decoder::DecodedBitmap;
use crate::engine::pipeline::{render_crop, RotationFrame};
use crate::error::IntakeError;
use crate::ops::{clamp_zoom, normalize_rotation, AspectRatio, CropSpec, MIN_ZOOM};
use image::RgbaImage;
use tracing::debug;

/// A confirmed crop: the frozen spec and the raster it produced.
#[derive(Clone, Debug)]
pub struct CroppedImage {
    pub spec: CropSpec,
    pub pixels: RgbaImage,
}

impl CroppedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

#[derive(Debug)]
pub struct CropSession {
    bitmap: DecodedBitmap,
    aspect: AspectRatio,
    zoom: f32,
    rotation: f32,
    // Rectangle centre as a fraction of the rotated box, so it survives
    // rotation changes that resize the box.
    centre: (f64, f64),
    spec: CropSpec,
}

impl CropSession {
    pub fn new(bitmap: DecodedBitmap, aspect: AspectRatio) -> Self {
        let (w, h) = bitmap.dimensions();
        let mut session = Self {
            bitmap,
            aspect,
            zoom: MIN_ZOOM,
            rotation: 0.0,
            centre: (0.5, 0.5),
            spec: CropSpec::full(w, h),
        };
        session.reclamp();
        session
    }

    pub fn bitmap(&self) -> &DecodedBitmap {
        &self.bitmap
    }

    /// Current spec. A copy, so later edits never change it.
    pub fn spec(&self) -> CropSpec {
        self.spec
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    /// Size of the rotated bounding box the rectangle's coordinates live in.
    pub fn bounds(&self) -> (u32, u32) {
        self.frame().bounds()
    }

    /// The bitmap rotated by the current angle.
    pub fn frame(&self) -> RotationFrame {
        let (w, h) = self.bitmap.dimensions();
        RotationFrame::new(w, h, self.rotation)
    }

    /// Set zoom, clamped to [1, 3]. Non-finite input is ignored.
    pub fn set_zoom(&mut self, zoom: f32) {
        if !zoom.is_finite() {
            return;
        }
        self.zoom = clamp_zoom(zoom);
        self.reclamp();
    }

    /// Set rotation in degrees, normalized into [0, 360). Non-finite input is ignored.
    pub fn set_rotation(&mut self, degrees: f32) {
        if !degrees.is_finite() {
            return;
        }
        self.rotation = normalize_rotation(degrees);
        self.reclamp();
    }

    pub fn rotate_by(&mut self, delta_degrees: f32) {
        if !delta_degrees.is_finite() {
            return;
        }
        self.set_rotation(self.rotation + delta_degrees);
    }

    /// Move the rectangle by a pixel delta in the rotated box.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        if !dx.is_finite() || !dy.is_finite() {
            return;
        }
        let (bw, bh) = self.bounds();
        self.centre.0 += dx / bw as f64;
        self.centre.1 += dy / bh as f64;
        self.reclamp();
    }

    /// Adopt a rectangle reported by a UI (pixels in the rotated box).
    ///
    /// The rectangle's width sets the zoom and its centre sets the pan; the
    /// result is re-fitted to the configured aspect and clamped into the bitmap.
    pub fn set_crop_rect(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<(), IntakeError> {
        if width == 0 || height == 0 {
            return Err(IntakeError::invalid_crop_dimensions(width, height));
        }
        let frame = self.frame();
        let (bw, bh) = frame.bounds();
        let (max_w, _) = frame.inscribed_rect(self.aspect.as_f64());
        self.zoom = clamp_zoom((max_w / width as f64) as f32);
        self.centre = (
            (x as f64 + width as f64 / 2.0) / bw as f64,
            (y as f64 + height as f64 / 2.0) / bh as f64,
        );
        self.reclamp();
        Ok(())
    }

    /// Materialize the current spec. Consumes the session and its bitmap.
    pub fn confirm(self) -> Result<CroppedImage, IntakeError> {
        let spec = self.spec;
        let pixels = render_crop(self.bitmap.into_pixels(), &spec)?;
        debug!(
            target: "photo_intake::session",
            width = spec.width,
            height = spec.height,
            zoom = spec.zoom,
            rotation = spec.rotation_degrees,
            "crop confirmed"
        );
        Ok(CroppedImage { spec, pixels })
    }

    fn reclamp(&mut self) {
        let frame = self.frame();
        let (bw, bh) = frame.bounds();
        let (max_w, max_h) = frame.inscribed_rect(self.aspect.as_f64());
        let zoom = self.zoom as f64;
        let desired = (self.centre.0 * bw as f64, self.centre.1 * bh as f64);

        let (rw, rh, (cx, cy)) = if frame.is_quarter_turn() {
            let rw = ((max_w / zoom).round() as u32).clamp(1, bw);
            let rh = ((max_h / zoom).round() as u32).clamp(1, bh);
            let (half_w, half_h) = (rw as f64 / 2.0, rh as f64 / 2.0);
            let cx = desired.0.clamp(half_w, bw as f64 - half_w);
            let cy = desired.1.clamp(half_h, bh as f64 - half_h);
            (rw, rh, (cx, cy))
        } else {
            // Round down so the rectangle never outgrows the inscribed one
            let rw = ((max_w / zoom).floor() as u32).clamp(1, bw);
            let rh = ((max_h / zoom).floor() as u32).clamp(1, bh);
            (rw, rh, frame.clamp_centre(desired, rw, rh))
        };
        self.centre = (cx / bw as f64, cy / bh as f64);

        let offset_x = ((cx - rw as f64 / 2.0).round().max(0.0) as u32).min(bw - rw);
        let offset_y = ((cy - rh as f64 / 2.0).round().max(0.0) as u32).min(bh - rh);

        self.spec = CropSpec {
            offset_x,
            offset_y,
            width: rw,
            height: rh,
            zoom: self.zoom,
            rotation_degrees: self.rotation,
        };
    }
}
