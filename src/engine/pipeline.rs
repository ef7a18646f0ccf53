// src/engine/pipeline.rs
//
// Raster operations behind the crop and compression stages: rotation into the
// rotated bounding box, rectangle extraction, and the one-time downscale.

use crate::engine::common::run_with_panic_policy;
use crate::error::IntakeError;
use crate::ops::{normalize_rotation, quarter_turns, CropSpec};
use fast_image_resize::{self as fir, ImageBufferError, MulDiv, PixelType, ResizeOptions};
use image::{imageops, imageops::FilterType, DynamicImage, Rgba, RgbImage, RgbaImage};
use imageproc::geometric_transformations::{warp_into_with, Interpolation};

// Keep IntakeError end to end so pipeline errors stay classified
type PipelineResult<T> = std::result::Result<T, IntakeError>;

/// Fully transparent fill for rotation corners the source does not cover.
const UNCOVERED: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Keeps bilinear sample positions strictly left of the last column/row.
const EDGE_EPSILON: f64 = 1.0 / 64.0;

#[derive(Debug)]
pub struct ResizeError {
    pub source_dims: (u32, u32),
    pub target_dims: (u32, u32),
    pub reason: String,
}

impl ResizeError {
    pub fn new(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source_dims,
            target_dims,
            reason: reason.into(),
        }
    }

    pub fn into_intake_error(self) -> IntakeError {
        IntakeError::resize_failed(self.source_dims, self.target_dims, self.reason)
    }
}

// =============================================================================
// ROTATION
// =============================================================================

/// Size of the axis-aligned box that contains a `width`x`height` image rotated
/// clockwise by `degrees`.
pub fn rotated_bounds(width: u32, height: u32, degrees: f32) -> (u32, u32) {
    match quarter_turns(degrees) {
        Some(0) | Some(2) => (width, height),
        Some(_) => (height, width),
        None => {
            let theta = (normalize_rotation(degrees) as f64).to_radians();
            let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
            let (w, h) = (width as f64, height as f64);
            // Trim float noise so an exact fit does not gain a pixel
            let bw = (w * cos + h * sin - 1e-6).ceil().max(1.0) as u32;
            let bh = (w * sin + h * cos - 1e-6).ceil().max(1.0) as u32;
            (bw, bh)
        }
    }
}

/// A source bitmap rotated clockwise about its centre into its rotated
/// bounding box. The box and the source share a centre; coordinates are
/// continuous, pixel `i` covering `[i, i + 1)`.
#[derive(Clone, Copy, Debug)]
pub struct RotationFrame {
    source: (f64, f64),
    bounds: (u32, u32),
    cos: f64,
    sin: f64,
    quarter: Option<u8>,
}

impl RotationFrame {
    pub fn new(width: u32, height: u32, degrees: f32) -> Self {
        let quarter = quarter_turns(degrees);
        let (sin, cos) = match quarter {
            Some(0) => (0.0, 1.0),
            Some(1) => (1.0, 0.0),
            Some(2) => (0.0, -1.0),
            Some(_) => (-1.0, 0.0),
            None => (normalize_rotation(degrees) as f64).to_radians().sin_cos(),
        };
        Self {
            source: (width as f64, height as f64),
            bounds: rotated_bounds(width, height, degrees),
            cos,
            sin,
            quarter,
        }
    }

    pub fn bounds(&self) -> (u32, u32) {
        self.bounds
    }

    /// True for multiples of 90 degrees, where the box is exactly the source.
    pub fn is_quarter_turn(&self) -> bool {
        self.quarter.is_some()
    }

    /// Map a point of the rotated box back into the source.
    pub fn to_source(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.bounds.0 as f64 / 2.0;
        let dy = y - self.bounds.1 as f64 / 2.0;
        (
            self.cos * dx + self.sin * dy + self.source.0 / 2.0,
            -self.sin * dx + self.cos * dy + self.source.1 / 2.0,
        )
    }

    /// Map a source point into the rotated box.
    pub fn to_bounds(&self, u: f64, v: f64) -> (f64, f64) {
        let du = u - self.source.0 / 2.0;
        let dv = v - self.source.1 / 2.0;
        (
            self.cos * du - self.sin * dv + self.bounds.0 as f64 / 2.0,
            self.sin * du + self.cos * dv + self.bounds.1 as f64 / 2.0,
        )
    }

    /// Half-extents, along the source axes, of an axis-aligned box rectangle.
    fn source_reach(&self, width: f64, height: f64) -> (f64, f64) {
        let (c, s) = (self.cos.abs(), self.sin.abs());
        ((width * c + height * s) / 2.0, (width * s + height * c) / 2.0)
    }

    /// How far in source space a rectangle can move when its offset is
    /// rounded to whole pixels.
    fn rounding_slack(&self) -> f64 {
        if self.is_quarter_turn() {
            0.0
        } else {
            0.5 * (self.cos.abs() + self.sin.abs())
        }
    }

    /// Largest rectangle of width:height `ratio` whose every placement
    /// after pixel rounding still lies inside the rotated source.
    pub fn inscribed_rect(&self, ratio: f64) -> (f64, f64) {
        if self.is_quarter_turn() {
            let (bw, bh) = (self.bounds.0 as f64, self.bounds.1 as f64);
            return if bw / bh > ratio {
                (bh * ratio, bh)
            } else {
                (bw, bw / ratio)
            };
        }
        let (c, s) = (self.cos.abs(), self.sin.abs());
        let slack = 2.0 * self.rounding_slack();
        let usable_w = (self.source.0 - slack).max(0.0);
        let usable_h = (self.source.1 - slack).max(0.0);
        let height = (usable_w / (ratio * c + s)).min(usable_h / (ratio * s + c));
        (height * ratio, height)
    }

    /// Move a box-space centre so a `width`x`height` rectangle around it
    /// lies inside the source. A rectangle too large for the source along an
    /// axis is centred on that axis.
    pub fn clamp_centre(&self, centre: (f64, f64), width: u32, height: u32) -> (f64, f64) {
        let (u, v) = self.to_source(centre.0, centre.1);
        let (reach_u, reach_v) = self.source_reach(width as f64, height as f64);
        let slack = self.rounding_slack();
        let clamp = |p: f64, extent: f64, reach: f64| {
            let reach = reach + slack;
            if reach * 2.0 >= extent {
                extent / 2.0
            } else {
                p.clamp(reach, extent - reach)
            }
        };
        self.to_bounds(
            clamp(u, self.source.0, reach_u),
            clamp(v, self.source.1, reach_v),
        )
    }

    /// Whether every corner of the box rectangle maps inside the source,
    /// allowing `tolerance` pixels of float error.
    pub fn contains_rect(&self, x: u32, y: u32, width: u32, height: u32, tolerance: f64) -> bool {
        let (x0, y0) = (x as f64, y as f64);
        let (x1, y1) = (x0 + width as f64, y0 + height as f64);
        [(x0, y0), (x1, y0), (x0, y1), (x1, y1)].iter().all(|&(x, y)| {
            let (u, v) = self.to_source(x, y);
            (-tolerance..=self.source.0 + tolerance).contains(&u)
                && (-tolerance..=self.source.1 + tolerance).contains(&v)
        })
    }
}

/// What a rotated raster shows where its pixel centre falls outside the source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Uncovered {
    Transparent,
    NearestEdge,
}

/// Resample the `size` region at `offset` of the rotated box.
///
/// Sample positions are clamped into the bitmap, so covered pixels only ever
/// read source pixels.
fn warp_region(
    img: &RgbaImage,
    degrees: f32,
    offset: (u32, u32),
    size: (u32, u32),
    uncovered: Uncovered,
) -> RgbaImage {
    let (src_w, src_h) = img.dimensions();
    let frame = RotationFrame::new(src_w, src_h, degrees);
    // Bilinear needs a 2x2 neighbourhood
    let interpolation = if src_w < 2 || src_h < 2 {
        Interpolation::Nearest
    } else {
        Interpolation::Bilinear
    };
    let inset = if interpolation == Interpolation::Bilinear {
        EDGE_EPSILON
    } else {
        0.0
    };
    let max_x = src_w.saturating_sub(1) as f64 - inset;
    let max_y = src_h.saturating_sub(1) as f64 - inset;
    let (sw, sh) = (src_w as f64, src_h as f64);
    let (ox, oy) = (offset.0 as f64, offset.1 as f64);

    let mapping = move |x: f32, y: f32| {
        let (u, v) = frame.to_source(ox + x as f64 + 0.5, oy + y as f64 + 0.5);
        let covered = (0.0..=sw).contains(&u) && (0.0..=sh).contains(&v);
        if !covered && uncovered == Uncovered::Transparent {
            return (-1.0, -1.0);
        }
        ((u - 0.5).clamp(0.0, max_x) as f32, (v - 0.5).clamp(0.0, max_y) as f32)
    };

    let mut out = RgbaImage::from_pixel(size.0, size.1, UNCOVERED);
    warp_into_with(img, mapping, interpolation, UNCOVERED, &mut out);
    out
}

/// Rotate clockwise into the rotated bounding box.
///
/// Right angles are exact pixel moves. Other angles resample bilinearly and
/// leave uncovered corners fully transparent.
pub fn rotate_into_bounds(img: RgbaImage, degrees: f32) -> PipelineResult<RgbaImage> {
    match quarter_turns(degrees) {
        Some(1) => Ok(imageops::rotate90(&img)),
        Some(2) => Ok(imageops::rotate180(&img)),
        Some(3) => Ok(imageops::rotate270(&img)),
        Some(_) => Ok(img),
        None => run_with_panic_policy("transform:rotate", || {
            let (w, h) = img.dimensions();
            let bounds = rotated_bounds(w, h, degrees);
            Ok(warp_region(&img, degrees, (0, 0), bounds, Uncovered::Transparent))
        }),
    }
}

// =============================================================================
// EXTRACTION
// =============================================================================

fn check_rect(
    bounds: (u32, u32),
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> PipelineResult<()> {
    if width == 0 || height == 0 {
        return Err(IntakeError::invalid_crop_dimensions(width, height));
    }
    let (img_w, img_h) = bounds;
    let fits_x = x.checked_add(width).is_some_and(|right| right <= img_w);
    let fits_y = y.checked_add(height).is_some_and(|bottom| bottom <= img_h);
    if !fits_x || !fits_y {
        return Err(IntakeError::invalid_argument(
            "crop",
            format!("{width}x{height}+{x}+{y}"),
            format!("rectangle lies outside the {img_w}x{img_h} rotated image"),
        ));
    }
    Ok(())
}

/// Copy the rectangle at (`x`, `y`) of size `width`x`height` out of `img`.
pub fn extract(
    img: &RgbaImage,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> PipelineResult<RgbaImage> {
    check_rect(img.dimensions(), x, y, width, height)?;
    Ok(imageops::crop_imm(img, x, y, width, height).to_image())
}

/// Rotate then extract: the cropped raster for a confirmed crop.
///
/// The output is exactly `spec.width` x `spec.height`. Off right angles only
/// the rectangle is resampled, and every sample is read from inside `img`.
pub fn render_crop(img: RgbaImage, spec: &CropSpec) -> PipelineResult<RgbaImage> {
    if quarter_turns(spec.rotation_degrees).is_some() {
        let rotated = rotate_into_bounds(img, spec.rotation_degrees)?;
        if spec.offset_x == 0
            && spec.offset_y == 0
            && (spec.width, spec.height) == rotated.dimensions()
        {
            return Ok(rotated);
        }
        return extract(
            &rotated,
            spec.offset_x,
            spec.offset_y,
            spec.width,
            spec.height,
        );
    }

    let (w, h) = img.dimensions();
    check_rect(
        rotated_bounds(w, h, spec.rotation_degrees),
        spec.offset_x,
        spec.offset_y,
        spec.width,
        spec.height,
    )?;
    run_with_panic_policy("transform:rotate", || {
        let mut out = warp_region(
            &img,
            spec.rotation_degrees,
            (spec.offset_x, spec.offset_y),
            (spec.width, spec.height),
            Uncovered::NearestEdge,
        );
        // Bilinear blending truncates, so an opaque 255 can come back as 254
        if img.pixels().all(|p| p.0[3] == u8::MAX) {
            out.pixels_mut().for_each(|p| p.0[3] = u8::MAX);
        }
        Ok(out)
    })
}

// =============================================================================
// DOWNSCALE
// =============================================================================

/// Calculate resize dimensions maintaining aspect ratio (fit = inside semantics)
pub fn calc_resize_dimensions(
    orig_w: u32,
    orig_h: u32,
    target_w: Option<u32>,
    target_h: Option<u32>,
) -> (u32, u32) {
    let (w, h) = match (target_w, target_h) {
        (Some(w), Some(h)) => {
            let orig_ratio = orig_w as f64 / orig_h as f64;
            let target_ratio = w as f64 / h as f64;

            if orig_ratio > target_ratio {
                // wider than the box: fit to width
                let ratio = w as f64 / orig_w as f64;
                (w, (orig_h as f64 * ratio).round() as u32)
            } else {
                let ratio = h as f64 / orig_h as f64;
                ((orig_w as f64 * ratio).round() as u32, h)
            }
        }
        (Some(w), None) => {
            let ratio = w as f64 / orig_w as f64;
            (w, (orig_h as f64 * ratio).round() as u32)
        }
        (None, Some(h)) => {
            let ratio = h as f64 / orig_h as f64;
            ((orig_w as f64 * ratio).round() as u32, h)
        }
        (None, None) => (orig_w, orig_h),
    };
    // A 5000x1 strip still needs one row
    (w.max(1), h.max(1))
}

/// Target size for the one-time downscale: unchanged when both sides already
/// fit in `max_dimension`, otherwise proportionally scaled to fit inside it.
pub fn downscale_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }
    calc_resize_dimensions(width, height, Some(max_dimension), Some(max_dimension))
}

/// Downscale so neither side exceeds `max_dimension`. Never upscales.
pub fn downscale_to_fit(img: RgbImage, max_dimension: u32) -> PipelineResult<RgbImage> {
    let (w, h) = img.dimensions();
    let (dst_w, dst_h) = downscale_dimensions(w, h, max_dimension);
    if (dst_w, dst_h) == (w, h) {
        return Ok(img);
    }
    let resized = fast_resize_owned(DynamicImage::ImageRgb8(img), dst_w, dst_h)
        .map_err(ResizeError::into_intake_error)?;
    Ok(match resized {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    })
}

/// Resize an owned image with fast_image_resize (Lanczos3), taking the pixel
/// buffer without copying for RGB8/RGBA8.
pub fn fast_resize_owned(
    img: DynamicImage,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, ResizeError> {
    let src_width = img.width();
    let src_height = img.height();

    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
        return Err(ResizeError::new(
            (src_width, src_height),
            (dst_width, dst_height),
            "invalid dimensions for resize",
        ));
    }

    let (pixel_type, src_pixels): (PixelType, Vec<u8>) = match img {
        DynamicImage::ImageRgb8(rgb) => (PixelType::U8x3, rgb.into_raw()),
        DynamicImage::ImageRgba8(rgba) => (PixelType::U8x4, rgba.into_raw()),
        other => (PixelType::U8x4, other.to_rgba8().into_raw()),
    };

    fast_resize_internal_impl(
        src_width,
        src_height,
        src_pixels,
        pixel_type,
        dst_width,
        dst_height,
        default_resize_options(),
    )
    .map_err(|reason| ResizeError::new((src_width, src_height), (dst_width, dst_height), reason))
}

fn default_resize_options() -> ResizeOptions {
    ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3))
}

/// Alpha premultiplication is only needed for RGBA.
#[inline]
fn requires_premultiply(pixel_type: PixelType) -> bool {
    matches!(pixel_type, PixelType::U8x4)
}

fn fast_resize_internal_impl(
    src_width: u32,
    src_height: u32,
    mut src_pixels: Vec<u8>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
    options: ResizeOptions,
) -> std::result::Result<DynamicImage, String> {
    let pixel_count = (src_width as usize)
        .checked_mul(src_height as usize)
        .ok_or_else(|| "image dimensions overflow during resize".to_string())?;
    let required_bytes = pixel_count
        .checked_mul(pixel_type.size())
        .ok_or_else(|| "image buffer size overflow during resize".to_string())?;

    if src_pixels.len() < required_bytes {
        return Err(format!(
            "fir source image invalid buffer size. expected {required_bytes} bytes, got {} bytes",
            src_pixels.len()
        ));
    }

    let primary_result = match fir::images::Image::from_slice_u8(
        src_width,
        src_height,
        src_pixels.as_mut_slice(),
        pixel_type,
    ) {
        Ok(src_image) => {
            resize_with_source_image(src_image, pixel_type, dst_width, dst_height, &options)
        }
        Err(ImageBufferError::InvalidBufferAlignment) => {
            let aligned_image = copy_pixels_to_aligned_image(
                src_width,
                src_height,
                pixel_type,
                &src_pixels,
                required_bytes,
            )?;
            resize_with_source_image(aligned_image, pixel_type, dst_width, dst_height, &options)
        }
        Err(other) => Err(format!("fir source image error: {other:?}")),
    };

    match primary_result {
        Ok(img) => Ok(img),
        Err(err) => {
            tracing::warn!(target: "photo_intake::compress", error = %err, "fir resize failed, using image crate");
            resize_with_image_crate_fallback(
                &src_pixels,
                src_width,
                src_height,
                pixel_type,
                dst_width,
                dst_height,
            )
            .map_err(|fallback_err| format!("{err}; image crate fallback failed: {fallback_err}"))
        }
    }
}

fn copy_pixels_to_aligned_image(
    width: u32,
    height: u32,
    pixel_type: PixelType,
    src_pixels: &[u8],
    required_bytes: usize,
) -> std::result::Result<fir::images::Image<'static>, String> {
    let mut aligned_image = fir::images::Image::new(width, height, pixel_type);
    let aligned_buffer = aligned_image.buffer_mut();
    if aligned_buffer.len() != required_bytes {
        return Err(format!(
            "fir alignment fallback buffer mismatch. expected {required_bytes} bytes, got {} bytes",
            aligned_buffer.len()
        ));
    }
    aligned_buffer.copy_from_slice(&src_pixels[..required_bytes]);
    Ok(aligned_image)
}

fn resize_with_image_crate_fallback(
    src_pixels: &[u8],
    src_width: u32,
    src_height: u32,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, String> {
    let filter = FilterType::Lanczos3;
    match pixel_type {
        PixelType::U8x3 => {
            let rgb = RgbImage::from_raw(src_width, src_height, src_pixels.to_vec())
                .ok_or_else(|| "failed to build rgb image for fallback resize".to_string())?;
            Ok(DynamicImage::ImageRgb8(imageops::resize(
                &rgb, dst_width, dst_height, filter,
            )))
        }
        PixelType::U8x4 => {
            let rgba = RgbaImage::from_raw(src_width, src_height, src_pixels.to_vec())
                .ok_or_else(|| "failed to build rgba image for fallback resize".to_string())?;
            Ok(DynamicImage::ImageRgba8(imageops::resize(
                &rgba, dst_width, dst_height, filter,
            )))
        }
        _ => Err("fallback resize supports only U8x3/U8x4 pixel types".to_string()),
    }
}

/// Skip premultiplication for opaque RGBA. Only images of at least 1 MP are
/// scanned; below that the SIMD premultiply is cheaper than the scan.
fn is_fully_opaque(image: &fir::images::Image, pixel_type: PixelType) -> bool {
    if pixel_type != PixelType::U8x4 {
        return true;
    }
    const THRESHOLD_PIXELS: u64 = 1_000_000;
    if (image.width() as u64).saturating_mul(image.height() as u64) < THRESHOLD_PIXELS {
        return false;
    }
    image.buffer().iter().skip(3).step_by(4).all(|&alpha| alpha == 255)
}

fn resize_with_source_image(
    mut src_image: fir::images::Image<'_>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
    options: &ResizeOptions,
) -> std::result::Result<DynamicImage, String> {
    let mut dst_image = fir::images::Image::new(dst_width, dst_height, pixel_type);

    let needs_premultiply =
        requires_premultiply(pixel_type) && !is_fully_opaque(&src_image, pixel_type);

    let mul_div = MulDiv::default();
    if needs_premultiply {
        mul_div
            .multiply_alpha_inplace(&mut src_image)
            .map_err(|e| format!("failed to premultiply alpha: {e}"))?;
    }

    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, options)
        .map_err(|e| format!("fir resize error: {e:?}"))?;

    if needs_premultiply {
        mul_div
            .divide_alpha_inplace(&mut dst_image)
            .map_err(|e| format!("failed to unpremultiply alpha: {e}"))?;
    }

    let dst_pixels = dst_image.into_vec();
    match pixel_type {
        PixelType::U8x3 => {
            let rgb_image = RgbImage::from_raw(dst_width, dst_height, dst_pixels)
                .ok_or("failed to create rgb image from resized data")?;
            Ok(DynamicImage::ImageRgb8(rgb_image))
        }
        PixelType::U8x4 => {
            let rgba_image = RgbaImage::from_raw(dst_width, dst_height, dst_pixels)
                .ok_or("failed to create rgba image from resized data")?;
            Ok(DynamicImage::ImageRgba8(rgba_image))
        }
        _ => Err("unsupported pixel type after resize".to_string()),
    }
}
