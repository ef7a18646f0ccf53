// src/engine/decoder.rs
//
// Decoder operations: JPEG (mozjpeg), PNG (zune-png), WebP (libwebp), the rest
// through the image crate. Turns a RawImageSource into an owned RGBA bitmap.

use crate::engine::common::run_with_panic_policy;
use crate::engine::io::{PickedFile, RawImageSource};
use crate::engine::{MAX_DECODE_DIMENSION, MAX_PIXELS};
use crate::error::IntakeError;
use crate::ops::PipelineConfig;
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use mozjpeg::Decompress;
use std::borrow::Cow;
use std::io::Cursor;
use tracing::debug;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_png::PngDecoder;

// Keep IntakeError end to end so decode failures stay classified
// (CodecError vs ResourceLimit) instead of collapsing into InternalBug.
type DecoderResult<T> = std::result::Result<T, IntakeError>;

/// Where a decoded bitmap came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BitmapOrigin {
    File {
        name: Option<String>,
        byte_len: u64,
        /// Source exceeded the configured large-file threshold. Informational.
        large: bool,
    },
    Camera,
}

/// Owned RGBA pixel grid handed to the crop stage.
#[derive(Clone, Debug)]
pub struct DecodedBitmap {
    pixels: RgbaImage,
    origin: BitmapOrigin,
}

impl DecodedBitmap {
    pub fn new(pixels: RgbaImage, origin: BitmapOrigin) -> Self {
        Self { pixels, origin }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn origin(&self) -> &BitmapOrigin {
        &self.origin
    }

    pub fn is_large_file(&self) -> bool {
        matches!(self.origin, BitmapOrigin::File { large: true, .. })
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_pixels(self) -> RgbaImage {
        self.pixels
    }
}

/// Decode any raw source into a bitmap.
///
/// Picked files are checked against the decode-bomb limits before the full
/// decode and have their EXIF orientation applied. Camera frames are already
/// pixels and pass straight through.
pub fn decode_source(
    source: RawImageSource,
    config: &PipelineConfig,
) -> DecoderResult<DecodedBitmap> {
    match source {
        RawImageSource::Frame(frame) => {
            let pixels = frame.into_pixels();
            check_dimensions(pixels.width(), pixels.height())?;
            Ok(DecodedBitmap::new(pixels, BitmapOrigin::Camera))
        }
        RawImageSource::File(file) => decode_picked_file(&file, config),
    }
}

fn decode_picked_file(file: &PickedFile, config: &PipelineConfig) -> DecoderResult<DecodedBitmap> {
    let bytes: Cow<'_, [u8]> = match file.source().as_bytes() {
        Some(bytes) => Cow::Borrowed(bytes),
        None => Cow::Owned(file.source().load()?.to_vec()),
    };
    if bytes.is_empty() {
        return Err(IntakeError::EmptySource);
    }

    let byte_len = bytes.len() as u64;
    let large = byte_len > config.large_file_threshold_bytes;
    if large {
        debug!(
            target: "photo_intake::session",
            byte_len,
            threshold = config.large_file_threshold_bytes,
            "picked file is larger than the warning threshold"
        );
    }

    ensure_dimensions_safe(&bytes)?;
    let (img, format) = decode_image(&bytes)?;
    let img = match detect_exif_orientation(&bytes) {
        Some(orientation) if orientation != 1 => apply_exif_orientation(img, orientation),
        _ => img,
    };
    debug!(
        target: "photo_intake::session",
        format = ?format,
        width = img.width(),
        height = img.height(),
        "decoded picked file"
    );

    Ok(DecodedBitmap::new(
        img.into_rgba8(),
        BitmapOrigin::File {
            name: file.name().map(str::to_string),
            byte_len,
            large,
        },
    ))
}

/// Decode JPEG using mozjpeg (backed by libjpeg-turbo)
pub fn decode_jpeg_mozjpeg(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:mozjpeg", || {
        if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
            return Err(IntakeError::decode_failed("mozjpeg: missing JPEG EOI marker"));
        }

        let decompress = Decompress::new_mem(data).map_err(|e| {
            IntakeError::decode_failed(format!("mozjpeg decompress init failed: {e:?}"))
        })?;
        let mut decompress = decompress.rgb().map_err(|e| {
            IntakeError::decode_failed(format!("mozjpeg rgb conversion failed: {e:?}"))
        })?;

        let width = decompress.width();
        let height = decompress.height();
        if width > MAX_DECODE_DIMENSION as usize || height > MAX_DECODE_DIMENSION as usize {
            return Err(IntakeError::dimension_exceeds_limit(
                width.max(height).min(u32::MAX as usize) as u32,
                MAX_DECODE_DIMENSION,
            ));
        }
        let width_u32 = width as u32;
        let height_u32 = height as u32;
        check_dimensions(width_u32, height_u32)?;

        let pixels: Vec<[u8; 3]> = decompress.read_scanlines().map_err(|e| {
            IntakeError::decode_failed(format!("mozjpeg: failed to read scanlines: {e:?}"))
        })?;
        let flat_pixels: Vec<u8> = pixels.into_iter().flatten().collect();

        let rgb_image = RgbImage::from_raw(width_u32, height_u32, flat_pixels).ok_or_else(|| {
            IntakeError::decode_failed("mozjpeg: failed to create image from raw data")
        })?;

        Ok(DynamicImage::ImageRgb8(rgb_image))
    })
}

/// Decode anything else through the image crate under the panic policy.
pub fn decode_with_image_crate(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:image", || {
        image::load_from_memory(data)
            .map_err(|e| IntakeError::decode_failed(format!("decode failed: {e}")))
    })
}

/// Decode PNG using zune-png. 16-bit input is stripped to 8-bit.
pub fn decode_png_zune(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:png", || {
        let options = DecoderOptions::default().png_set_strip_to_8bit(true);
        let mut decoder = PngDecoder::new_with_options(ZCursor::new(data), options);
        let pixels = decoder
            .decode()
            .map_err(|e| IntakeError::decode_failed(format!("png: decode failed: {e}")))?;

        let info = decoder
            .info()
            .ok_or_else(|| IntakeError::decode_failed("png: missing header info"))?;
        let width = info.width as u32;
        let height = info.height as u32;
        check_dimensions(width, height)?;

        let buf = match pixels {
            zune_core::result::DecodingResult::U8(v) => v,
            _ => return Err(IntakeError::decode_failed("png: unexpected non-U8 pixel buffer")),
        };

        let colorspace = decoder
            .colorspace()
            .ok_or_else(|| IntakeError::decode_failed("png: missing colorspace"))?;

        let img = match colorspace {
            ColorSpace::RGB => RgbImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| IntakeError::decode_failed("png: failed to build RGB image"))?,
            ColorSpace::RGBA => RgbaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(|| IntakeError::decode_failed("png: failed to build RGBA image"))?,
            ColorSpace::Luma => GrayImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| IntakeError::decode_failed("png: failed to build Luma image"))?,
            ColorSpace::LumaA => GrayAlphaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLumaA8)
                .ok_or_else(|| IntakeError::decode_failed("png: failed to build LumaA image"))?,
            other => {
                return Err(IntakeError::decode_failed(format!(
                    "png: unsupported colorspace {other:?}"
                )))
            }
        };

        Ok(img)
    })
}

/// Decode WebP using libwebp. Animated WebP falls back to the image crate,
/// which yields the first frame.
pub fn decode_webp_libwebp(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        // Parse the header first so malformed files cannot request huge buffers
        let features = BitstreamFeatures::new(data)
            .ok_or_else(|| IntakeError::decode_failed("webp: failed to read bitstream features"))?;

        check_dimensions(features.width(), features.height())?;

        if features.has_animation() {
            return image::load_from_memory(data).map_err(|e| {
                IntakeError::decode_failed(format!("webp (animated) decode failed: {e}"))
            });
        }

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| IntakeError::decode_failed("webp: decode failed"))?;
        check_dimensions(decoded.width(), decoded.height())?;

        Ok(decoded.to_image())
    })
}

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Detect the format once and route to the fastest decoder for it.
pub fn decode_image(bytes: &[u8]) -> DecoderResult<(DynamicImage, Option<ImageFormat>)> {
    let detected = detect_format(bytes);
    let img = match detected {
        Some(ImageFormat::Jpeg) => decode_jpeg_mozjpeg(bytes)?,
        Some(ImageFormat::Png) => decode_png_zune(bytes)?,
        Some(ImageFormat::WebP) => decode_webp_libwebp(bytes)?,
        Some(_) => decode_with_image_crate(bytes)?,
        None => return Err(IntakeError::unsupported_format("unknown (no magic bytes matched)")),
    };
    Ok((img, detected))
}

/// Reject decompression bombs by declared size.
pub fn check_dimensions(width: u32, height: u32) -> DecoderResult<()> {
    if width == 0 || height == 0 {
        return Err(IntakeError::decode_failed(format!(
            "image has a zero dimension ({width}x{height})"
        )));
    }
    if width > MAX_DECODE_DIMENSION || height > MAX_DECODE_DIMENSION {
        return Err(IntakeError::dimension_exceeds_limit(
            width.max(height),
            MAX_DECODE_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(IntakeError::pixel_count_exceeds_limit(pixels, MAX_PIXELS));
    }
    Ok(())
}

/// Read only the header and check its dimensions before a full decode.
/// Headers the image crate cannot parse are left for the decoder to reject.
pub fn ensure_dimensions_safe(bytes: &[u8]) -> DecoderResult<()> {
    let cursor = Cursor::new(bytes);
    if let Ok(reader) = ImageReader::new(cursor).with_guessed_format() {
        if let Ok((width, height)) = reader.into_dimensions() {
            return check_dimensions(width, height);
        }
    }
    Ok(())
}

/// Extract EXIF Orientation tag (1-8). Returns None if missing or invalid.
pub fn detect_exif_orientation(bytes: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let orientation = field.value.get_uint(0)? as u16;
    if (1..=8).contains(&orientation) {
        Some(orientation)
    } else {
        None
    }
}

/// Apply an EXIF orientation so the bitmap is upright.
pub fn apply_exif_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        // transpose
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        // transverse
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::camera::CapturedFrame;
    use image::{GenericImageView, Rgb, Rgba};

    fn encode_webp(width: u32, height: u32) -> Vec<u8> {
        let rgb: Vec<u8> = std::iter::repeat([10u8, 20u8, 30u8])
            .take((width * height) as usize)
            .flatten()
            .collect();
        webp::Encoder::from_rgb(&rgb, width, height)
            .encode_lossless()
            .to_vec()
    }

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |_, _| Rgb([0, 0, 0]));
        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn encode_jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([9, 8, 7])))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    #[test]
    fn test_ensure_dimensions_safe_allows_small_image() {
        assert!(ensure_dimensions_safe(&encode_png(64, 64)).is_ok());
    }

    #[test]
    fn test_ensure_dimensions_safe_rejects_large_image() {
        let data = encode_png(MAX_DECODE_DIMENSION + 1, 1);
        let err = ensure_dimensions_safe(&data).unwrap_err();
        assert!(matches!(err, IntakeError::DimensionExceedsLimit { .. }));
    }

    #[test]
    fn test_check_dimensions_pixel_budget() {
        assert!(check_dimensions(10_000, 10_000).is_ok());
        let err = check_dimensions(20_000, 20_000).unwrap_err();
        assert!(matches!(err, IntakeError::PixelCountExceedsLimit { .. }));
        assert!(check_dimensions(0, 5).is_err());
    }

    #[test]
    fn test_decode_image_routes_by_format() {
        let (img, fmt) = decode_image(&encode_png(2, 2)).unwrap();
        assert_eq!(fmt, Some(ImageFormat::Png));
        assert_eq!(img.dimensions(), (2, 2));

        let (img, fmt) = decode_image(&encode_jpeg(2, 2)).unwrap();
        assert_eq!(fmt, Some(ImageFormat::Jpeg));
        assert_eq!(img.dimensions(), (2, 2));
    }

    #[test]
    fn test_decode_image_routes_webp_to_libwebp() {
        let (img, fmt) = decode_image(&encode_webp(3, 2)).unwrap();
        assert_eq!(fmt, Some(ImageFormat::WebP));
        assert_eq!(img.to_rgb8().get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn test_decode_image_rejects_garbage() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, IntakeError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_truncated_jpeg_fails_as_codec_error() {
        let mut jpeg = encode_jpeg(16, 16);
        jpeg.truncate(jpeg.len() / 2);
        let err = decode_image(&jpeg).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::CodecError);
    }

    #[test]
    fn test_exif_orientation_swaps_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 2));
        assert_eq!(apply_exif_orientation(img.clone(), 6).dimensions(), (2, 4));
        assert_eq!(apply_exif_orientation(img.clone(), 8).dimensions(), (2, 4));
        assert_eq!(apply_exif_orientation(img.clone(), 3).dimensions(), (4, 2));
        assert_eq!(apply_exif_orientation(img, 1).dimensions(), (4, 2));
    }

    #[test]
    fn test_exif_transpose_moves_corner() {
        let mut rgb = RgbImage::new(3, 2);
        rgb.put_pixel(2, 0, Rgb([255, 0, 0]));
        let out = apply_exif_orientation(DynamicImage::ImageRgb8(rgb), 5).to_rgb8();
        // transpose maps (x, y) to (y, x)
        assert_eq!(out.get_pixel(0, 2).0, [255, 0, 0]);
    }

    #[test]
    fn test_no_exif_in_plain_png() {
        assert_eq!(detect_exif_orientation(&encode_png(2, 2)), None);
    }

    #[test]
    fn test_decode_source_flags_large_files() {
        let bytes = encode_png(32, 32);
        let config = PipelineConfig {
            large_file_threshold_bytes: 1,
            ..PipelineConfig::default()
        };
        let file = PickedFile::from_bytes(bytes, Some("gift.png".into()));
        let bitmap = decode_source(file.into(), &config).unwrap();
        assert_eq!(bitmap.dimensions(), (32, 32));
        assert!(bitmap.is_large_file());
        match bitmap.origin() {
            BitmapOrigin::File { name, .. } => assert_eq!(name.as_deref(), Some("gift.png")),
            other => panic!("unexpected origin {other:?}"),
        }
    }

    #[test]
    fn test_decode_source_passes_camera_frames_through() {
        let frame = CapturedFrame::new(RgbaImage::from_pixel(5, 3, Rgba([1, 2, 3, 255])));
        let bitmap = decode_source(frame.into(), &PipelineConfig::default()).unwrap();
        assert_eq!(bitmap.origin(), &BitmapOrigin::Camera);
        assert_eq!(bitmap.pixels().get_pixel(4, 2).0, [1, 2, 3, 255]);
    }

    #[test]
    fn test_decode_source_empty_bytes() {
        let file = PickedFile::from_bytes(Vec::new(), None);
        let err = decode_source(file.into(), &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, IntakeError::EmptySource));
    }
}
