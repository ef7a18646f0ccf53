// src/engine/encoder.rs
//
// Encoder operations: alpha flattening and JPEG (mozjpeg) at a given quality.
// The Encode trait is the seam the compressor drives.

use crate::engine::common::run_with_panic_policy;
use crate::engine::MAX_DECODE_DIMENSION;
use crate::error::IntakeError;
use crate::ops::{OutputFormat, Quality};
use image::{Rgb, RgbImage, RgbaImage};
use mozjpeg::{ColorSpace, Compress, ScanMode};

// Keep IntakeError end to end so encode errors stay classified as CodecError
type EncoderResult<T> = std::result::Result<T, IntakeError>;

/// One encode attempt at a fixed quality.
pub trait Encode: Send + Sync {
    fn format(&self) -> OutputFormat;

    fn encode(&self, img: &RgbImage, quality: Quality) -> EncoderResult<Vec<u8>>;
}

/// Baseline mozjpeg settings for artifact encoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct MozJpegEncoder {
    /// Skip Huffman/scan optimisation. Larger output, faster encode.
    pub fast_mode: bool,
}

impl MozJpegEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fast() -> Self {
        Self { fast_mode: true }
    }
}

impl Encode for MozJpegEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Jpeg
    }

    fn encode(&self, img: &RgbImage, quality: Quality) -> EncoderResult<Vec<u8>> {
        encode_jpeg(img, quality, self.fast_mode)
    }
}

/// Composite RGBA over an opaque background colour.
///
/// JPEG has no alpha; transparent rotation corners would otherwise come out
/// black.
pub fn flatten_alpha(img: &RgbaImage, background: [u8; 3]) -> RgbImage {
    let (w, h) = img.dimensions();
    let mut out = RgbImage::new(w, h);
    for (dst, src) in out.pixels_mut().zip(img.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = match a {
            255 => Rgb([r, g, b]),
            0 => Rgb(background),
            _ => {
                let a = a as u32;
                let blend = |fg: u8, bg: u8| ((fg as u32 * a + bg as u32 * (255 - a) + 127) / 255) as u8;
                Rgb([
                    blend(r, background[0]),
                    blend(g, background[1]),
                    blend(b, background[2]),
                ])
            }
        };
    }
    out
}

/// Smoothing grows as quality drops; it hides blocking the ladder's low rungs
/// would otherwise show.
fn smoothing_factor(quality: u8) -> u8 {
    match quality {
        90..=u8::MAX => 0,
        70..=89 => 5,
        60..=69 => 10,
        _ => 18,
    }
}

/// Encode RGB8 to JPEG with mozjpeg.
pub fn encode_jpeg(img: &RgbImage, quality: Quality, fast_mode: bool) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let (w, h) = img.dimensions();
        let pixels: &[u8] = img.as_raw();

        if w == 0 || h == 0 {
            return Err(IntakeError::encode_failed(
                "jpeg",
                format!("invalid image dimensions {w}x{h}"),
            ));
        }
        if w > MAX_DECODE_DIMENSION || h > MAX_DECODE_DIMENSION {
            return Err(IntakeError::dimension_exceeds_limit(
                w.max(h),
                MAX_DECODE_DIMENSION,
            ));
        }
        let expected_len = (w as usize) * (h as usize) * 3;
        if pixels.len() != expected_len {
            return Err(IntakeError::encode_failed(
                "jpeg",
                format!("pixel buffer is {} bytes, expected {expected_len}", pixels.len()),
            ));
        }

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(quality.percent() as f32);
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_progressive_mode();

        if fast_mode {
            comp.set_optimize_coding(false);
            comp.set_optimize_scans(false);
        } else {
            comp.set_optimize_coding(true);
            comp.set_optimize_scans(true);
            comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
        }
        comp.set_smoothing_factor(smoothing_factor(quality.percent()));

        let estimated_size = (w as usize * h as usize * 3 / 10).max(4096);
        let mut output = Vec::with_capacity(estimated_size);

        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                IntakeError::encode_failed("jpeg", format!("mozjpeg: failed to start compress: {e:?}"))
            })?;

            let stride = w as usize * 3;
            for row in pixels.chunks(stride) {
                writer.write_scanlines(row).map_err(|e| {
                    IntakeError::encode_failed(
                        "jpeg",
                        format!("mozjpeg: failed to write scanlines: {e:?}"),
                    )
                })?;
            }

            writer.finish().map_err(|e| {
                IntakeError::encode_failed("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
            })?;
        }

        Ok(output)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn create_test_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        })
    }

    #[test]
    fn test_encode_jpeg_produces_valid_jpeg() {
        let img = create_test_image(100, 100);
        let data = encode_jpeg(&img, Quality::from_percent(80), false).unwrap();
        assert_eq!(&data[0..2], &[0xFF, 0xD8]);
        assert_eq!(&data[data.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_encode_jpeg_quality_affects_size() {
        let img = create_test_image(200, 200);
        let high = encode_jpeg(&img, Quality::from_percent(90), false).unwrap();
        let low = encode_jpeg(&img, Quality::from_percent(10), false).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_encode_jpeg_fast_mode_produces_valid_jpeg() {
        let img = create_test_image(64, 64);
        let data = MozJpegEncoder::fast()
            .encode(&img, Quality::from_percent(70))
            .unwrap();
        assert_eq!(&data[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_encoded_jpeg_decodes_to_same_size() {
        let img = create_test_image(37, 21);
        let data = MozJpegEncoder::new()
            .encode(&img, Quality::from_percent(50))
            .unwrap();
        let decoded = image::load_from_memory(&data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (37, 21));
    }

    #[test]
    fn test_encode_rejects_empty_image() {
        let img = RgbImage::new(0, 0);
        let err = encode_jpeg(&img, Quality::from_percent(50), false).unwrap_err();
        assert!(matches!(err, IntakeError::EncodeFailed { .. }));
    }

    #[test]
    fn test_flatten_alpha_blends_onto_background() {
        let mut img = RgbaImage::new(3, 1);
        img.put_pixel(0, 0, Rgba([10, 20, 30, 255]));
        img.put_pixel(1, 0, Rgba([0, 0, 0, 0]));
        img.put_pixel(2, 0, Rgba([0, 0, 0, 128]));
        let out = flatten_alpha(&img, [255, 255, 255]);
        assert_eq!(out.get_pixel(0, 0).0, [10, 20, 30]);
        assert_eq!(out.get_pixel(1, 0).0, [255, 255, 255]);
        // half-transparent black over white is mid grey
        let grey = out.get_pixel(2, 0).0[0];
        assert!((126..=128).contains(&grey));
    }

    #[test]
    fn test_smoothing_bands() {
        assert_eq!(smoothing_factor(100), 0);
        assert_eq!(smoothing_factor(90), 0);
        assert_eq!(smoothing_factor(80), 5);
        assert_eq!(smoothing_factor(60), 10);
        assert_eq!(smoothing_factor(10), 18);
    }
}
