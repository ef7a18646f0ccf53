// tests/edge_cases.rs
//
// Edge case tests for photo-intake
// Boundary sizes, corrupt inputs, configuration limits and error handling

use image::{Rgba, RgbaImage};
use photo_intake::engine::{
    compress, encode_jpeg, CancelToken, CapturedFrame, Compressor, IntakeSession, PickedFile,
    RawImageSource, MAX_DECODE_DIMENSION,
};
use photo_intake::error::{ErrorCategory, IntakeError};
use photo_intake::ops::{PipelineConfig, Quality, UploadPreset};
use std::io::Write;

fn create_test_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    })
}

fn create_valid_jpeg(width: u32, height: u32) -> Vec<u8> {
    let rgb = image::DynamicImage::ImageRgba8(create_test_image(width, height)).into_rgb8();
    encode_jpeg(&rgb, Quality::from_percent(80), false).unwrap()
}

fn create_png(img: &RgbaImage) -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn pick(session: &mut IntakeSession, bytes: Vec<u8>) -> Result<(), IntakeError> {
    session.pick_file(PickedFile::from_bytes(bytes, None))
}

mod minimal_image_tests {
    use super::*;

    #[test]
    fn test_1x1_pick_to_artifact() {
        let mut session = IntakeSession::new(PipelineConfig::default()).unwrap();
        pick(&mut session, create_valid_jpeg(1, 1)).unwrap();
        let artifact = session.confirm().unwrap();
        assert_eq!(artifact.dimensions(), (1, 1));
        assert!(artifact.within_budget());
    }

    #[test]
    fn test_1x1_rotated_crop() {
        let mut session = IntakeSession::new(PipelineConfig::default()).unwrap();
        pick(&mut session, create_png(&create_test_image(1, 1))).unwrap();
        session.crop_mut().unwrap().set_rotation(45.0);
        let artifact = session.confirm().unwrap();
        let (w, h) = artifact.dimensions();
        assert!(w >= 1 && w == h);
    }

    #[test]
    fn test_extreme_strip_crops_to_one_pixel_square() {
        let mut session = IntakeSession::new(PipelineConfig::default()).unwrap();
        pick(&mut session, create_png(&create_test_image(4000, 1))).unwrap();
        assert_eq!(session.crop().unwrap().spec().width, 1);
        let artifact = session.confirm().unwrap();
        assert_eq!(artifact.dimensions(), (1, 1));
    }
}

mod large_image_tests {
    use super::*;

    #[test]
    fn test_exceed_max_dimension_header() {
        let img = RgbaImage::new(MAX_DECODE_DIMENSION + 1, 1);
        let mut session = IntakeSession::new(PipelineConfig::default()).unwrap();
        let err = pick(&mut session, create_png(&img)).unwrap_err();
        assert!(matches!(err, IntakeError::DimensionExceedsLimit { .. }));
        assert_eq!(err.category(), ErrorCategory::ResourceLimit);
        assert_eq!(session.state_name(), "idle");
    }

    #[test]
    fn test_oversized_camera_frame_rejected() {
        let frame = CapturedFrame::new(RgbaImage::new(MAX_DECODE_DIMENSION + 1, 1));
        let config = PipelineConfig::default();
        let err =
            photo_intake::engine::decode_source(RawImageSource::from(frame), &config).unwrap_err();
        assert!(matches!(err, IntakeError::DimensionExceedsLimit { .. }));
    }

    #[test]
    fn test_small_file_is_not_flagged_large() {
        let mut session = IntakeSession::new(PipelineConfig::default()).unwrap();
        pick(&mut session, create_valid_jpeg(32, 32)).unwrap();
        assert!(!session.crop().unwrap().bitmap().is_large_file());
    }

    #[test]
    fn test_exactly_max_dimension_is_not_downscaled() {
        let config = PipelineConfig::default().with_target_size(u64::MAX);
        let compressor = Compressor::new(config).unwrap();
        let (artifact, report) = compressor
            .compress_with_report(create_test_image(1200, 300), &CancelToken::new())
            .unwrap();
        assert!(!report.downscaled);
        assert_eq!(artifact.dimensions(), (1200, 300));
    }
}

mod corrupted_image_tests {
    use super::*;

    #[test]
    fn test_jpeg_header_only() {
        let mut session = IntakeSession::new(PipelineConfig::default()).unwrap();
        let err = pick(&mut session, vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::CodecError);
        assert_eq!(err.user_message(), "Failed to process image.");
        assert_eq!(session.state_name(), "idle");
    }

    #[test]
    fn test_truncated_jpeg() {
        let data = create_valid_jpeg(64, 64);
        let mut session = IntakeSession::new(PipelineConfig::default()).unwrap();
        assert!(pick(&mut session, data[..data.len() / 3].to_vec()).is_err());
        assert!(session.crop().is_none());
    }

    #[test]
    fn test_wrong_magic_bytes() {
        let mut session = IntakeSession::new(PipelineConfig::default()).unwrap();
        let err = pick(&mut session, b"GIF00a not really".to_vec()).unwrap_err();
        assert!(matches!(err, IntakeError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_empty_buffer() {
        let mut session = IntakeSession::new(PipelineConfig::default()).unwrap();
        let err = pick(&mut session, Vec::new()).unwrap_err();
        assert!(matches!(err, IntakeError::EmptySource));
    }

    #[test]
    fn test_random_binary() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(31) % 251) as u8).collect();
        let mut session = IntakeSession::new(PipelineConfig::default()).unwrap();
        assert!(pick(&mut session, data).is_err());
        assert_eq!(session.state_name(), "idle");
    }
}

mod file_source_tests {
    use super::*;

    #[test]
    fn test_mapped_file_pick() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&create_valid_jpeg(48, 32)).unwrap();
        let picked = PickedFile::open(file.path()).unwrap();
        assert!(picked.name().is_some());

        let mut session = IntakeSession::new(PipelineConfig::default()).unwrap();
        session.pick_file(picked).unwrap();
        assert_eq!(session.crop().unwrap().bitmap().dimensions(), (48, 32));
    }

    #[test]
    fn test_lazy_path_pick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gift.jpg");
        std::fs::write(&path, create_valid_jpeg(20, 20)).unwrap();

        let mut session = IntakeSession::new(PipelineConfig::default()).unwrap();
        session.pick_file(PickedFile::lazy(&path)).unwrap();
        assert_eq!(session.crop().unwrap().bitmap().dimensions(), (20, 20));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jpg");
        assert!(matches!(
            PickedFile::open(&path).unwrap_err(),
            IntakeError::FileNotFound { .. }
        ));

        let mut session = IntakeSession::new(PipelineConfig::default()).unwrap();
        let err = session.pick_file(PickedFile::lazy(&path)).unwrap_err();
        assert!(matches!(err, IntakeError::FileNotFound { .. }));
        assert_eq!(session.state_name(), "idle");
    }

    #[test]
    fn test_empty_file_mapping() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            PickedFile::open(file.path()).unwrap_err(),
            IntakeError::EmptySource
        ));
    }
}

mod quality_boundary_tests {
    use super::*;

    #[test]
    fn test_one_byte_budget_accepts_floor() {
        let config = PipelineConfig::default().with_target_size(1);
        let compressor = Compressor::new(config).unwrap();
        let (artifact, report) = compressor
            .compress_with_report(create_test_image(64, 64), &CancelToken::new())
            .unwrap();
        assert_eq!(artifact.quality().percent(), 10);
        assert!(!artifact.within_budget());
        assert_eq!(report.attempts.len(), 9);
        assert!(!report.metrics.within_budget);
    }

    #[test]
    fn test_start_equals_floor() {
        let config = PipelineConfig::default()
            .with_quality(0.5, 0.5)
            .with_target_size(1);
        let compressor = Compressor::new(config).unwrap();
        let (artifact, report) = compressor
            .compress_with_report(create_test_image(16, 16), &CancelToken::new())
            .unwrap();
        assert_eq!(artifact.quality().percent(), 50);
        assert_eq!(report.attempts.len(), 1);
    }

    #[test]
    fn test_quality_100_start() {
        let config = PipelineConfig::default().with_quality(1.0, 0.1);
        let artifact = compress(create_test_image(16, 16), &config, &CancelToken::new()).unwrap();
        assert_eq!(artifact.quality().percent(), 100);
    }

    #[test]
    fn test_quality_out_of_range() {
        assert!(Quality::from_fraction(0.0).is_err());
        assert!(Quality::from_fraction(1.01).is_err());
        assert!(Quality::from_fraction(f32::NAN).is_err());
        assert_eq!(Quality::from_percent(0).percent(), 1);
        assert_eq!(Quality::from_percent(200).percent(), 100);
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_start_below_floor_rejected() {
        let config = PipelineConfig::default().with_quality(0.2, 0.6);
        let err = IntakeSession::new(config).unwrap_err();
        assert!(matches!(err, IntakeError::InvalidConfig { .. }));
    }

    #[test]
    fn test_json_defaults_fill_missing_fields() {
        let config = PipelineConfig::from_json(r#"{"target_size_bytes": 503316}"#).unwrap();
        assert_eq!(config.target_size_bytes, 503_316);
        assert_eq!(config.max_dimension, 1200);
        assert_eq!(config.max_images, 5);
    }

    #[test]
    fn test_json_rejects_bad_values() {
        assert!(PipelineConfig::from_json(r#"{"quality_step": 0}"#).is_err());
        assert!(PipelineConfig::from_json(r#"{"filename_prefix": "a/b"}"#).is_err());
        assert!(PipelineConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_unknown_preset() {
        let err = "poster".parse::<UploadPreset>().unwrap_err();
        assert!(matches!(err, IntakeError::InvalidPreset { .. }));
        assert_eq!("Social".parse::<UploadPreset>().unwrap(), UploadPreset::Review);
    }

    #[test]
    fn test_non_finite_crop_input_ignored() {
        let mut session = IntakeSession::new(PipelineConfig::default()).unwrap();
        pick(&mut session, create_png(&create_test_image(50, 50))).unwrap();
        let crop = session.crop_mut().unwrap();
        let before = crop.spec();
        crop.set_zoom(f32::NAN);
        crop.set_rotation(f32::NEG_INFINITY);
        crop.pan(f64::NAN, 3.0);
        assert_eq!(crop.spec(), before);
    }
}
