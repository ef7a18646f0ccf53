use image::{Rgb, RgbImage, Rgba, RgbaImage};
use photo_intake::engine::{
    downscale_dimensions, recompress, BitmapOrigin, CancelToken, Compressor, CropSession,
    DecodedBitmap, Encode, QualityLadder,
};
use photo_intake::error::IntakeError;
use photo_intake::ops::{AspectRatio, OutputFormat, PipelineConfig, Quality};
use proptest::prelude::*;
use std::sync::Arc;

fn create_test_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    })
}

/// Size falls linearly with quality: `per_point * quality%`.
struct LinearEncoder {
    per_point: usize,
}

impl Encode for LinearEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Jpeg
    }

    fn encode(&self, _img: &RgbImage, quality: Quality) -> Result<Vec<u8>, IntakeError> {
        Ok(vec![0; self.per_point * quality.percent() as usize])
    }
}

#[derive(Debug, Clone)]
enum CropEdit {
    Zoom(f32),
    Rotate(f32),
    Pan(f64, f64),
}

fn crop_edit_strategy() -> impl Strategy<Value = CropEdit> {
    prop_oneof![
        (-1.0f32..5.0).prop_map(CropEdit::Zoom),
        (-720.0f32..720.0).prop_map(CropEdit::Rotate),
        (-500.0f64..500.0, -500.0f64..500.0).prop_map(|(dx, dy)| CropEdit::Pan(dx, dy)),
    ]
}

fn quality_pair_strategy() -> impl Strategy<Value = (u8, u8, u8)> {
    (1u8..=100)
        .prop_flat_map(|q0| (Just(q0), 1u8..=q0, 1u8..=50))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_ladder_terminates_within_bounds((q0, floor, step) in quality_pair_strategy()) {
        let initial = Quality::from_percent(q0);
        let min = Quality::from_percent(floor);
        let rungs: Vec<u8> = QualityLadder::new(initial, min, step)
            .map(|q| q.percent())
            .collect();

        prop_assert_eq!(rungs.first().copied(), Some(q0));
        prop_assert_eq!(rungs.last().copied(), Some(floor));
        prop_assert!(rungs.windows(2).all(|w| w[0] > w[1]));
        prop_assert!(rungs.iter().all(|&q| (floor..=q0).contains(&q)));
        prop_assert_eq!(rungs.len(), QualityLadder::max_attempts(initial, min, step));
    }

    #[test]
    fn prop_compression_meets_budget_or_floor(
        (q0, floor, step) in quality_pair_strategy(),
        per_point in 1usize..=500,
        target in 1u64..=60_000,
    ) {
        let config = PipelineConfig::default()
            .with_quality(q0 as f32 / 100.0, floor as f32 / 100.0)
            .with_target_size(target);
        let config = PipelineConfig { quality_step: step as f32 / 100.0, ..config };
        let compressor = Compressor::new(config)
            .unwrap()
            .with_encoder(Arc::new(LinearEncoder { per_point }));

        let (artifact, report) = compressor
            .compress_with_report(create_test_image(4, 4), &CancelToken::new())
            .unwrap();
        let q = artifact.quality().percent();

        prop_assert!((floor..=q0).contains(&q));
        prop_assert!(artifact.size_bytes() <= target || q == floor);
        prop_assert_eq!(artifact.within_budget(), artifact.size_bytes() <= target);
        prop_assert!(report.attempts.len() <= QualityLadder::max_attempts(
            Quality::from_percent(q0),
            Quality::from_percent(floor),
            step,
        ));
    }

    #[test]
    fn prop_downscale_fits_and_keeps_aspect(
        w in 1u32..=6000,
        h in 1u32..=6000,
        max in 16u32..=2000,
    ) {
        let (dw, dh) = downscale_dimensions(w, h, max);
        prop_assert!(dw <= max && dh <= max);
        prop_assert!(dw <= w && dh <= h);
        if w <= max && h <= max {
            prop_assert_eq!((dw, dh), (w, h));
        } else {
            // the longer side lands exactly on the limit
            prop_assert_eq!(dw.max(dh), max);
            // a 6000x1 strip still keeps one row, so only check real aspects
            if dw.min(dh) < 2 {
                return Ok(());
            }
            let before = w as f64 / h as f64;
            let after = dw as f64 / dh as f64;
            let tolerance = 1.0 / dw.min(dh) as f64 + 1e-9;
            prop_assert!((before / after - 1.0).abs() <= tolerance * 1.5);
        }
    }

    #[test]
    fn prop_crop_rect_stays_inside_source(
        w in 8u32..=96,
        h in 8u32..=96,
        edits in prop::collection::vec(crop_edit_strategy(), 0..12),
    ) {
        let bitmap = DecodedBitmap::new(create_test_image(w, h), BitmapOrigin::Camera);
        let mut session = CropSession::new(bitmap, AspectRatio::SQUARE);
        for edit in edits {
            match edit {
                CropEdit::Zoom(z) => session.set_zoom(z),
                CropEdit::Rotate(deg) => session.set_rotation(deg),
                CropEdit::Pan(dx, dy) => session.pan(dx, dy),
            }
            let (bw, bh) = session.bounds();
            let spec = session.spec();
            prop_assert!(spec.offset_x + spec.width <= bw);
            prop_assert!(spec.offset_y + spec.height <= bh);
            let on_source = session.frame().contains_rect(
                spec.offset_x,
                spec.offset_y,
                spec.width,
                spec.height,
                1e-6,
            );
            prop_assert!(on_source, "{:?} leaves the {}x{} source", spec, w, h);
            prop_assert!((1.0..=3.0).contains(&spec.zoom));
            prop_assert!((0.0..360.0).contains(&spec.rotation_degrees));
            prop_assert_eq!(spec.width, spec.height);
        }

        let spec = session.spec();
        let cropped = session.confirm().unwrap();
        prop_assert_eq!(cropped.dimensions(), (spec.width, spec.height));
        // An opaque source leaves nothing transparent to flatten
        let uncovered = cropped.pixels.pixels().filter(|p| p.0[3] != 255).count();
        prop_assert_eq!(uncovered, 0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 8,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_recompress_never_grows(
        w in 16u32..=160,
        h in 16u32..=160,
        seed in any::<u8>(),
    ) {
        let img = RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x as u8).wrapping_mul(seed), (y as u8) ^ seed, seed])
        });
        let rgba = image::DynamicImage::ImageRgb8(img).into_rgba8();
        let config = PipelineConfig::default();
        let cancel = CancelToken::new();

        let first = Compressor::new(config.clone()).unwrap().compress(rgba, &cancel).unwrap();
        let second = recompress(&first, &config, &cancel).unwrap();
        prop_assert!(second.size_bytes() <= first.size_bytes());
        prop_assert_eq!(second.dimensions(), first.dimensions());
    }
}
