#![no_main]

//! Arbitrary zoom/rotation/pan sequences must keep the crop rectangle inside
//! the rotated bounds and render to exactly its size, reading only source
//! pixels.

use arbitrary::Arbitrary;
use image::{Rgba, RgbaImage};
use libfuzzer_sys::fuzz_target;
use photo_intake::engine::{BitmapOrigin, CropSession, DecodedBitmap};
use photo_intake::ops::AspectRatio;

#[derive(Arbitrary, Debug)]
enum Edit {
    Zoom(f32),
    Rotate(f32),
    Pan(f64, f64),
    Rect(u16, u16, u16, u16),
}

#[derive(Arbitrary, Debug)]
struct Input {
    width: u8,
    height: u8,
    aspect_w: u8,
    aspect_h: u8,
    edits: Vec<Edit>,
}

fuzz_target!(|input: Input| {
    let width = input.width.max(1) as u32;
    let height = input.height.max(1) as u32;
    let aspect = AspectRatio {
        width: input.aspect_w.max(1) as u32,
        height: input.aspect_h.max(1) as u32,
    };
    let bitmap = DecodedBitmap::new(
        RgbaImage::from_pixel(width, height, Rgba([90, 140, 200, 255])),
        BitmapOrigin::Camera,
    );
    let mut session = CropSession::new(bitmap, aspect);

    for edit in input.edits.into_iter().take(64) {
        match edit {
            Edit::Zoom(z) => session.set_zoom(z),
            Edit::Rotate(deg) => session.set_rotation(deg),
            Edit::Pan(dx, dy) => session.pan(dx, dy),
            Edit::Rect(x, y, w, h) => {
                let _ = session.set_crop_rect(x as u32, y as u32, w as u32, h as u32);
            }
        }
        let (bw, bh) = session.bounds();
        let spec = session.spec();
        assert!(spec.width >= 1 && spec.height >= 1);
        assert!(spec.offset_x + spec.width <= bw);
        assert!(spec.offset_y + spec.height <= bh);
    }

    let spec = session.spec();
    let cropped = session.confirm().expect("clamped crop renders");
    assert_eq!(cropped.dimensions(), (spec.width, spec.height));
    assert!(cropped.pixels.pixels().all(|p| p.0[3] == 255));
});
