#![no_main]

//! Arbitrary bytes through the file-pick decode path (header guard, codec
//! routing, EXIF orientation). Must return an error, never panic.

use libfuzzer_sys::fuzz_target;
use photo_intake::engine::{decode_source, PickedFile, RawImageSource};
use photo_intake::ops::PipelineConfig;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let config = PipelineConfig::default();
    let file = PickedFile::from_bytes(data.to_vec(), None);
    if let Ok(bitmap) = decode_source(RawImageSource::from(file), &config) {
        let (w, h) = bitmap.dimensions();
        assert!(w > 0 && h > 0);
    }
});
