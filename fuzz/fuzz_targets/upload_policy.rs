#![no_main]

//! Server-side validation of untrusted uploads. Accepted inputs must honour
//! every limit the policy claims to enforce.

use libfuzzer_sys::fuzz_target;
use photo_intake::engine::{PolicyMode, UploadPolicy};
use photo_intake::ops::UploadPreset;

fuzz_target!(|data: &[u8]| {
    let policy = UploadPolicy::for_preset(UploadPreset::Review, PolicyMode::Lenient);
    if let Ok((w, h)) = policy.validate(data) {
        assert!(data.len() as u64 <= policy.max_bytes);
        assert!(w.max(h) <= policy.max_dimension);
        assert!(data.starts_with(&[0xFF, 0xD8, 0xFF]));
    }
});
