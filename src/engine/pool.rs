// src/engine/pool.rs
//
// Background and batch compression on a single global rayon pool.
//
// The pool is built lazily on first use with one thread per available core
// (cgroup/CPU quota aware through available_parallelism). Changing the
// environment after initialization has no effect.

use crate::engine::compress::{CancelToken, CompressedArtifact, Compressor};
use crate::error::IntakeError;
use image::RgbaImage;
use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Minimum number of rayon threads to ensure at least some parallelism
const MIN_RAYON_THREADS: usize = 1;

/// Leave one core for the thread driving the UI event loop.
const RESERVED_THREADS: usize = 1;

static GLOBAL_THREAD_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

/// The shared compression pool, or `None` if no pool could be created.
pub fn get_pool() -> Option<&'static ThreadPool> {
    GLOBAL_THREAD_POOL
        .get_or_init(|| {
            let detected = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(MIN_RAYON_THREADS);
            let num_threads = detected
                .saturating_sub(RESERVED_THREADS)
                .max(MIN_RAYON_THREADS);

            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .thread_name(|i| format!("photo-intake-{i}"))
                .build()
                .or_else(|e| {
                    warn!(
                        target: "photo_intake::compress",
                        error = %e,
                        threads = num_threads,
                        "falling back to a minimal compression pool"
                    );
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(MIN_RAYON_THREADS)
                        .build()
                })
                .ok()
        })
        .as_ref()
}

fn pool_unavailable() -> IntakeError {
    IntakeError::internal_panic("compression thread pool could not be created")
}

type Slot = (Mutex<Option<Result<CompressedArtifact, IntakeError>>>, Condvar);

/// Handle to a compression running on the global pool.
#[derive(Debug)]
pub struct CompressionHandle {
    slot: Arc<Slot>,
    cancel: CancelToken,
}

impl CompressionHandle {
    /// Request cancellation; takes effect before the next encode attempt.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.slot.0.lock().is_some()
    }

    /// Block until the compression finishes.
    pub fn wait(self) -> Result<CompressedArtifact, IntakeError> {
        let (lock, cvar) = &*self.slot;
        let mut guard = lock.lock();
        loop {
            if let Some(result) = guard.take() {
                return result;
            }
            cvar.wait(&mut guard);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning the
    /// handle so the caller can keep waiting or cancel.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<CompressedArtifact, IntakeError>, Self> {
        let finished = {
            let (lock, cvar) = &*self.slot;
            let mut guard = lock.lock();
            if guard.is_none() {
                cvar.wait_for(&mut guard, timeout);
            }
            guard.take()
        };
        match finished {
            Some(result) => Ok(result),
            None => Err(self),
        }
    }
}

/// Run `compressor` over `pixels` on the global pool without blocking.
pub fn compress_in_background(
    compressor: Arc<Compressor>,
    pixels: RgbaImage,
) -> Result<CompressionHandle, IntakeError> {
    let pool = get_pool().ok_or_else(pool_unavailable)?;
    let slot: Arc<Slot> = Arc::new((Mutex::new(None), Condvar::new()));
    let cancel = CancelToken::new();

    let task_slot = Arc::clone(&slot);
    let task_cancel = cancel.clone();
    pool.spawn(move || {
        let result = compressor.compress(pixels, &task_cancel);
        let (lock, cvar) = &*task_slot;
        *lock.lock() = Some(result);
        cvar.notify_all();
    });
    debug!(target: "photo_intake::compress", "background compression queued");

    Ok(CompressionHandle { slot, cancel })
}

/// Compress several bitmaps in parallel.
///
/// Results come back in input order; one failure never affects the others.
pub fn compress_batch(
    compressor: &Compressor,
    images: Vec<RgbaImage>,
    cancel: &CancelToken,
) -> Vec<Result<CompressedArtifact, IntakeError>> {
    let run = || {
        images
            .into_par_iter()
            .map(|pixels| compressor.compress(pixels, cancel))
            .collect::<Vec<_>>()
    };
    let results = match get_pool() {
        Some(pool) => pool.install(run),
        None => run(),
    };
    let failed = results.iter().filter(|r| r.is_err()).count();
    debug!(
        target: "photo_intake::compress",
        total = results.len(),
        failed,
        "batch compression finished"
    );
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::compress::testing::SizedEncoder;
    use crate::engine::encoder::Encode;
    use crate::ops::{OutputFormat, PipelineConfig, Quality};
    use image::{Rgba, RgbImage};

    fn create_test_image(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        })
    }

    /// Fails on images narrower than 4 px.
    struct PickyEncoder;

    impl Encode for PickyEncoder {
        fn format(&self) -> OutputFormat {
            OutputFormat::Jpeg
        }

        fn encode(&self, img: &RgbImage, _quality: Quality) -> Result<Vec<u8>, IntakeError> {
            if img.width() < 4 {
                Err(IntakeError::encode_failed("jpeg", "too narrow"))
            } else {
                Ok(vec![1; 64])
            }
        }
    }

    #[test]
    fn pool_is_created_once() {
        let a = get_pool().unwrap() as *const ThreadPool;
        let b = get_pool().unwrap() as *const ThreadPool;
        assert_eq!(a, b);
        assert!(get_pool().unwrap().current_num_threads() >= MIN_RAYON_THREADS);
    }

    #[test]
    fn background_compression_completes() {
        let compressor = Arc::new(Compressor::new(PipelineConfig::default()).unwrap());
        let handle = compress_in_background(compressor, create_test_image(32, 32)).unwrap();
        let artifact = handle.wait().unwrap();
        assert_eq!(artifact.dimensions(), (32, 32));
    }

    #[test]
    fn wait_timeout_returns_result_when_done() {
        let compressor = Arc::new(
            Compressor::new(PipelineConfig::default())
                .unwrap()
                .with_encoder(Arc::new(SizedEncoder::new(10, 0))),
        );
        let handle = compress_in_background(compressor, create_test_image(4, 4)).unwrap();
        let mut handle = Some(handle);
        let mut result = None;
        for _ in 0..100 {
            match handle.take().unwrap().wait_timeout(Duration::from_millis(50)) {
                Ok(done) => {
                    result = Some(done);
                    break;
                }
                Err(pending) => handle = Some(pending),
            }
        }
        assert!(result.unwrap().is_ok());
    }

    #[test]
    fn batch_isolates_failures() {
        let compressor = Compressor::new(PipelineConfig::default())
            .unwrap()
            .with_encoder(Arc::new(PickyEncoder));
        let images = vec![
            create_test_image(8, 8),
            create_test_image(2, 8),
            create_test_image(16, 4),
        ];
        let results = compress_batch(&compressor, images, &CancelToken::new());
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(IntakeError::EncodeFailed { .. })));
        assert_eq!(results[2].as_ref().unwrap().dimensions(), (16, 4));
    }

    #[test]
    fn cancelled_batch_produces_nothing() {
        let compressor = Compressor::new(PipelineConfig::default()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let results = compress_batch(&compressor, vec![create_test_image(8, 8); 3], &cancel);
        assert!(results.iter().all(|r| matches!(r, Err(IntakeError::Cancelled))));
    }
}
