// src/engine/common.rs
//
// Common utilities shared across engine modules.
// Provides unified error handling, type aliases and the panic policy.

use crate::error::IntakeError;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Result type used throughout the engine.
pub type EngineResult<T> = std::result::Result<T, IntakeError>;

/// Run codec work so that a panic inside a decoder/encoder becomes an
/// `InternalPanic` error for that one image instead of unwinding into the
/// hosting form.
pub fn run_with_panic_policy<T, F>(stage: &'static str, f: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            tracing::error!(target: "photo_intake::engine", %stage, %detail, "codec panicked");
            Err(IntakeError::internal_panic(format!("{stage}: {detail}")))
        }
    }
}
