// src/engine/metrics.rs
//
// Per-image timing and size metrics, collected stage by stage.

use serde::Serialize;
use std::time::Instant;

pub const PIPELINE_METRICS_VERSION: &str = "1";

/// What one run through crop + compression cost.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PipelineMetrics {
    pub version: String,
    /// Filled by the session, which owns the crop stage.
    pub crop_ms: f64,
    pub downscale_ms: f64,
    pub encode_ms: f64,
    pub total_ms: f64,
    /// Encode attempts made by the quality search.
    pub attempts: u32,
    /// Raw RGBA bytes entering compression.
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub compression_ratio: f64,
    pub final_quality: u8,
    pub within_budget: bool,
}

/// Stage clock that fills a `PipelineMetrics` as stages complete.
pub(crate) struct MetricsRecorder {
    metrics: PipelineMetrics,
    start_total: Instant,
    stage_start: Instant,
}

impl MetricsRecorder {
    pub(crate) fn new(bytes_in: u64) -> Self {
        let now = Instant::now();
        Self {
            metrics: PipelineMetrics {
                version: PIPELINE_METRICS_VERSION.to_string(),
                bytes_in,
                ..PipelineMetrics::default()
            },
            start_total: now,
            stage_start: now,
        }
    }

    fn lap(&mut self) -> f64 {
        let ms = self.stage_start.elapsed().as_secs_f64() * 1000.0;
        self.stage_start = Instant::now();
        ms
    }

    pub(crate) fn mark_downscale_done(&mut self) {
        self.metrics.downscale_ms = self.lap();
    }

    pub(crate) fn record_attempt(&mut self) {
        self.metrics.attempts += 1;
    }

    pub(crate) fn finalize(mut self, bytes_out: u64, quality: u8, within_budget: bool) -> PipelineMetrics {
        self.metrics.encode_ms = self.lap();
        self.metrics.total_ms = self.start_total.elapsed().as_secs_f64() * 1000.0;
        self.metrics.bytes_out = bytes_out;
        self.metrics.compression_ratio = if self.metrics.bytes_in > 0 {
            bytes_out as f64 / self.metrics.bytes_in as f64
        } else {
            0.0
        };
        self.metrics.final_quality = quality;
        self.metrics.within_budget = within_budget;
        self.metrics
    }
}
