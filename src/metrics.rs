//! Prometheus metrics for dispatch runs
//!
//! Batch jobs are not scraped, so the registry is written to a textfile
//! (node-exporter textfile collector format) when a run ends.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, CounterVec, Encoder, GaugeVec,
    Histogram, TextEncoder,
};
use std::path::Path;

lazy_static! {
    /// Counter: dispatched items by phase and outcome
    pub static ref ITEMS_DISPATCHED: CounterVec = register_counter_vec!(
        "chatport_items_total",
        "Dispatched work items by phase and outcome",
        &["phase", "outcome"]
    )
    .expect("Failed to create items_total metric");

    /// Histogram: wall time of one batch including pacing (seconds)
    pub static ref BATCH_DURATION: Histogram = register_histogram!(
        "chatport_batch_duration_seconds",
        "Duration of dispatch batches",
        vec![0.25, 0.5, 1.0, 2.0, 5.0, 15.0, 60.0, 300.0]
    )
    .expect("Failed to create batch_duration metric");

    /// Gauge: items left per queue
    pub static ref QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "chatport_queue_depth",
        "Items remaining per queue",
        &["queue"]
    )
    .expect("Failed to create queue_depth metric");
}

/// Count one item outcome (`success`, `conflict`, `failed`)
pub fn record_item(phase: &str, outcome: &str) {
    ITEMS_DISPATCHED.with_label_values(&[phase, outcome]).inc();
}

pub fn record_batch_duration(duration_secs: f64) {
    BATCH_DURATION.observe(duration_secs);
}

pub fn set_queue_depth(queue: &str, depth: usize) {
    QUEUE_DEPTH.with_label_values(&[queue]).set(depth as f64);
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> crate::Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| crate::MigrateError::Other(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| crate::MigrateError::Other(format!("Metrics are not UTF-8: {}", e)))
}

/// Write the current metrics to `path`
pub fn write_textfile(path: &Path) -> crate::Result<()> {
    let text = encode_metrics()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    tracing::debug!(path = %path.display(), "Wrote metrics");
    Ok(())
}
