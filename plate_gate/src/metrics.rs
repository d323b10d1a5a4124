//! Process-wide counters for the gate loop.

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry =
        Registry::new_custom(Some("plate_gate".to_string()), None)
            .expect("valid registry prefix");
    pub static ref FRAMES_CAPTURED: IntCounter =
        register(IntCounter::new("frames_captured_total", "Frames read from the camera"));
    pub static ref CAPTURE_FAILURES: IntCounter = register(IntCounter::new(
        "capture_failures_total",
        "Capture attempts that returned no frame"
    ));
    pub static ref PLATES_READ: IntCounter = register(IntCounter::new(
        "plates_read_total",
        "Boxes for which OCR produced a usable plate"
    ));
    pub static ref ACCESS_GRANTED: IntCounter =
        register(IntCounter::new("access_granted_total", "Boxes matched against the allow-list"));
    pub static ref ACCESS_DENIED: IntCounter =
        register(IntCounter::new("access_denied_total", "Boxes not on the allow-list"));
    pub static ref GATE_OPENINGS: IntCounter =
        register(IntCounter::new("gate_openings_total", "Relay actuations"));
    pub static ref SKIPPED_BOXES: IntCounter = register(IntCounter::new(
        "skipped_boxes_total",
        "Boxes dropped because cropping or OCR failed"
    ));
    pub static ref FRAME_SECONDS: Histogram = register(Histogram::with_opts(
        HistogramOpts::new("frame_processing_seconds", "Detect, OCR and act time per frame")
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    ));
}

fn register<M>(metric: prometheus::Result<M>) -> M
where
    M: prometheus::core::Collector + Clone + 'static,
{
    let metric = metric.expect("valid metric definition");
    REGISTRY
        .register(Box::new(metric.clone()))
        .expect("metric registered once");
    metric
}

/// Text exposition of every gate metric.
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!("Cannot encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
