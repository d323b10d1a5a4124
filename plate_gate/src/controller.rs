//! The gate loop: capture, detect, read, decide, act, display.
//!
//! Everything runs on the calling thread. Opening the gate blocks the loop
//! for the configured hold time, so no frames are captured while it is open.

use chrono::{DateTime, Utc};
use crossbeam::channel::Receiver;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::GateConfig;
use crate::gate::GateActuator;
use crate::metrics;
use crate::plate_detection::{
    select_plate, BoxOutcome, DisplayAction, Frame, FrameDisplay, FrameSource, PlateBox,
    PlateDetector, SnapshotSink, TextReader,
};
use crate::storage::GateStore;
use crate::utils::FpsLimiter;

/// Timing and text policy for the loop.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub open_duration: Duration,
    pub capture_backoff: Duration,
    pub min_plate_len: usize,
    pub max_fps: Option<u32>,
}

impl From<&GateConfig> for GatePolicy {
    fn from(config: &GateConfig) -> Self {
        Self {
            open_duration: config.open_duration,
            capture_backoff: config.capture_backoff,
            min_plate_len: config.min_plate_len,
            max_fps: config.max_fps,
        }
    }
}

/// Every collaborator the loop talks to, built once at startup. Dropping the
/// context releases the camera, the relay line, the window and the database.
pub struct GateContext<F> {
    pub source: Box<dyn FrameSource<F>>,
    pub detector: Box<dyn PlateDetector<F>>,
    pub reader: Box<dyn TextReader<F>>,
    pub snapshots: Box<dyn SnapshotSink<F>>,
    pub display: Box<dyn FrameDisplay<F>>,
    pub actuator: Box<dyn GateActuator>,
    pub store: Box<dyn GateStore>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameReport {
    pub outcomes: Vec<BoxOutcome>,
    /// Rows successfully written to the access log.
    pub events_logged: usize,
    pub gate_opened: bool,
    pub quit: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub capture_failures: u64,
    pub events_logged: u64,
    pub gate_openings: u64,
}

pub struct GateController<F> {
    ctx: GateContext<F>,
    policy: GatePolicy,
    limiter: Option<FpsLimiter>,
}

impl<F: Frame> GateController<F> {
    pub fn new(ctx: GateContext<F>, policy: GatePolicy) -> Self {
        let limiter = policy.max_fps.map(FpsLimiter::new);
        Self {
            ctx,
            policy,
            limiter,
        }
    }

    /// Runs until the operator quits or something arrives on `shutdown`.
    pub fn run(&mut self, shutdown: &Receiver<()>) -> RunSummary {
        let mut summary = RunSummary::default();

        loop {
            if shutdown.try_recv().is_ok() {
                info!("Shutdown requested");
                break;
            }
            if let Some(limiter) = self.limiter.as_mut() {
                limiter.wait();
            }

            let mut frame = match self.ctx.source.grab() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.capture_failed(&mut summary, "no frame");
                    continue;
                }
                Err(e) => {
                    self.capture_failed(&mut summary, &e.to_string());
                    continue;
                }
            };
            metrics::FRAMES_CAPTURED.inc();
            summary.frames += 1;

            let report = self.process_frame(&mut frame, Utc::now());
            summary.events_logged += report.events_logged as u64;
            if report.gate_opened {
                summary.gate_openings += 1;
            }
            if report.quit {
                info!("Operator quit");
                break;
            }
        }

        summary
    }

    fn capture_failed(&self, summary: &mut RunSummary, reason: &str) {
        metrics::CAPTURE_FAILURES.inc();
        summary.capture_failures += 1;
        warn!(
            "Capture failed ({reason}), retrying in {}ms",
            self.policy.capture_backoff.as_millis()
        );
        spin_sleep::sleep(self.policy.capture_backoff);
    }

    /// Handles one captured frame end to end.
    pub fn process_frame(&mut self, frame: &mut F, captured_at: DateTime<Utc>) -> FrameReport {
        let _timer = metrics::FRAME_SECONDS.start_timer();
        let mut report = FrameReport::default();

        let boxes = match self.ctx.detector.detect(frame) {
            Ok(boxes) => boxes,
            Err(e) => {
                warn!("Skipping frame: {e}");
                Vec::new()
            }
        };
        debug!("{} plate candidates", boxes.len());

        for plate_box in &boxes {
            if let Some(outcome) = self.process_box(frame, plate_box, captured_at, &mut report) {
                report.outcomes.push(outcome);
            }
        }

        match self.ctx.display.show(frame, &boxes, &report.outcomes) {
            Ok(DisplayAction::Quit) => report.quit = true,
            Ok(DisplayAction::Continue) => {}
            Err(e) => warn!("Display failed: {e}"),
        }

        report
    }

    fn process_box(
        &mut self,
        frame: &F,
        plate_box: &PlateBox,
        captured_at: DateTime<Utc>,
        report: &mut FrameReport,
    ) -> Option<BoxOutcome> {
        let (width, height) = frame.size();
        let Some(region) = plate_box.region.clamp_to(width, height) else {
            metrics::SKIPPED_BOXES.inc();
            warn!("Skipping box {:?} outside the frame", plate_box.region);
            return None;
        };

        let crop = match frame.crop(&region) {
            Ok(crop) => crop,
            Err(e) => {
                metrics::SKIPPED_BOXES.inc();
                warn!("Skipping box {region:?}: {e}");
                return None;
            }
        };
        let candidates = match self.ctx.reader.read_text(&crop) {
            Ok(candidates) => candidates,
            Err(e) => {
                metrics::SKIPPED_BOXES.inc();
                warn!("Skipping box {region:?}: {e}");
                return None;
            }
        };

        let plate = select_plate(&candidates, self.policy.min_plate_len);
        let allowed = match &plate {
            Some(read) => match self.ctx.store.lookup(&read.text) {
                Ok(id) => id.is_some(),
                Err(e) => {
                    error!("Allow-list lookup for {} failed, denying: {e}", read.text);
                    false
                }
            },
            None => false,
        };

        let text = plate.as_ref().map(|read| read.text.as_str());
        let confidence = plate.as_ref().map_or(0.0, |read| read.confidence);

        match self.ctx.store.append(text, confidence, allowed) {
            Ok(()) => report.events_logged += 1,
            Err(e) => error!("Access event for {text:?} lost: {e}"),
        }

        if let Some(read) = &plate {
            metrics::PLATES_READ.inc();
            info!(
                "{} - Plate: {} conf={:.2} allowed={}",
                captured_at.format("%Y-%m-%d %H:%M:%S"),
                read.text,
                read.confidence,
                allowed
            );
        } else {
            debug!("No readable plate in box {region:?}");
        }

        if allowed {
            metrics::ACCESS_GRANTED.inc();
            // One actuation per frame, however many allowed plates it holds.
            if !report.gate_opened {
                match self.ctx.actuator.open(self.policy.open_duration) {
                    Ok(()) => {
                        metrics::GATE_OPENINGS.inc();
                        report.gate_opened = true;
                    }
                    Err(e) => error!("Cannot open gate: {e}"),
                }
            }
        } else {
            metrics::ACCESS_DENIED.inc();
        }

        match self.ctx.snapshots.save(&crop, captured_at, text) {
            Ok(path) => debug!("Snapshot saved to {}", path.display()),
            Err(e) => warn!("Snapshot failed: {e}"),
        }

        Some(BoxOutcome {
            region,
            plate,
            allowed,
        })
    }
}
