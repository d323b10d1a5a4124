//! Integration tests for the gate loop, driven by scripted collaborators and
//! a real SQLite file.

use chrono::{DateTime, TimeZone, Utc};
use crossbeam::channel::unbounded;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use plate_gate::gate::{GateActuator, OutputLine, PinRelay};
use plate_gate::plate_detection::{
    snapshot_path, BoxOutcome, DisplayAction, Frame, FrameDisplay, FrameSource, OcrCandidate,
    PlateBox, PlateDetector, Region, SnapshotSink, TextReader,
};
use plate_gate::storage::{AllowListStore, AuditLog, SqliteStore};
use plate_gate::{GateContext, GateController, GateError, GateResult, GatePolicy};

/// A frame that remembers which region it was cropped from, so the OCR fake
/// can answer per box.
#[derive(Debug, Clone, PartialEq)]
struct TestFrame {
    width: i32,
    height: i32,
    origin: Option<Region>,
}

impl TestFrame {
    fn new() -> Self {
        Self {
            width: 640,
            height: 480,
            origin: None,
        }
    }
}

impl Frame for TestFrame {
    fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    fn crop(&self, region: &Region) -> GateResult<Self> {
        Ok(TestFrame {
            width: region.width,
            height: region.height,
            origin: Some(*region),
        })
    }
}

struct ScriptedSource {
    frames: VecDeque<GateResult<Option<TestFrame>>>,
    grabs: Rc<RefCell<usize>>,
}

impl FrameSource<TestFrame> for ScriptedSource {
    fn grab(&mut self) -> GateResult<Option<TestFrame>> {
        *self.grabs.borrow_mut() += 1;
        self.frames
            .pop_front()
            .unwrap_or_else(|| Err(GateError::Capture("script exhausted".to_string())))
    }
}

struct ScriptedDetector {
    frames: VecDeque<GateResult<Vec<PlateBox>>>,
}

impl PlateDetector<TestFrame> for ScriptedDetector {
    fn detect(&mut self, _frame: &TestFrame) -> GateResult<Vec<PlateBox>> {
        self.frames.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Answers by the x coordinate of the crop.
struct ScriptedReader {
    by_x: Vec<(i32, GateResult<Vec<OcrCandidate>>)>,
}

impl TextReader<TestFrame> for ScriptedReader {
    fn read_text(&mut self, crop: &TestFrame) -> GateResult<Vec<OcrCandidate>> {
        let x = crop.origin.map(|r| r.x).unwrap_or(-1);
        let index = self.by_x.iter().position(|(bx, _)| *bx == x);
        match index {
            Some(i) => self.by_x.remove(i).1,
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Clone, Default)]
struct RecordedSnapshots {
    saved: Rc<RefCell<Vec<(DateTime<Utc>, Option<String>)>>>,
}

impl SnapshotSink<TestFrame> for RecordedSnapshots {
    fn save(
        &mut self,
        _crop: &TestFrame,
        captured_at: DateTime<Utc>,
        plate: Option<&str>,
    ) -> GateResult<PathBuf> {
        self.saved
            .borrow_mut()
            .push((captured_at, plate.map(str::to_string)));
        Ok(snapshot_path(Path::new("snapshots"), captured_at, plate))
    }
}

/// Quits after showing `frames` frames.
struct CountingDisplay {
    remaining: usize,
    shown: Rc<RefCell<Vec<usize>>>,
}

impl FrameDisplay<TestFrame> for CountingDisplay {
    fn show(
        &mut self,
        _frame: &mut TestFrame,
        boxes: &[PlateBox],
        _outcomes: &[BoxOutcome],
    ) -> GateResult<DisplayAction> {
        self.shown.borrow_mut().push(boxes.len());
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            Ok(DisplayAction::Quit)
        } else {
            Ok(DisplayAction::Continue)
        }
    }
}

#[derive(Clone, Default)]
struct RecordedRelay {
    openings: Rc<RefCell<Vec<Duration>>>,
}

impl GateActuator for RecordedRelay {
    fn open(&mut self, duration: Duration) -> GateResult<()> {
        self.openings.borrow_mut().push(duration);
        Ok(())
    }
}

struct BrokenStore;

impl AllowListStore for BrokenStore {
    fn lookup(&self, _plate: &str) -> GateResult<Option<i64>> {
        Ok(Some(1))
    }
}

impl AuditLog for BrokenStore {
    fn append(&self, _plate: Option<&str>, _confidence: f32, _allowed: bool) -> GateResult<()> {
        Err(GateError::Storage(rusqlite_error()))
    }
}

/// Logs to SQLite, but the allow-list cannot be read.
struct UnreadableAllowList {
    log: SqliteStore,
}

impl AllowListStore for UnreadableAllowList {
    fn lookup(&self, _plate: &str) -> GateResult<Option<i64>> {
        Err(GateError::Storage(rusqlite_error()))
    }
}

impl AuditLog for UnreadableAllowList {
    fn append(&self, plate: Option<&str>, confidence: f32, allowed: bool) -> GateResult<()> {
        self.log.append(plate, confidence, allowed)
    }
}

struct JammedRelay;

impl GateActuator for JammedRelay {
    fn open(&mut self, _duration: Duration) -> GateResult<()> {
        Err(GateError::Actuator("relay coil open circuit".to_string()))
    }
}

struct FullDisk;

impl SnapshotSink<TestFrame> for FullDisk {
    fn save(
        &mut self,
        _crop: &TestFrame,
        _captured_at: DateTime<Utc>,
        _plate: Option<&str>,
    ) -> GateResult<PathBuf> {
        Err(GateError::Snapshot("no space left on device".to_string()))
    }
}

struct ClosedWindow;

impl FrameDisplay<TestFrame> for ClosedWindow {
    fn show(
        &mut self,
        _frame: &mut TestFrame,
        _boxes: &[PlateBox],
        _outcomes: &[BoxOutcome],
    ) -> GateResult<DisplayAction> {
        Err(GateError::Display("window was closed".to_string()))
    }
}

fn rusqlite_error() -> rusqlite::Error {
    rusqlite::Error::InvalidQuery
}

struct Harness {
    _dir: tempfile::TempDir,
    db_path: PathBuf,
    grabs: Rc<RefCell<usize>>,
    shown: Rc<RefCell<Vec<usize>>>,
    snapshots: RecordedSnapshots,
    relay: RecordedRelay,
}

impl Harness {
    fn new(allowed: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("alpr.db");
        let store = SqliteStore::open(&db_path).unwrap();
        for plate in allowed {
            store.insert(plate).unwrap();
        }
        Self {
            _dir: dir,
            db_path,
            grabs: Rc::new(RefCell::new(0)),
            shown: Rc::new(RefCell::new(Vec::new())),
            snapshots: RecordedSnapshots::default(),
            relay: RecordedRelay::default(),
        }
    }

    fn controller(
        &self,
        frames: Vec<GateResult<Option<TestFrame>>>,
        detections: Vec<GateResult<Vec<PlateBox>>>,
        reads: Vec<(i32, GateResult<Vec<OcrCandidate>>)>,
        quit_after: usize,
    ) -> GateController<TestFrame> {
        GateController::new(self.context(frames, detections, reads, quit_after), policy())
    }

    fn context(
        &self,
        frames: Vec<GateResult<Option<TestFrame>>>,
        detections: Vec<GateResult<Vec<PlateBox>>>,
        reads: Vec<(i32, GateResult<Vec<OcrCandidate>>)>,
        quit_after: usize,
    ) -> GateContext<TestFrame> {
        GateContext {
            source: Box::new(ScriptedSource {
                frames: frames.into(),
                grabs: self.grabs.clone(),
            }),
            detector: Box::new(ScriptedDetector {
                frames: detections.into(),
            }),
            reader: Box::new(ScriptedReader { by_x: reads }),
            snapshots: Box::new(self.snapshots.clone()),
            display: Box::new(CountingDisplay {
                remaining: quit_after,
                shown: self.shown.clone(),
            }),
            actuator: Box::new(self.relay.clone()),
            store: Box::new(SqliteStore::open(&self.db_path).unwrap()),
        }
    }

    fn events(&self) -> Vec<plate_gate::storage::AccessEvent> {
        let mut events = SqliteStore::open(&self.db_path).unwrap().recent(100).unwrap();
        events.reverse();
        events
    }
}

fn policy() -> GatePolicy {
    GatePolicy {
        open_duration: Duration::from_secs(5),
        capture_backoff: Duration::from_millis(1),
        min_plate_len: 4,
        max_fps: None,
    }
}

fn plate_box(x: i32) -> PlateBox {
    PlateBox::new(Region::new(x, 100, 120, 40), 0.9)
}

fn read(text: &str, confidence: f32) -> OcrCandidate {
    OcrCandidate::new(Region::new(0, 0, 120, 40), text, confidence)
}

fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

#[test]
fn test_allowed_plate_opens_gate_and_is_logged() {
    let harness = Harness::new(&["MW42X"]);
    let mut controller = harness.controller(
        vec![],
        vec![Ok(vec![plate_box(10)])],
        vec![(
            10,
            // OCR regions "M W 4 2 X" and "MW42X".
            Ok(vec![read("AB1", 0.61), read("MW42X", 0.93)]),
        )],
        1,
    );

    let report = controller.process_frame(&mut TestFrame::new(), at());

    assert!(report.gate_opened);
    assert_eq!(report.events_logged, 1);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].plate.as_ref().unwrap().text, "MW42X");
    assert!(report.outcomes[0].allowed);

    assert_eq!(*harness.relay.openings.borrow(), vec![Duration::from_secs(5)]);

    let events = harness.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].plate.as_deref(), Some("MW42X"));
    assert!(events[0].allowed);
    assert!((events[0].confidence - 0.93).abs() < 1e-6);

    assert_eq!(
        *harness.snapshots.saved.borrow(),
        vec![(at(), Some("MW42X".to_string()))]
    );
}

#[test]
fn test_short_read_logs_empty_plate_and_keeps_gate_closed() {
    let harness = Harness::new(&["MW42X"]);
    let mut controller = harness.controller(
        vec![],
        vec![Ok(vec![plate_box(10)])],
        vec![(10, Ok(vec![read("XY", 0.99)]))],
        1,
    );

    let report = controller.process_frame(&mut TestFrame::new(), at());

    assert!(!report.gate_opened);
    assert_eq!(report.outcomes[0].plate, None);
    assert!(!report.outcomes[0].allowed);
    assert!(harness.relay.openings.borrow().is_empty());

    let events = harness.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].plate, None);
    assert!(!events[0].allowed);
    assert_eq!(events[0].confidence, 0.0);

    // The crop is still kept, without a plate label.
    assert_eq!(*harness.snapshots.saved.borrow(), vec![(at(), None)]);
}

#[test]
fn test_denied_plate_is_logged_and_snapshotted() {
    let harness = Harness::new(&["MW42X"]);
    let mut controller = harness.controller(
        vec![],
        vec![Ok(vec![plate_box(10)])],
        vec![(10, Ok(vec![read("zz 999", 0.7)]))],
        1,
    );

    let report = controller.process_frame(&mut TestFrame::new(), at());

    assert!(!report.gate_opened);
    let events = harness.events();
    assert_eq!(events[0].plate.as_deref(), Some("ZZ999"));
    assert!(!events[0].allowed);
    assert_eq!(
        *harness.snapshots.saved.borrow(),
        vec![(at(), Some("ZZ999".to_string()))]
    );
}

#[test]
fn test_capture_failures_back_off_and_retry() {
    let harness = Harness::new(&[]);
    let backoff = Duration::from_millis(20);
    let ctx = harness.context(
        vec![Ok(None), Ok(None), Ok(None), Ok(Some(TestFrame::new()))],
        vec![],
        vec![],
        1,
    );
    let mut controller = GateController::new(
        ctx,
        GatePolicy {
            capture_backoff: backoff,
            ..policy()
        },
    );
    let (_shutdown_s, shutdown_r) = unbounded();

    let started = Instant::now();
    let summary = controller.run(&shutdown_r);

    assert!(started.elapsed() >= backoff * 3);

    assert_eq!(summary.capture_failures, 3);
    assert_eq!(summary.frames, 1);
    assert_eq!(summary.events_logged, 0);
    assert_eq!(*harness.grabs.borrow(), 4);
    assert!(harness.events().is_empty());
}

#[test]
fn test_capture_errors_are_not_fatal() {
    let harness = Harness::new(&[]);
    let mut controller = harness.controller(
        vec![
            Err(GateError::Capture("device unplugged".to_string())),
            Ok(None),
            Ok(Some(TestFrame::new())),
        ],
        vec![],
        vec![],
        1,
    );
    let (_shutdown_s, shutdown_r) = unbounded();

    let summary = controller.run(&shutdown_r);

    assert_eq!(summary.capture_failures, 2);
    assert_eq!(summary.frames, 1);
}

#[test]
fn test_gate_relay_held_for_configured_duration() {
    #[derive(Clone, Default)]
    struct TimedLine {
        changes: Rc<RefCell<Vec<(bool, Instant)>>>,
    }

    impl OutputLine for TimedLine {
        fn set_high(&mut self) -> GateResult<()> {
            self.changes.borrow_mut().push((true, Instant::now()));
            Ok(())
        }

        fn set_low(&mut self) -> GateResult<()> {
            self.changes.borrow_mut().push((false, Instant::now()));
            Ok(())
        }
    }

    let harness = Harness::new(&["CD99Z"]);
    let line = TimedLine::default();
    let changes = line.changes.clone();

    let ctx = GateContext {
        source: Box::new(ScriptedSource {
            frames: VecDeque::from(vec![Ok(Some(TestFrame::new()))]),
            grabs: harness.grabs.clone(),
        }),
        detector: Box::new(ScriptedDetector {
            frames: VecDeque::from(vec![Ok(vec![plate_box(10)])]),
        }),
        reader: Box::new(ScriptedReader {
            by_x: vec![(10, Ok(vec![read("CD99Z", 0.80)]))],
        }),
        snapshots: Box::new(harness.snapshots.clone()),
        display: Box::new(CountingDisplay {
            remaining: 1,
            shown: harness.shown.clone(),
        }),
        actuator: Box::new(PinRelay::new(line).unwrap()),
        store: Box::new(SqliteStore::open(&harness.db_path).unwrap()),
    };
    let hold = Duration::from_millis(50);
    let mut controller = GateController::new(
        ctx,
        GatePolicy {
            open_duration: hold,
            ..policy()
        },
    );
    let (_shutdown_s, shutdown_r) = unbounded();

    let summary = controller.run(&shutdown_r);
    assert_eq!(summary.gate_openings, 1);

    {
        let changes = changes.borrow();
        let levels: Vec<bool> = changes.iter().map(|(high, _)| *high).collect();
        // Driven low at setup, then one pulse.
        assert_eq!(levels, vec![false, true, false]);
        assert!(changes[2].1 - changes[1].1 >= hold);
    }

    let events = harness.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].plate.as_deref(), Some("CD99Z"));
    assert!(events[0].allowed);

    // Dropping the controller releases the relay line once more.
    drop(controller);
    assert_eq!(changes.borrow().last().map(|(high, _)| *high), Some(false));
}

#[test]
fn test_every_box_is_logged_once_and_gate_opens_once_per_frame() {
    let harness = Harness::new(&["MW42X", "CD99Z"]);
    let mut controller = harness.controller(
        vec![],
        vec![Ok(vec![
            plate_box(10),
            plate_box(200),
            plate_box(400),
            plate_box(500),
        ])],
        vec![
            (10, Ok(vec![read("MW42X", 0.9)])),
            (200, Ok(vec![])),
            (400, Ok(vec![read("CD-99-Z", 0.8)])),
            (500, Ok(vec![read("QQ11", 0.6)])),
        ],
        1,
    );

    let report = controller.process_frame(&mut TestFrame::new(), at());

    assert_eq!(report.events_logged, 4);
    assert!(report.gate_opened);
    assert_eq!(harness.relay.openings.borrow().len(), 1);

    let events = harness.events();
    let logged: Vec<(Option<&str>, bool)> = events
        .iter()
        .map(|e| (e.plate.as_deref(), e.allowed))
        .collect();
    assert_eq!(
        logged,
        vec![
            (Some("MW42X"), true),
            (None, false),
            (Some("CD99Z"), true),
            (Some("QQ11"), false),
        ]
    );
    assert_eq!(harness.snapshots.saved.borrow().len(), 4);
}

#[test]
fn test_detector_error_skips_frame() {
    let harness = Harness::new(&["MW42X"]);
    let mut controller = harness.controller(
        vec![Ok(Some(TestFrame::new())), Ok(Some(TestFrame::new()))],
        vec![
            Err(GateError::Detector("inference failed".to_string())),
            Ok(vec![plate_box(10)]),
        ],
        vec![(10, Ok(vec![read("MW42X", 0.9)]))],
        2,
    );
    let (_shutdown_s, shutdown_r) = unbounded();

    let summary = controller.run(&shutdown_r);

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.events_logged, 1);
    assert_eq!(summary.gate_openings, 1);
    // Both frames reached the display; the first one without boxes.
    assert_eq!(*harness.shown.borrow(), vec![0, 1]);
}

#[test]
fn test_ocr_error_skips_only_that_box() {
    let harness = Harness::new(&[]);
    let mut controller = harness.controller(
        vec![],
        vec![Ok(vec![plate_box(10), plate_box(200)])],
        vec![
            (10, Err(GateError::Ocr("engine crashed".to_string()))),
            (200, Ok(vec![read("AB12CD", 0.7)])),
        ],
        1,
    );

    let report = controller.process_frame(&mut TestFrame::new(), at());

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.events_logged, 1);
    assert_eq!(harness.events()[0].plate.as_deref(), Some("AB12CD"));
}

#[test]
fn test_box_outside_frame_is_skipped_and_edge_box_is_clamped() {
    let harness = Harness::new(&[]);
    let mut controller = harness.controller(
        vec![],
        vec![Ok(vec![
            PlateBox::new(Region::new(900, 100, 50, 20), 0.8),
            PlateBox::new(Region::new(600, 100, 100, 40), 0.8),
        ])],
        vec![(600, Ok(vec![read("EDGE1", 0.7)]))],
        1,
    );

    let report = controller.process_frame(&mut TestFrame::new(), at());

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].region, Region::new(600, 100, 40, 40));
    assert_eq!(harness.events().len(), 1);
}

#[test]
fn test_storage_failure_does_not_stop_the_gate() {
    let relay = RecordedRelay::default();
    let ctx = GateContext {
        source: Box::new(ScriptedSource {
            frames: VecDeque::new(),
            grabs: Rc::new(RefCell::new(0)),
        }),
        detector: Box::new(ScriptedDetector {
            frames: VecDeque::from(vec![Ok(vec![plate_box(10)])]),
        }),
        reader: Box::new(ScriptedReader {
            by_x: vec![(10, Ok(vec![read("MW42X", 0.9)]))],
        }),
        snapshots: Box::new(RecordedSnapshots::default()),
        display: Box::new(CountingDisplay {
            remaining: 1,
            shown: Rc::new(RefCell::new(Vec::new())),
        }),
        actuator: Box::new(relay.clone()),
        store: Box::new(BrokenStore),
    };
    let mut controller = GateController::new(ctx, policy());

    let report = controller.process_frame(&mut TestFrame::new(), at());

    assert_eq!(report.events_logged, 0);
    assert!(report.gate_opened);
    assert_eq!(relay.openings.borrow().len(), 1);
}

#[test]
fn test_failed_lookup_denies_and_still_logs() {
    let harness = Harness::new(&["MW42X"]);
    let mut ctx = harness.context(
        vec![],
        vec![Ok(vec![plate_box(10)])],
        vec![(10, Ok(vec![read("MW42X", 0.9)]))],
        1,
    );
    ctx.store = Box::new(UnreadableAllowList {
        log: SqliteStore::open(&harness.db_path).unwrap(),
    });
    let mut controller = GateController::new(ctx, policy());

    let report = controller.process_frame(&mut TestFrame::new(), at());

    assert!(!report.outcomes[0].allowed);
    assert!(!report.gate_opened);
    assert!(harness.relay.openings.borrow().is_empty());

    let events = harness.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].plate.as_deref(), Some("MW42X"));
    assert!(!events[0].allowed);
}

#[test]
fn test_failed_relay_keeps_the_loop_going() {
    let harness = Harness::new(&["MW42X"]);
    let mut ctx = harness.context(
        vec![Ok(Some(TestFrame::new())), Ok(Some(TestFrame::new()))],
        vec![Ok(vec![plate_box(10)]), Ok(vec![plate_box(10)])],
        vec![
            (10, Ok(vec![read("MW42X", 0.9)])),
            (10, Ok(vec![read("MW42X", 0.9)])),
        ],
        3,
    );
    ctx.actuator = Box::new(JammedRelay);
    let mut controller = GateController::new(ctx, policy());

    let report = controller.process_frame(&mut TestFrame::new(), at());

    assert!(!report.gate_opened);
    assert!(report.outcomes[0].allowed);
    assert_eq!(report.events_logged, 1);
    assert_eq!(
        *harness.snapshots.saved.borrow(),
        vec![(at(), Some("MW42X".to_string()))]
    );

    let (_shutdown_s, shutdown_r) = unbounded();
    let summary = controller.run(&shutdown_r);
    assert_eq!(summary.frames, 2);
    assert_eq!(summary.gate_openings, 0);
    assert_eq!(harness.events().len(), 2);
}

#[test]
fn test_failed_snapshot_still_logs_and_opens() {
    let harness = Harness::new(&["MW42X"]);
    let mut ctx = harness.context(
        vec![],
        vec![Ok(vec![plate_box(10)])],
        vec![(10, Ok(vec![read("MW42X", 0.9)]))],
        1,
    );
    ctx.snapshots = Box::new(FullDisk);
    let mut controller = GateController::new(ctx, policy());

    let report = controller.process_frame(&mut TestFrame::new(), at());

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.events_logged, 1);
    assert!(report.gate_opened);
    assert_eq!(harness.events()[0].plate.as_deref(), Some("MW42X"));
}

#[test]
fn test_failed_display_still_reports_the_frame() {
    let harness = Harness::new(&["MW42X"]);
    let mut ctx = harness.context(
        vec![],
        vec![Ok(vec![plate_box(10)])],
        vec![(10, Ok(vec![read("MW42X", 0.9)]))],
        1,
    );
    ctx.display = Box::new(ClosedWindow);
    let mut controller = GateController::new(ctx, policy());

    let report = controller.process_frame(&mut TestFrame::new(), at());

    assert!(!report.quit);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.events_logged, 1);
    assert!(report.gate_opened);
    assert_eq!(harness.events().len(), 1);
}

#[test]
fn test_shutdown_signal_stops_before_capture() {
    let harness = Harness::new(&[]);
    let mut controller = harness.controller(vec![Ok(Some(TestFrame::new()))], vec![], vec![], 1);
    let (shutdown_s, shutdown_r) = unbounded();
    shutdown_s.send(()).unwrap();

    let summary = controller.run(&shutdown_r);

    assert_eq!(summary.frames, 0);
    assert_eq!(*harness.grabs.borrow(), 0);
}
