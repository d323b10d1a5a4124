use anyhow::Context;
use crossbeam::channel::bounded;
use opencv::prelude::Mat;
use tracing::{debug, info, warn};

use plate_gate::gate::build_actuator;
use plate_gate::metrics;
use plate_gate::plate_detection::bounding_box_render::BoundingBoxRender;
use plate_gate::plate_detection::dnn_ocr::DnnOcrReader;
use plate_gate::plate_detection::object_detector::ObjectDetector;
use plate_gate::plate_detection::snapshot::JpegSnapshots;
use plate_gate::plate_detection::video_reader::VideoReader;
use plate_gate::plate_detection::{FrameDisplay, Headless};
use plate_gate::storage::SqliteStore;
use plate_gate::{GateConfig, GateContext, GateController, GatePolicy};

fn setup(config: &GateConfig) -> anyhow::Result<GateController<Mat>> {
    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    for plate in &config.seed_plates {
        match store.insert(plate) {
            Ok(true) => info!("Allowed plate {plate} added"),
            Ok(false) => debug!("Plate {plate} already allowed"),
            Err(e) => warn!("Ignoring seed plate: {e}"),
        }
    }

    let source = VideoReader::open(&config.camera_source).context("opening camera")?;
    let detector = ObjectDetector::plate_detector(
        &config.detector_model,
        config.detector_device,
        config.detector_confidence,
    )
    .context("loading plate detector")?;
    let reader =
        DnnOcrReader::new(&config.ocr_data, &config.ocr_lang).context("loading OCR engine")?;
    let snapshots = JpegSnapshots::new(&config.snapshot_dir).with_context(|| {
        format!(
            "creating snapshot directory {}",
            config.snapshot_dir.display()
        )
    })?;
    let display: Box<dyn FrameDisplay<Mat>> = if config.display {
        Box::new(BoundingBoxRender::open().context("opening operator window")?)
    } else {
        Box::new(Headless)
    };
    let actuator = build_actuator(config).context("setting up gate relay")?;

    let ctx = GateContext {
        source: Box::new(source),
        detector: Box::new(detector),
        reader: Box::new(reader),
        snapshots: Box::new(snapshots),
        display,
        actuator,
        store: Box::new(store),
    };
    Ok(GateController::new(ctx, GatePolicy::from(config)))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let config = GateConfig::from_env().context("reading GATE_* configuration")?;
    info!("Starting gate controller on {}", config.camera_source);

    let (shutdown_s, shutdown_r) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_s.try_send(());
    })
    .context("installing signal handler")?;

    let mut controller = setup(&config)?;
    let summary = controller.run(&shutdown_r);
    // Camera, relay and window are released here.
    drop(controller);

    info!(
        "Done: {} frames, {} capture failures, {} events logged, {} gate openings",
        summary.frames, summary.capture_failures, summary.events_logged, summary.gate_openings
    );
    debug!("Metrics:\n{}", metrics::render());
    Ok(())
}
