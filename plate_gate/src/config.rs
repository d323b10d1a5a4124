//! Process configuration for the gate controller.
//!
//! Everything is read from `GATE_*` environment variables. A variable that is
//! set but cannot be parsed is an error: a gate that silently falls back to a
//! default camera or relay pin is worse than one that refuses to start.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GateError, GateResult};

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSource {
    /// Local capture device index (`0` is the default webcam).
    Device(i32),
    /// Video file path or stream URL (RTSP, HTTP).
    Uri(String),
}

impl FromStr for CameraSource {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(GateError::config("camera source is empty"));
        }
        match s.parse::<i32>() {
            Ok(index) if index >= 0 => Ok(CameraSource::Device(index)),
            Ok(index) => Err(GateError::config(format!(
                "camera device index must be non-negative, got {index}"
            ))),
            Err(_) => Ok(CameraSource::Uri(s.to_string())),
        }
    }
}

impl fmt::Display for CameraSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSource::Device(index) => write!(f, "device {index}"),
            CameraSource::Uri(uri) => write!(f, "{uri}"),
        }
    }
}

/// Inference target for the plate detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorDevice {
    #[default]
    Cpu,
    Cuda,
}

impl FromStr for DetectorDevice {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(DetectorDevice::Cpu),
            "cuda" | "gpu" => Ok(DetectorDevice::Cuda),
            other => Err(GateError::config(format!(
                "unknown detector device '{other}', expected cpu or cuda"
            ))),
        }
    }
}

/// Which relay implementation drives the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayMode {
    /// No hardware: log the intent to open.
    #[default]
    Log,
    /// GPIO output pin.
    Gpio,
}

impl FromStr for RelayMode {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "log" | "none" | "simulate" => Ok(RelayMode::Log),
            "gpio" => Ok(RelayMode::Gpio),
            other => Err(GateError::config(format!(
                "unknown relay mode '{other}', expected log or gpio"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub camera_source: CameraSource,
    pub db_path: PathBuf,
    pub snapshot_dir: PathBuf,
    /// How long the relay stays high once access is granted.
    pub open_duration: Duration,
    /// Wait after a failed capture before trying again.
    pub capture_backoff: Duration,
    pub detector_model: PathBuf,
    pub detector_confidence: f32,
    pub detector_device: DetectorDevice,
    pub ocr_data: PathBuf,
    pub ocr_lang: String,
    /// Normalized OCR reads shorter than this are discarded.
    pub min_plate_len: usize,
    pub relay: RelayMode,
    /// BCM pin number, only used with [`RelayMode::Gpio`].
    pub relay_pin: u8,
    pub display: bool,
    pub max_fps: Option<u32>,
    /// Plates added to the allow-list at startup.
    pub seed_plates: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            camera_source: CameraSource::Device(0),
            db_path: PathBuf::from("alpr.db"),
            snapshot_dir: PathBuf::from("snapshots"),
            open_duration: Duration::from_secs(5),
            capture_backoff: Duration::from_millis(500),
            detector_model: PathBuf::from("models/plate_best.onnx"),
            detector_confidence: 0.25,
            detector_device: DetectorDevice::Cpu,
            ocr_data: PathBuf::from("models"),
            ocr_lang: "eng".to_string(),
            min_plate_len: 4,
            relay: RelayMode::Log,
            relay_pin: 18,
            display: true,
            max_fps: None,
            seed_plates: Vec::new(),
        }
    }
}

impl GateConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> GateResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key lookup, falling back to defaults for
    /// missing keys.
    pub fn from_lookup<L>(lookup: L) -> GateResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            camera_source: match get("GATE_CAMERA_SOURCE") {
                Some(v) => v.parse()?,
                None => defaults.camera_source,
            },
            db_path: get("GATE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            snapshot_dir: get("GATE_SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_dir),
            open_duration: match get("GATE_OPEN_SECS") {
                Some(v) => parse_seconds("GATE_OPEN_SECS", &v)?,
                None => defaults.open_duration,
            },
            capture_backoff: match get("GATE_CAPTURE_BACKOFF_MS") {
                Some(v) => Duration::from_millis(parse_value("GATE_CAPTURE_BACKOFF_MS", &v)?),
                None => defaults.capture_backoff,
            },
            detector_model: get("GATE_DETECTOR_MODEL")
                .map(PathBuf::from)
                .unwrap_or(defaults.detector_model),
            detector_confidence: match get("GATE_DETECTOR_CONFIDENCE") {
                Some(v) => parse_value("GATE_DETECTOR_CONFIDENCE", &v)?,
                None => defaults.detector_confidence,
            },
            detector_device: match get("GATE_DETECTOR_DEVICE") {
                Some(v) => v.parse()?,
                None => defaults.detector_device,
            },
            ocr_data: get("GATE_OCR_DATA")
                .map(PathBuf::from)
                .unwrap_or(defaults.ocr_data),
            ocr_lang: get("GATE_OCR_LANG").unwrap_or(defaults.ocr_lang),
            min_plate_len: match get("GATE_MIN_PLATE_LEN") {
                Some(v) => parse_value("GATE_MIN_PLATE_LEN", &v)?,
                None => defaults.min_plate_len,
            },
            relay: match get("GATE_RELAY") {
                Some(v) => v.parse()?,
                None => defaults.relay,
            },
            relay_pin: match get("GATE_RELAY_PIN") {
                Some(v) => parse_value("GATE_RELAY_PIN", &v)?,
                None => defaults.relay_pin,
            },
            display: match get("GATE_DISPLAY") {
                Some(v) => parse_bool("GATE_DISPLAY", &v)?,
                None => defaults.display,
            },
            max_fps: match get("GATE_MAX_FPS") {
                Some(v) => Some(parse_value("GATE_MAX_FPS", &v)?),
                None => defaults.max_fps,
            },
            seed_plates: get("GATE_ALLOWED_PLATES")
                .map(|v| {
                    v.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.seed_plates),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> GateResult<()> {
        if self.open_duration.is_zero() {
            return Err(GateError::config("GATE_OPEN_SECS must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.detector_confidence) {
            return Err(GateError::config(format!(
                "GATE_DETECTOR_CONFIDENCE must be within 0..=1, got {}",
                self.detector_confidence
            )));
        }
        if self.min_plate_len == 0 {
            return Err(GateError::config("GATE_MIN_PLATE_LEN must be at least 1"));
        }
        if self.max_fps == Some(0) {
            return Err(GateError::config("GATE_MAX_FPS must be at least 1"));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> GateResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| GateError::config(format!("{key}: cannot parse '{raw}'")))
}

fn parse_seconds(key: &str, raw: &str) -> GateResult<Duration> {
    let secs: f64 = parse_value(key, raw)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(GateError::config(format!(
            "{key}: expected a non-negative number of seconds, got '{raw}'"
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| GateError::config(format!("{key}: {e}")))
}

fn parse_bool(key: &str, raw: &str) -> GateResult<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(GateError::config(format!(
            "{key}: expected true or false, got '{raw}'"
        ))),
    }
}
