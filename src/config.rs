use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::BackendKind;
use crate::snapshot::SnapshotPolicy;

const DEFAULT_MODEL_PATH: &str = "finalhardhat.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.7;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.25;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_BOX_THICKNESS: u32 = 3;
const DEFAULT_SNAPSHOT_DIR: &str = "snapshots";
const DEFAULT_OUTPUT_PATH: &str = "output.avi";
const DEFAULT_OUTPUT_FPS: u32 = 30;
const DEFAULT_OUTPUT_WIDTH: u32 = 640;
const DEFAULT_OUTPUT_HEIGHT: u32 = 480;
const DEFAULT_WEBCAM_DEVICE: &str = "/dev/video0";
const DEFAULT_WEBCAM_WIDTH: u32 = 1280;
const DEFAULT_WEBCAM_HEIGHT: u32 = 720;
const DEFAULT_WEBCAM_FPS: u32 = 30;
const DEFAULT_STAGING_PATH: &str = "uploaded_video.mp4";
const DEFAULT_PREVIEW_ADDR: &str = "127.0.0.1:8501";

/// Environment variables read by `MonitorConfig::load`.
pub const ENV_VARS: &[&str] = &[
    "HARDHAT_CONFIG",
    "HARDHAT_DETECTOR_BACKEND",
    "HARDHAT_MODEL_PATH",
    "HARDHAT_CONFIDENCE",
    "HARDHAT_SNAPSHOT_DIR",
    "HARDHAT_OUTPUT_PATH",
    "HARDHAT_WEBCAM_DEVICE",
    "HARDHAT_PREVIEW_ADDR",
];

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    detector: Option<DetectorConfigFile>,
    annotate: Option<AnnotateConfigFile>,
    snapshots: Option<SnapshotConfigFile>,
    output: Option<OutputConfigFile>,
    webcam: Option<WebcamConfigFile>,
    upload: Option<UploadConfigFile>,
    preview: Option<PreviewConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<BackendKind>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    iou_threshold: Option<f32>,
    min_confidence: Option<f32>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotateConfigFile {
    confidence_threshold: Option<f32>,
    box_thickness: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotConfigFile {
    dir: Option<PathBuf>,
    policy: Option<SnapshotPolicy>,
    resume_numbering: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    path: Option<PathBuf>,
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct WebcamConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    staging_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct PreviewConfigFile {
    addr: Option<String>,
    enabled: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub detector: DetectorSettings,
    pub annotate: AnnotateSettings,
    pub snapshots: SnapshotSettings,
    pub output: OutputSettings,
    pub webcam: WebcamSettings,
    pub upload: UploadSettings,
    pub preview: PreviewSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: BackendKind,
    pub model_path: PathBuf,
    pub input_size: u32,
    pub iou_threshold: f32,
    pub min_confidence: f32,
    /// Seed for the stub backend.
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct AnnotateSettings {
    pub confidence_threshold: f32,
    pub box_thickness: u32,
}

#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub dir: PathBuf,
    pub policy: SnapshotPolicy,
    pub resume_numbering: bool,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub path: PathBuf,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct WebcamSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub staging_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    pub addr: String,
    pub enabled: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_file(MonitorConfigFile::default())
    }
}

impl MonitorConfig {
    /// File at `$HARDHAT_CONFIG` (if set), then env overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HARDHAT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let detector = file.detector.unwrap_or_default();
        let annotate = file.annotate.unwrap_or_default();
        let snapshots = file.snapshots.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        let webcam = file.webcam.unwrap_or_default();
        let upload = file.upload.unwrap_or_default();
        let preview = file.preview.unwrap_or_default();

        Self {
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or_default(),
                model_path: detector
                    .model_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                iou_threshold: detector.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                min_confidence: detector.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                seed: detector.seed.unwrap_or(0),
            },
            annotate: AnnotateSettings {
                confidence_threshold: annotate
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                box_thickness: annotate.box_thickness.unwrap_or(DEFAULT_BOX_THICKNESS),
            },
            snapshots: SnapshotSettings {
                dir: snapshots
                    .dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
                policy: snapshots.policy.unwrap_or_default(),
                resume_numbering: snapshots.resume_numbering.unwrap_or(true),
            },
            output: OutputSettings {
                path: output
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH)),
                fps: output.fps.unwrap_or(DEFAULT_OUTPUT_FPS),
                width: output.width.unwrap_or(DEFAULT_OUTPUT_WIDTH),
                height: output.height.unwrap_or(DEFAULT_OUTPUT_HEIGHT),
                enabled: output.enabled.unwrap_or(true),
            },
            webcam: WebcamSettings {
                device: webcam
                    .device
                    .unwrap_or_else(|| DEFAULT_WEBCAM_DEVICE.to_string()),
                width: webcam.width.unwrap_or(DEFAULT_WEBCAM_WIDTH),
                height: webcam.height.unwrap_or(DEFAULT_WEBCAM_HEIGHT),
                target_fps: webcam.target_fps.unwrap_or(DEFAULT_WEBCAM_FPS),
            },
            upload: UploadSettings {
                staging_path: upload
                    .staging_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STAGING_PATH)),
            },
            preview: PreviewSettings {
                addr: preview
                    .addr
                    .unwrap_or_else(|| DEFAULT_PREVIEW_ADDR.to_string()),
                enabled: preview.enabled.unwrap_or(true),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(backend) = non_empty_env("HARDHAT_DETECTOR_BACKEND") {
            self.detector.backend = backend.parse()?;
        }
        if let Some(path) = non_empty_env("HARDHAT_MODEL_PATH") {
            self.detector.model_path = PathBuf::from(path);
        }
        if let Some(confidence) = non_empty_env("HARDHAT_CONFIDENCE") {
            self.annotate.confidence_threshold = confidence.trim().parse().map_err(|_| {
                anyhow!("HARDHAT_CONFIDENCE must be a number between 0 and 1")
            })?;
        }
        if let Some(dir) = non_empty_env("HARDHAT_SNAPSHOT_DIR") {
            self.snapshots.dir = PathBuf::from(dir);
        }
        if let Some(path) = non_empty_env("HARDHAT_OUTPUT_PATH") {
            self.output.path = PathBuf::from(path);
        }
        if let Some(device) = non_empty_env("HARDHAT_WEBCAM_DEVICE") {
            self.webcam.device = device;
        }
        if let Some(addr) = non_empty_env("HARDHAT_PREVIEW_ADDR") {
            self.preview.addr = addr;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        check_unit("annotate.confidence_threshold", self.annotate.confidence_threshold)?;
        check_unit("detector.iou_threshold", self.detector.iou_threshold)?;
        check_unit("detector.min_confidence", self.detector.min_confidence)?;
        if self.annotate.box_thickness == 0 {
            return Err(anyhow!("annotate.box_thickness must be at least 1"));
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(anyhow!(
                "detector.input_size must be a positive multiple of 32, got {}",
                self.detector.input_size
            ));
        }
        check_positive("output.fps", self.output.fps)?;
        check_positive("output.width", self.output.width)?;
        check_positive("output.height", self.output.height)?;
        check_positive("webcam.width", self.webcam.width)?;
        check_positive("webcam.height", self.webcam.height)?;
        check_path("snapshots.dir", &self.snapshots.dir)?;
        check_path("output.path", &self.output.path)?;
        check_path("upload.staging_path", &self.upload.staging_path)?;
        if self.webcam.device.trim().is_empty() {
            return Err(anyhow!("webcam.device must not be empty"));
        }
        self.preview
            .addr
            .parse::<std::net::SocketAddr>()
            .map_err(|_| anyhow!("preview.addr '{}' is not a socket address", self.preview.addr))?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}

fn check_positive(name: &str, value: u32) -> Result<()> {
    if value == 0 {
        return Err(anyhow!("{} must be greater than zero", name));
    }
    Ok(())
}

fn check_path(name: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(anyhow!("{} must not be empty", name));
    }
    Ok(())
}
