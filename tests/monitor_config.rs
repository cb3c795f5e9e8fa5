use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use hardhat_monitor::config::{MonitorConfig, ENV_VARS};
use hardhat_monitor::detect::BackendKind;
use hardhat_monitor::SnapshotPolicy;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in ENV_VARS {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "detector": {
            "backend": "tract",
            "model_path": "models/hardhat.onnx",
            "input_size": 320
        },
        "annotate": {
            "confidence_threshold": 0.6,
            "box_thickness": 2
        },
        "snapshots": {
            "dir": "evidence",
            "policy": "per_frame"
        },
        "output": {
            "path": "site.avi",
            "fps": 15
        },
        "webcam": {
            "device": "/dev/video2",
            "width": 640,
            "height": 480
        },
        "preview": {
            "addr": "127.0.0.1:9000"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("HARDHAT_CONFIG", file.path());
    std::env::set_var("HARDHAT_CONFIDENCE", "0.75");
    std::env::set_var("HARDHAT_SNAPSHOT_DIR", "violations");
    std::env::set_var("HARDHAT_DETECTOR_BACKEND", "stub");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.detector.backend, BackendKind::Stub);
    assert_eq!(cfg.detector.model_path, PathBuf::from("models/hardhat.onnx"));
    assert_eq!(cfg.detector.input_size, 320);
    assert_eq!(cfg.annotate.confidence_threshold, 0.75);
    assert_eq!(cfg.annotate.box_thickness, 2);
    assert_eq!(cfg.snapshots.dir, PathBuf::from("violations"));
    assert_eq!(cfg.snapshots.policy, SnapshotPolicy::PerFrame);
    assert!(cfg.snapshots.resume_numbering);
    assert_eq!(cfg.output.path, PathBuf::from("site.avi"));
    assert_eq!(cfg.output.fps, 15);
    assert_eq!((cfg.output.width, cfg.output.height), (640, 480));
    assert_eq!(cfg.webcam.device, "/dev/video2");
    assert_eq!((cfg.webcam.width, cfg.webcam.height), (640, 480));
    assert_eq!(cfg.preview.addr, "127.0.0.1:9000");
    assert_eq!(cfg.upload.staging_path, PathBuf::from("uploaded_video.mp4"));

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
        [output]
        enabled = false

        [upload]
        staging_path = "staging/clip.mp4"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("HARDHAT_CONFIG", file.path());

    let cfg = MonitorConfig::load().expect("load config");
    assert!(!cfg.output.enabled);
    assert_eq!(cfg.upload.staging_path, PathBuf::from("staging/clip.mp4"));
    assert_eq!(cfg.annotate.confidence_threshold, 0.5);

    clear_env();
}

#[test]
fn rejects_invalid_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("HARDHAT_CONFIDENCE", "high");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("HARDHAT_CONFIDENCE", "1.2");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("HARDHAT_DETECTOR_BACKEND", "opencv");
    assert!(MonitorConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("HARDHAT_CONFIG", "/nonexistent/hardhat.json");
    let err = MonitorConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
