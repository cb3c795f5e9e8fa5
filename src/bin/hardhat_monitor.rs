//! hardhat_monitor - annotate a video stream with hardhat detections
//!
//! This binary:
//! 1. Loads configuration ($HARDHAT_CONFIG, HARDHAT_* overrides, CLI flags)
//! 2. Opens the selected source (webcam, uploaded video, or RTSP camera)
//! 3. Runs the detector on every frame and draws labelled boxes
//! 4. Saves a snapshot for every NO-Hardhat detection
//! 5. Writes the annotated stream to the output video and the preview page

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hardhat_monitor::{
    detect::{self, BackendKind},
    ingest::{self, SourceMode},
    output,
    preview::{DisplaySink, PreviewServer},
    ui::{Ui, UiMode},
    FrameAnnotator, MonitorConfig, RunOptions, SnapshotWriter,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Helmet Detection System")]
struct Args {
    #[command(subcommand)]
    command: Command,
    /// Stop after this many frames.
    #[arg(long, global = true)]
    max_frames: Option<u64>,
    /// Detector backend (overrides config and HARDHAT_DETECTOR_BACKEND).
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendKind>,
    /// Do not start the browser preview.
    #[arg(long, global = true)]
    no_preview: bool,
    /// Do not write the output video.
    #[arg(long, global = true)]
    no_output: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, global = true, value_enum, default_value_t = UiMode::Auto, value_name = "MODE")]
    ui: UiMode,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Live detection from the configured webcam
    Webcam,
    /// Detect on an uploaded video (mp4, avi, mov); `-` reads from stdin
    Upload {
        #[arg(value_name = "PATH|-")]
        input: String,
    },
    /// Live detection from an RTSP camera
    Rtsp {
        #[arg(value_name = "URL")]
        url: String,
    },
}

impl Command {
    fn mode(&self) -> SourceMode {
        match self {
            Command::Webcam => SourceMode::Webcam,
            Command::Upload { input } => SourceMode::Upload {
                input: input.clone(),
            },
            Command::Rtsp { url } => SourceMode::Rtsp { url: url.clone() },
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Command::Webcam => "webcam",
            Command::Upload { .. } => "upload",
            Command::Rtsp { .. } => "rtsp",
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::new(args.ui, is_tty, !stdout_is_tty);

    let mut cfg = MonitorConfig::load()?;
    if let Some(backend) = args.backend {
        cfg.detector.backend = backend;
    }
    if args.no_output {
        cfg.output.enabled = false;
    }
    if args.no_preview {
        cfg.preview.enabled = false;
    }
    cfg.validate()?;

    let mut detector = {
        let _stage = ui.stage("Load detector");
        detect::build_backend(&cfg.detector)?
    };
    let mut snapshots = SnapshotWriter::open(&cfg.snapshots.dir, cfg.snapshots.resume_numbering)?;
    let mut sink = {
        let _stage = ui.stage("Open output video");
        output::open_output(&cfg.output)?
    };
    let mut source = {
        let _stage = ui.stage("Open source");
        let mut source = ingest::open_source(&args.command.mode(), &cfg)?;
        source.connect()?;
        source
    };

    let preview = if cfg.preview.enabled {
        Some(PreviewServer::new(cfg.preview.addr.clone()).spawn()?)
    } else {
        None
    };
    let mut displays: Vec<Box<dyn DisplaySink>> = Vec::new();
    if let Some(handle) = &preview {
        displays.push(Box::new(handle.display()));
    }
    displays.push(Box::new(ui.progress(args.command.label())));

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let options = RunOptions {
        max_frames: args.max_frames,
        stop: Some(stop),
    };
    let annotator = FrameAnnotator::from_config(&cfg);
    let outcome = hardhat_monitor::run(
        &mut source,
        &mut detector,
        &annotator,
        &mut snapshots,
        &mut sink,
        &mut displays,
        &options,
    );

    if let Some(handle) = preview {
        handle.stop()?;
    }
    let summary = outcome?;
    if cfg.output.enabled {
        log::info!("annotated video written to {}", cfg.output.path.display());
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
