//! Hardhat compliance monitor.
//!
//! Reads video from a webcam, an uploaded file or an RTSP camera, runs a
//! hardhat detector on every frame, draws labelled boxes (red for
//! `NO-Hardhat`, green for `Hardhat`), saves a still image of each violation
//! and re-encodes the annotated stream to a video file.
//!
//! # Module Structure
//!
//! - `frame`: BGR frame buffer and colors
//! - `detect`: detector trait, stub and ONNX (tract) backends, YOLO decoding
//! - `annotate`: rectangle and label drawing
//! - `annotator`: the per-frame loop and run summary
//! - `snapshot`: numbered violation snapshots and their manifest
//! - `ingest`: frame sources (V4L2, FFmpeg files, uploads, RTSP, synthetic)
//! - `output`: output video sinks
//! - `preview`: display sinks, including the loopback browser preview
//! - `ui`: terminal progress
//! - `config`: file + environment configuration

pub mod annotate;
pub mod annotator;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod output;
pub mod preview;
pub mod snapshot;
pub mod ui;

pub use annotator::{run, FrameAnnotator, FrameReport, RunOptions, RunSummary};
pub use config::MonitorConfig;
pub use detect::{BoundingBox, Detection, DetectorBackend, HardhatClass, StubBackend};
pub use frame::{Bgr, Frame};
pub use ingest::{open_source, FrameSource, SourceMode, SyntheticSource};
pub use output::{open_output, MemorySink, NullSink, VideoSink};
pub use preview::{DisplaySink, NullDisplay, PreviewHandle, PreviewServer};
pub use snapshot::{SnapshotPolicy, SnapshotRecord, SnapshotWriter};
