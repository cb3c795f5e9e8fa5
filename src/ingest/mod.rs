//! Frame ingestion sources.
//!
//! This module provides the sources the annotator loop reads from:
//! - Webcam via V4L2 (feature: ingest-v4l2)
//! - Uploaded video files, staged to a fixed path and decoded with FFmpeg
//!   (feature: ingest-file-ffmpeg)
//! - RTSP streams from IP/CCTV cameras (feature: rtsp-gstreamer)
//! - Synthetic `stub://` sources (testing and demos)
//!
//! Every source yields BGR `Frame`s with 0-based indices. `next_frame`
//! returns `Ok(None)` at end of stream; callers treat read errors the same
//! way.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
mod normalize;
pub mod rtsp;
pub mod synthetic;
pub mod upload;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::config::MonitorConfig;
use crate::frame::Frame;

pub use file::{FileConfig, FileSource};
pub use rtsp::{RtspConfig, RtspSource};
pub use synthetic::SyntheticSource;
pub use upload::UploadConfig;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// A video source the annotator loop can drain.
pub trait FrameSource {
    /// Open the underlying device, file or stream.
    fn connect(&mut self) -> Result<()>;

    /// Next decoded frame, `Ok(None)` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying handle. Safe to call more than once.
    fn release(&mut self) {}

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub location: String,
}

/// User-selectable input mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceMode {
    /// Local webcam from the `webcam` config section.
    Webcam,
    /// Uploaded video: a path, `-` for stdin, or a `stub://` clip.
    Upload { input: String },
    /// IP/CCTV camera stream.
    Rtsp { url: String },
}

/// Build (but do not connect) the source for `mode`.
pub fn open_source(mode: &SourceMode, config: &MonitorConfig) -> Result<Box<dyn FrameSource>> {
    match mode {
        SourceMode::Webcam => open_webcam(config),
        SourceMode::Upload { input } => Ok(Box::new(upload::open_upload(
            input,
            &UploadConfig {
                staging_path: config.upload.staging_path.clone(),
            },
        )?)),
        SourceMode::Rtsp { url } => Ok(Box::new(RtspSource::new(RtspConfig {
            url: url.clone(),
            target_fps: config.webcam.target_fps,
            width: config.webcam.width,
            height: config.webcam.height,
        })?)),
    }
}

fn open_webcam(config: &MonitorConfig) -> Result<Box<dyn FrameSource>> {
    let webcam = &config.webcam;
    if synthetic::is_stub(&webcam.device) {
        let length = synthetic::stub_length(&webcam.device)?;
        return Ok(Box::new(SyntheticSource::new(
            &webcam.device,
            webcam.width,
            webcam.height,
            length,
        )?));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Source::new(V4l2Config {
            device: webcam.device.clone(),
            target_fps: webcam.target_fps,
            width: webcam.width,
            height: webcam.height,
        })?))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(anyhow::anyhow!(
            "webcam capture from {} requires the ingest-v4l2 feature",
            webcam.device
        ))
    }
}
