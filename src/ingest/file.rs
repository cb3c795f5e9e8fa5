//! Local video file source.
//!
//! Reads frames from a local file (no URL schemes) and hands them out as BGR
//! frames. Real files need the `ingest-file-ffmpeg` feature; `stub://`
//! locations produce a finite synthetic clip.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::{self, SyntheticSource, DEFAULT_CLIP_FRAMES};
use super::{FrameSource, SourceStats};
use crate::frame::Frame;

/// Frame size of synthetic clips.
const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 480;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "uploaded_video.mp4").
    pub path: String,
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(Box<FfmpegFileSource>),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        if synthetic::is_stub(&config.path) {
            let length = synthetic::stub_length(&config.path)?.unwrap_or(DEFAULT_CLIP_FRAMES);
            Ok(Self {
                backend: FileBackend::Synthetic(SyntheticSource::new(
                    &config.path,
                    SYNTHETIC_WIDTH,
                    SYNTHETIC_HEIGHT,
                    Some(length),
                )?),
            })
        } else {
            #[cfg(feature = "ingest-file-ffmpeg")]
            {
                Ok(Self {
                    backend: FileBackend::Ffmpeg(Box::new(FfmpegFileSource::new(config)?)),
                })
            }
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            {
                Err(anyhow!(
                    "file ingestion requires the ingest-file-ffmpeg feature"
                ))
            }
        }
    }

    fn inner(&mut self) -> &mut dyn FrameSource {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.as_mut(),
        }
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        self.inner().connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.inner().next_frame()
    }

    fn release(&mut self) {
        self.inner().release()
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if synthetic::is_stub(path) {
        return true;
    }
    !path.contains("://")
}
