//! Output video sinks.
//!
//! The annotator writes every annotated frame to exactly one `VideoSink`.
//! The production sink re-encodes to MPEG-4 Part 2 (the XVID family) with
//! FFmpeg at a fixed size and rate; frames of other sizes are rescaled.

#[cfg(feature = "output-ffmpeg")]
mod ffmpeg;

use std::path::PathBuf;

use anyhow::Result;

use crate::config::OutputSettings;
use crate::frame::Frame;

#[cfg(feature = "output-ffmpeg")]
pub use self::ffmpeg::FfmpegVideoWriter;

/// Destination for annotated frames.
pub trait VideoSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close. Called exactly once by the annotator loop.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: VideoSink + ?Sized> VideoSink for Box<S> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        (**self).write_frame(frame)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Discards frames (output disabled).
#[derive(Debug, Default)]
pub struct NullSink;

impl VideoSink for NullSink {
    fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

/// Keeps every frame in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub frames: Vec<Frame>,
    pub finished: bool,
}

impl VideoSink for MemorySink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

/// Output video parameters.
#[derive(Clone, Debug)]
pub struct OutputConfig {
    pub path: PathBuf,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

/// Open the configured output sink.
pub fn open_output(settings: &OutputSettings) -> Result<Box<dyn VideoSink>> {
    if !settings.enabled {
        log::info!("output video disabled");
        return Ok(Box::new(NullSink));
    }
    let config = OutputConfig {
        path: settings.path.clone(),
        fps: settings.fps,
        width: settings.width,
        height: settings.height,
    };
    #[cfg(feature = "output-ffmpeg")]
    {
        Ok(Box::new(FfmpegVideoWriter::create(config)?))
    }
    #[cfg(not(feature = "output-ffmpeg"))]
    {
        anyhow::bail!(
            "writing {} requires the output-ffmpeg feature",
            config.path.display()
        )
    }
}
