//! Local file frame source using FFmpeg.
//!
//! Decodes the best video stream of a local file and converts every frame
//! to BGR24 in memory.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::Flags;

use super::file::FileConfig;
use super::{FrameSource, SourceStats};
use crate::frame::{Frame, BYTES_PER_PIXEL};

pub(crate) struct FfmpegFileSource {
    config: FileConfig,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(config: FileConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&config.path)
            .with_context(|| format!("open video file {}", config.path))?;
        let (stream_index, parameters) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| anyhow!("{} has no video stream", config.path))?;
            (stream.index(), stream.parameters())
        };
        let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
            .and_then(|context| context.decoder().video())
            .with_context(|| format!("open decoder for {}", config.path))?;
        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::BGR24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )
        .context("create BGR24 converter")?;

        Ok(Self {
            config,
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            eof_sent: false,
        })
    }

    /// Feed the decoder one more packet of our stream, or EOF once the
    /// container runs dry.
    fn feed(&mut self) -> Result<()> {
        let stream_index = self.stream_index;
        let packet = self
            .input
            .packets()
            .find_map(|(stream, packet)| (stream.index() == stream_index).then_some(packet));
        match packet {
            Some(packet) => self
                .decoder
                .send_packet(&packet)
                .context("decode packet")?,
            None => {
                self.decoder.send_eof().context("drain decoder")?;
                self.eof_sent = true;
            }
        }
        Ok(())
    }
}

impl FrameSource for FfmpegFileSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "source: opened {} ({}x{})",
            self.config.path,
            self.decoder.width(),
            self.decoder.height()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_err() {
            if self.eof_sent {
                return Ok(None);
            }
            self.feed()?;
        }

        let mut bgr = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut bgr)
            .context("convert decoded frame to BGR24")?;
        let frame = packed_frame(&bgr, self.frame_count)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        log::info!(
            "source: closed {} after {} frames",
            self.config.path,
            self.frame_count
        );
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            location: self.config.path.clone(),
        }
    }
}

/// Strip the per-row padding FFmpeg leaves after each line.
fn packed_frame(bgr: &ffmpeg::frame::Video, index: u64) -> Result<Frame> {
    let (width, height) = (bgr.width(), bgr.height());
    let line = width as usize * BYTES_PER_PIXEL;
    let stride = bgr.stride(0);
    let plane = bgr.data(0);

    let mut data = Vec::with_capacity(line * height as usize);
    for row in plane.chunks(stride.max(1)).take(height as usize) {
        data.extend_from_slice(row.get(..line).context("BGR24 row shorter than frame width")?);
    }
    Frame::from_bgr(data, width, height, index)
}
