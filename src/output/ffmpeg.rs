use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::{codec, encoder, format, Rational};

use super::{OutputConfig, VideoSink};
use crate::frame::Frame;

/// MPEG-4 Part 2 writer; the container follows the path extension.
pub struct FfmpegVideoWriter {
    config: OutputConfig,
    octx: format::context::Output,
    encoder: codec::encoder::video::Encoder,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    /// Scaler keyed by the source frame size it was built for.
    scaler: Option<((u32, u32), Scaler)>,
    next_pts: i64,
    finished: bool,
}

impl FfmpegVideoWriter {
    pub fn create(config: OutputConfig) -> Result<Self> {
        if config.width % 2 != 0 || config.height % 2 != 0 {
            return Err(anyhow!(
                "output size {}x{} must be even for YUV420P",
                config.width,
                config.height
            ));
        }
        ffmpeg::init().context("initialize ffmpeg")?;
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output directory {}", parent.display()))?;
        }

        let mut octx = format::output(&config.path)
            .with_context(|| format!("open output video {}", config.path.display()))?;
        let codec = encoder::find(codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("ffmpeg build has no MPEG-4 encoder"))?;
        let global_header = octx.format().flags().contains(format::Flags::GLOBAL_HEADER);
        let encoder_time_base = Rational::new(1, config.fps as i32);

        let (stream_index, encoder) = {
            let mut ost = octx.add_stream(codec).context("add output video stream")?;
            let mut video = codec::context::Context::new_with_codec(codec)
                .encoder()
                .video()
                .context("create MPEG-4 encoder")?;
            video.set_width(config.width);
            video.set_height(config.height);
            video.set_format(Pixel::YUV420P);
            video.set_time_base(encoder_time_base);
            video.set_frame_rate(Some(Rational::new(config.fps as i32, 1)));
            if global_header {
                video.set_flags(codec::Flags::GLOBAL_HEADER);
            }
            let encoder = video.open_as(codec).context("open MPEG-4 encoder")?;
            ost.set_parameters(&encoder);
            ost.set_time_base(encoder_time_base);
            (ost.index(), encoder)
        };

        octx.write_header().context("write output video header")?;
        let stream_time_base = octx
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| anyhow!("output stream disappeared after header"))?;

        log::info!(
            "output: writing {} ({}x{} @ {} fps, MPEG-4)",
            config.path.display(),
            config.width,
            config.height,
            config.fps
        );

        Ok(Self {
            config,
            octx,
            encoder,
            stream_index,
            encoder_time_base,
            stream_time_base,
            scaler: None,
            next_pts: 0,
            finished: false,
        })
    }

    fn scaler_for(&mut self, width: u32, height: u32) -> Result<&mut Scaler> {
        let stale = self
            .scaler
            .as_ref()
            .map_or(true, |(size, _)| *size != (width, height));
        if stale {
            let scaler = Scaler::get(
                Pixel::BGR24,
                width,
                height,
                Pixel::YUV420P,
                self.config.width,
                self.config.height,
                Flags::BILINEAR,
            )
            .context("create output scaler")?;
            self.scaler = Some(((width, height), scaler));
        }
        self.scaler
            .as_mut()
            .map(|(_, scaler)| scaler)
            .ok_or_else(|| anyhow!("output scaler missing"))
    }

    fn drain_packets(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.octx)
                .context("write encoded packet")?;
        }
        Ok(())
    }
}

impl VideoSink for FfmpegVideoWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mut src = ffmpeg::frame::Video::new(Pixel::BGR24, frame.width(), frame.height());
        let stride = src.stride(0);
        let row_bytes = frame.width() as usize * 3;
        {
            let data = src.data_mut(0);
            for (row, pixels) in frame.as_bgr().chunks_exact(row_bytes).enumerate() {
                let start = row * stride;
                data.get_mut(start..start + row_bytes)
                    .context("output frame row is out of bounds")?
                    .copy_from_slice(pixels);
            }
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler_for(frame.width(), frame.height())?
            .run(&src, &mut yuv)
            .context("scale frame for encoder")?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&yuv)
            .context("send frame to MPEG-4 encoder")?;
        self.drain_packets()
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.encoder.send_eof().context("flush MPEG-4 encoder")?;
        self.drain_packets()?;
        self.octx
            .write_trailer()
            .context("write output video trailer")?;
        log::info!(
            "output: closed {} after {} frames",
            self.config.path.display(),
            self.next_pts
        );
        Ok(())
    }
}

impl Drop for FfmpegVideoWriter {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::warn!("output: failed to close video: {:#}", err);
        }
    }
}
