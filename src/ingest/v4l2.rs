//! V4L2 webcam source.
//!
//! Captures from a local device node (e.g. /dev/video0), requesting the
//! configured size, and normalizes YUYV / NV12 / RGB / BGR / MJPEG buffers to
//! BGR frames. `stub://` device paths produce an endless synthetic feed.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_frame, PixelFormat};
use super::synthetic::{self, SyntheticSource};
use super::{FrameSource, SourceStats};
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device node, or a `stub://` location.
    pub device: String,
    pub target_fps: u32,
    /// Requested capture size; the driver may pick another.
    pub width: u32,
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: 1280,
            height: 720,
        }
    }
}

/// Local webcam.
pub struct V4l2Source {
    backend: V4l2Backend,
}

enum V4l2Backend {
    Synthetic(SyntheticSource),
    Device(Box<Webcam>),
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Result<Self> {
        let backend = if synthetic::is_stub(&config.device) {
            let length = synthetic::stub_length(&config.device)?;
            V4l2Backend::Synthetic(SyntheticSource::new(
                &config.device,
                config.width,
                config.height,
                length,
            )?)
        } else {
            V4l2Backend::Device(Box::new(Webcam::new(config)))
        };
        Ok(Self { backend })
    }

    fn inner(&mut self) -> &mut dyn FrameSource {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source,
            V4l2Backend::Device(source) => source.as_mut(),
        }
    }
}

impl FrameSource for V4l2Source {
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
            V4l2Backend::Synthetic(source) => source.stats(),
            V4l2Backend::Device(source) => source.stats(),
        }
    }
}

/// Negotiated capture geometry.
#[derive(Clone, Copy, Debug)]
struct Negotiated {
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// Memory-mapped capture on a real device node.
struct Webcam {
    config: V4l2Config,
    capture: Option<Capture>,
    negotiated: Negotiated,
    captured: u64,
}

#[self_referencing]
struct Capture {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl Webcam {
    fn new(config: V4l2Config) -> Self {
        Self {
            negotiated: Negotiated {
                width: config.width,
                height: config.height,
                format: PixelFormat::Yuyv,
            },
            config,
            capture: None,
            captured: 0,
        }
    }

    /// Ask for YUYV at the configured size and rate; keep whatever the
    /// driver settles on.
    fn negotiate(&self, device: &mut v4l::Device) -> Result<Negotiated> {
        use v4l::video::Capture as _;

        let node = &self.config.device;
        let mut wanted = device.format().with_context(|| format!("query format of {node}"))?;
        wanted.width = self.config.width;
        wanted.height = self.config.height;
        wanted.fourcc = v4l::FourCC::new(b"YUYV");
        let actual = device.set_format(&wanted).or_else(|err| {
            log::warn!("webcam: {} rejected {}x{} YUYV: {}", node, wanted.width, wanted.height, err);
            device.format()
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("webcam: {} rejected {} fps: {}", node, self.config.target_fps, err);
            }
        }

        Ok(Negotiated {
            width: actual.width,
            height: actual.height,
            format: pixel_format_for(&actual.fourcc.repr)?,
        })
    }
}

impl FrameSource for Webcam {
    fn connect(&mut self) -> Result<()> {
        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open webcam {}", self.config.device))?;
        self.negotiated = self.negotiate(&mut device)?;

        self.capture = Some(
            CaptureTryBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(
                        device,
                        v4l::buffer::Type::VideoCapture,
                        4,
                    )
                    .context("map webcam capture buffers")
                },
            }
            .try_build()?,
        );

        let Negotiated { width, height, format } = self.negotiated;
        log::info!(
            "webcam: capturing {} at {}x{} ({:?})",
            self.config.device,
            width,
            height,
            format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let Negotiated { width, height, format } = self.negotiated;
        let index = self.captured;
        let capture = self.capture.as_mut().context("webcam not connected")?;
        let frame = capture.with_stream_mut(|stream| -> Result<Frame> {
            let (buf, meta) = stream.next().context("dequeue webcam buffer")?;
            let filled = match meta.bytesused as usize {
                0 => buf.len(),
                n => n.min(buf.len()),
            };
            let expected = captured_len(format, width, height)?.unwrap_or(filled);
            let pixels = buf
                .get(..expected.min(filled))
                .filter(|pixels| pixels.len() == expected)
                .ok_or_else(|| anyhow!("webcam buffer holds {} of {} bytes", filled, expected))?;
            normalize_to_frame(pixels, width, height, format, index)
        })?;

        self.captured += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if self.capture.take().is_some() {
            log::info!(
                "webcam: released {} after {} frames",
                self.config.device,
                self.captured
            );
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.captured,
            location: self.config.device.clone(),
        }
    }
}

fn pixel_format_for(fourcc: &[u8; 4]) -> Result<PixelFormat> {
    match fourcc {
        b"YUYV" => Ok(PixelFormat::Yuyv),
        b"NV12" => Ok(PixelFormat::Nv12),
        b"RGB3" => Ok(PixelFormat::Rgb24),
        b"BGR3" => Ok(PixelFormat::Bgr24),
        b"MJPG" => Ok(PixelFormat::Mjpeg),
        other => Err(anyhow!(
            "unsupported webcam pixel format {}",
            String::from_utf8_lossy(other)
        )),
    }
}

/// Bytes a raw capture must contain; `None` for compressed formats.
fn captured_len(format: PixelFormat, width: u32, height: u32) -> Result<Option<usize>> {
    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("webcam frame dimensions overflow"))?;
    Ok(match format {
        PixelFormat::Yuyv => Some(pixels * 2),
        PixelFormat::Nv12 => Some(pixels + pixels / 2),
        PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(pixels * 3),
        PixelFormat::Mjpeg => None,
    })
}
