//! RTSP frame source for IP/CCTV cameras.
//!
//! Uses GStreamer (`rtsp-gstreamer` feature) to decode the stream into BGR
//! frames. `stub://` URLs produce an endless synthetic feed.

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::{anyhow, Result};
#[cfg(feature = "rtsp-gstreamer")]
use gstreamer::prelude::*;

use super::synthetic::{self, SyntheticSource};
use super::{FrameSource, SourceStats};
#[cfg(feature = "rtsp-gstreamer")]
use crate::frame::BYTES_PER_PIXEL;
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// Camera URL, `rtsp://`, `rtsps://` or `stub://`.
    pub url: String,
    /// Expected camera rate; scales the pull timeout.
    pub target_fps: u32,
    /// Size of synthetic frames. Real streams keep their native size.
    pub width: u32,
    pub height: u32,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://127.0.0.1:554/live".to_string(),
            target_fps: 30,
            width: 1280,
            height: 720,
        }
    }
}

/// IP/CCTV camera source.
pub struct RtspSource {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(Box<CameraStream>),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        if synthetic::is_stub(&config.url) {
            let length = synthetic::stub_length(&config.url)?;
            return Ok(Self {
                backend: RtspBackend::Synthetic(SyntheticSource::new(
                    &config.url,
                    config.width,
                    config.height,
                    length,
                )?),
            });
        }
        validate_url(&config.url)?;
        #[cfg(feature = "rtsp-gstreamer")]
        {
            Ok(Self {
                backend: RtspBackend::Gstreamer(Box::new(CameraStream::open(config)?)),
            })
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            anyhow::bail!("RTSP requires the rtsp-gstreamer feature")
        }
    }

    fn inner(&mut self) -> &mut dyn FrameSource {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source,
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.as_mut(),
        }
    }
}

impl FrameSource for RtspSource {
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
            RtspBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.stats(),
        }
    }
}

/// Scheme check; URLs carrying whitespace or control characters are refused.
fn validate_url(url: &str) -> Result<()> {
    if !url.starts_with("rtsp://") && !url.starts_with("rtsps://") {
        return Err(anyhow!("RTSP source expects an rtsp:// URL, got '{}'", url));
    }
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(anyhow!("RTSP URL '{}' contains whitespace or control characters", url));
    }
    Ok(())
}

/// The URL is set on the `rtspsrc` element as a property after parsing, never
/// spliced into the launch line.
#[cfg_attr(not(feature = "rtsp-gstreamer"), allow(dead_code))]
const CAMERA_ELEMENT: &str = "camera";
#[cfg_attr(not(feature = "rtsp-gstreamer"), allow(dead_code))]
const APPSINK_ELEMENT: &str = "frames";

#[cfg_attr(not(feature = "rtsp-gstreamer"), allow(dead_code))]
fn pipeline_description() -> String {
    format!(
        "rtspsrc name={CAMERA_ELEMENT} latency=0 ! decodebin ! videoconvert ! \
         video/x-raw,format=BGR ! appsink name={APPSINK_ELEMENT} sync=false max-buffers=1 drop=true"
    )
}

/// Frames pulled from `rtspsrc ! decodebin ! videoconvert ! appsink`.
#[cfg(feature = "rtsp-gstreamer")]
struct CameraStream {
    url: String,
    pipeline: gstreamer::Pipeline,
    sink: gstreamer_app::AppSink,
    pull_timeout: gstreamer::ClockTime,
    pulled: u64,
}

#[cfg(feature = "rtsp-gstreamer")]
impl CameraStream {
    fn open(config: RtspConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        let (pipeline, sink) = launch_pipeline(&config.url)?;
        Ok(Self {
            pull_timeout: pull_timeout(config.target_fps),
            url: config.url,
            pipeline,
            sink,
            pulled: 0,
        })
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn launch_pipeline(url: &str) -> Result<(gstreamer::Pipeline, gstreamer_app::AppSink)> {
    let pipeline = gstreamer::parse::launch(&pipeline_description())
        .with_context(|| format!("build pipeline for {url}"))?
        .downcast::<gstreamer::Pipeline>()
        .map_err(|_| anyhow!("launch description for {} did not yield a pipeline", url))?;
    pipeline
        .by_name(CAMERA_ELEMENT)
        .context("pipeline has no rtspsrc element")?
        .set_property("location", url);
    let sink = pipeline
        .by_name(APPSINK_ELEMENT)
        .context("pipeline has no 'frames' appsink")?
        .downcast::<gstreamer_app::AppSink>()
        .map_err(|_| anyhow!("'frames' element is not an appsink"))?;
    sink.set_caps(Some(
        &gstreamer::Caps::builder("video/x-raw")
            .field("format", "BGR")
            .build(),
    ));
    Ok((pipeline, sink))
}

/// Thirty frame intervals, never below two seconds.
#[cfg(feature = "rtsp-gstreamer")]
fn pull_timeout(target_fps: u32) -> gstreamer::ClockTime {
    let interval_ms = 1000u64.checked_div(target_fps as u64).unwrap_or(0);
    gstreamer::ClockTime::from_mseconds((interval_ms * 30).max(2_000))
}

#[cfg(feature = "rtsp-gstreamer")]
impl FrameSource for CameraStream {
    fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .with_context(|| format!("start pipeline for {}", self.url))?;
        log::info!("source: streaming {}", self.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let sample = match self.sink.try_pull_sample(self.pull_timeout) {
            Some(sample) => sample,
            None if self.sink.is_eos() => return Ok(None),
            None => return Err(anyhow!("no frame from {} within {}", self.url, self.pull_timeout)),
        };
        let frame = sample_to_frame(&sample, self.pulled)?;
        self.pulled += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("source: could not stop pipeline for {}: {}", self.url, err);
        }
        log::info!("source: released {} after {} frames", self.url, self.pulled);
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.pulled,
            location: self.url.clone(),
        }
    }
}

/// Copy a BGR sample into a packed frame, dropping row padding.
#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_frame(sample: &gstreamer::Sample, index: u64) -> Result<Frame> {
    let info = sample
        .caps()
        .context("sample without caps")
        .and_then(|caps| {
            gstreamer_video::VideoInfo::from_caps(caps).context("caps are not raw video")
        })?;
    let buffer = sample.buffer().context("sample without buffer")?;
    let map = buffer.map_readable().context("map sample buffer")?;

    let (width, height) = (info.width(), info.height());
    let packed = width as usize * BYTES_PER_PIXEL;
    let stride = info.stride()[0] as usize;
    let mut bgr = Vec::with_capacity(packed * height as usize);
    for row in 0..height as usize {
        let offset = row * stride;
        let line = map
            .as_slice()
            .get(offset..offset + packed)
            .with_context(|| format!("row {row} exceeds sample buffer"))?;
        bgr.extend_from_slice(line);
    }
    Frame::from_bgr(bgr, width, height, index)
}
