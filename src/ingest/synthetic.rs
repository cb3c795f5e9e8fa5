//! Synthetic frame source behind `stub://` locations.
//!
//! Produces a moving gradient so downstream encoders see changing content.
//! A length can be given as `stub://name?frames=N`; file-like sources default
//! to `DEFAULT_CLIP_FRAMES`, live sources run until stopped.

use anyhow::{anyhow, Result};

use super::{FrameSource, SourceStats};
use crate::frame::{frame_len, Frame};

pub const STUB_SCHEME: &str = "stub://";

/// Length of a synthetic "file" when no `frames=` parameter is given.
pub const DEFAULT_CLIP_FRAMES: u64 = 90;

pub fn is_stub(location: &str) -> bool {
    location.starts_with(STUB_SCHEME)
}

/// Parse the optional `frames=N` query of a stub location.
pub fn stub_length(location: &str) -> Result<Option<u64>> {
    let Some(query) = location.split_once('?').map(|(_, q)| q) else {
        return Ok(None);
    };
    for pair in query.split('&') {
        if let Some(("frames", value)) = pair.split_once('=') {
            let frames = value
                .parse()
                .map_err(|_| anyhow!("invalid frames parameter in '{}'", location))?;
            return Ok(Some(frames));
        }
    }
    Ok(None)
}

pub struct SyntheticSource {
    location: String,
    width: u32,
    height: u32,
    length: Option<u64>,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(location: &str, width: u32, height: u32, length: Option<u64>) -> Result<Self> {
        frame_len(width, height)?;
        if width == 0 || height == 0 {
            return Err(anyhow!("synthetic frames must have non-zero size"));
        }
        Ok(Self {
            location: location.to_string(),
            width,
            height,
            length,
            frame_count: 0,
            connected: false,
        })
    }

    fn generate(&self) -> Result<Frame> {
        let shift = self.frame_count as usize;
        let mut data = Vec::with_capacity(frame_len(self.width, self.height)?);
        for y in 0..self.height as usize {
            for x in 0..self.width as usize {
                data.push(((x + shift) % 256) as u8);
                data.push(((y + shift) % 256) as u8);
                data.push(((x + y) % 256) as u8);
            }
        }
        Frame::from_bgr(data, self.width, self.height, self.frame_count)
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("source: connected to {} (synthetic)", self.location);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source {} not connected", self.location));
        }
        if self.length.is_some_and(|len| self.frame_count >= len) {
            return Ok(None);
        }
        let frame = self.generate()?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if self.connected {
            log::info!("source: released {} (synthetic)", self.location);
        }
        self.connected = false;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            location: self.location.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stub_length() -> Result<()> {
        assert_eq!(stub_length("stub://clip")?, None);
        assert_eq!(stub_length("stub://clip?frames=5")?, Some(5));
        assert_eq!(stub_length("stub://clip?fps=3&frames=0")?, Some(0));
        assert!(stub_length("stub://clip?frames=x").is_err());
        Ok(())
    }

    #[test]
    fn finite_source_ends_and_indexes_frames() -> Result<()> {
        let mut source = SyntheticSource::new("stub://clip", 16, 8, Some(3))?;
        source.connect()?;

        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame()? {
            assert_eq!((frame.width(), frame.height()), (16, 8));
            indices.push(frame.index());
        }
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 3);
        Ok(())
    }

    #[test]
    fn reading_before_connect_fails() -> Result<()> {
        let mut source = SyntheticSource::new("stub://cam", 4, 4, None)?;
        assert!(source.next_frame().is_err());
        Ok(())
    }
}
