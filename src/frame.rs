//! Frame buffer handed through one iteration of the annotator loop.
//!
//! - `Frame`: tightly packed BGR pixels, annotated in place.
//! - `Bgr`: a single pixel / drawing color in BGR channel order.
//!
//! Frames are produced by the ingestion layer, mutated by the annotator, then
//! written to the output sink, the display sink and (for violations) to a
//! snapshot file. A frame lives for exactly one loop iteration.

use anyhow::{anyhow, Result};
use image::RgbImage;

/// Bytes per pixel for BGR24.
pub const BYTES_PER_PIXEL: usize = 3;

/// A color in BGR channel order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Bgr {
    pub b: u8,
    pub g: u8,
    pub r: u8,
}

impl Bgr {
    pub const RED: Bgr = Bgr::new(0, 0, 255);
    pub const GREEN: Bgr = Bgr::new(0, 255, 0);
    pub const WHITE: Bgr = Bgr::new(255, 255, 255);
    pub const BLACK: Bgr = Bgr::new(0, 0, 0);

    pub const fn new(b: u8, g: u8, r: u8) -> Self {
        Self { b, g, r }
    }
}

/// Decoded video frame in BGR24.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    /// 0-based position of this frame within the current run.
    index: u64,
}

impl Frame {
    /// Wrap tightly packed BGR24 bytes.
    pub fn from_bgr(data: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = frame_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "BGR frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            index,
        })
    }

    /// Frame filled with a single color.
    pub fn filled(width: u32, height: u32, color: Bgr, index: u64) -> Result<Self> {
        let len = frame_len(width, height)?;
        let mut data = Vec::with_capacity(len);
        for _ in 0..len / BYTES_PER_PIXEL {
            data.extend_from_slice(&[color.b, color.g, color.r]);
        }
        Self::from_bgr(data, width, height, index)
    }

    /// Convert an RGB image (e.g. a decoded JPEG) into a BGR frame.
    pub fn from_rgb_image(image: &RgbImage, index: u64) -> Result<Self> {
        let (width, height) = image.dimensions();
        let mut data = image.as_raw().clone();
        swap_red_blue(&mut data);
        Self::from_bgr(data, width, height, index)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn as_bgr(&self) -> &[u8] {
        &self.data
    }

    /// Pixel at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: i32, y: i32) -> Option<Bgr> {
        let offset = self.offset(x, y)?;
        Some(Bgr::new(
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ))
    }

    /// Fill the inclusive rectangle `(x0, y0)..=(x1, y1)`, clipped to the frame.
    pub fn fill_rect(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: Bgr) {
        let (left, right) = (x0.min(x1), x0.max(x1));
        let (top, bottom) = (y0.min(y1), y0.max(y1));
        let left = left.max(0);
        let top = top.max(0);
        let right = right.min(self.width as i32 - 1);
        let bottom = bottom.min(self.height as i32 - 1);
        if left > right || top > bottom {
            return;
        }
        let row_bytes = self.width as usize * BYTES_PER_PIXEL;
        for y in top..=bottom {
            let row = y as usize * row_bytes;
            for x in left..=right {
                let offset = row + x as usize * BYTES_PER_PIXEL;
                self.data[offset] = color.b;
                self.data[offset + 1] = color.g;
                self.data[offset + 2] = color.r;
            }
        }
    }

    /// RGB copy for encoders that expect RGB channel order.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        let mut rgb = self.data.clone();
        swap_red_blue(&mut rgb);
        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    fn offset(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL)
    }
}

/// Byte length of a BGR24 frame.
pub fn frame_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(BYTES_PER_PIXEL))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

/// RGB <-> BGR in place.
pub(crate) fn swap_red_blue(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
        px.swap(0, 2);
    }
}
