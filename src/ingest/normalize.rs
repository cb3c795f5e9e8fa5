use anyhow::{anyhow, Context, Result};

use crate::frame::{frame_len, swap_red_blue, Frame};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Bgr24,
    Rgb24,
    Yuyv,
    Nv12,
    Mjpeg,
}

/// Convert a captured buffer into a BGR frame.
pub(crate) fn normalize_to_frame(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
    index: u64,
) -> Result<Frame> {
    match format {
        PixelFormat::Bgr24 => {
            expect_len(pixels, frame_len(width, height)?, "BGR")?;
            Frame::from_bgr(pixels.to_vec(), width, height, index)
        }
        PixelFormat::Rgb24 => {
            expect_len(pixels, frame_len(width, height)?, "RGB")?;
            let mut bgr = pixels.to_vec();
            swap_red_blue(&mut bgr);
            Frame::from_bgr(bgr, width, height, index)
        }
        PixelFormat::Yuyv => yuyv_to_frame(pixels, width, height, index),
        PixelFormat::Nv12 => nv12_to_frame(pixels, width, height, index),
        PixelFormat::Mjpeg => {
            let decoded = image::load_from_memory_with_format(pixels, image::ImageFormat::Jpeg)
                .context("decode MJPEG frame")?
                .to_rgb8();
            Frame::from_rgb_image(&decoded, index)
        }
    }
}

fn expect_len(pixels: &[u8], expected: usize, what: &str) -> Result<()> {
    if pixels.len() != expected {
        return Err(anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            what,
            expected,
            pixels.len()
        ));
    }
    Ok(())
}

fn yuyv_to_frame(pixels: &[u8], width: u32, height: u32, index: u64) -> Result<Frame> {
    let w = width as usize;
    let h = height as usize;
    if w % 2 != 0 {
        return Err(anyhow!("YUYV frame width must be even, got {}", w));
    }
    let expected = w
        .checked_mul(h)
        .and_then(|v| v.checked_mul(2))
        .ok_or_else(|| anyhow!("YUYV frame dimensions overflow"))?;
    expect_len(pixels, expected, "YUYV")?;

    let mut bgr = Vec::with_capacity(frame_len(width, height)?);
    for quad in pixels.chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        push_bgr(&mut bgr, y0, u, v);
        push_bgr(&mut bgr, y1, u, v);
    }
    Frame::from_bgr(bgr, width, height, index)
}

fn nv12_to_frame(pixels: &[u8], width: u32, height: u32, index: u64) -> Result<Frame> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    let expected = y_plane
        .checked_add(y_plane / 2)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    expect_len(pixels, expected, "NV12")?;

    let mut bgr = Vec::with_capacity(y_plane * 3);
    for j in 0..h {
        for i in 0..w {
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            push_bgr(&mut bgr, pixels[j * w + i], pixels[uv_index], pixels[uv_index + 1]);
        }
    }
    Frame::from_bgr(bgr, width, height, index)
}

fn push_bgr(out: &mut Vec<u8>, y: u8, u: u8, v: u8) {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;

    out.push(clamp_to_u8(b));
    out.push(clamp_to_u8(g));
    out.push(clamp_to_u8(r));
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<()> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let frame = normalize_to_frame(&nv12, 2, 2, PixelFormat::Nv12, 0)?;
        assert_eq!(frame.as_bgr(), &[128u8; 12][..]);
        Ok(())
    }

    #[test]
    fn yuyv_conversion_produces_gray() -> Result<()> {
        let yuyv = vec![200u8, 128, 200, 128];
        let frame = normalize_to_frame(&yuyv, 2, 1, PixelFormat::Yuyv, 0)?;
        assert_eq!(frame.as_bgr(), &[200u8; 6][..]);
        Ok(())
    }

    #[test]
    fn rgb_is_swapped_to_bgr() -> Result<()> {
        let frame = normalize_to_frame(&[1, 2, 3], 1, 1, PixelFormat::Rgb24, 4)?;
        assert_eq!(frame.as_bgr(), &[3, 2, 1]);
        assert_eq!(frame.index(), 4);
        Ok(())
    }

    #[test]
    fn rejects_short_buffers() {
        assert!(normalize_to_frame(&[0u8; 5], 1, 2, PixelFormat::Bgr24, 0).is_err());
        assert!(normalize_to_frame(&[0u8; 3], 2, 1, PixelFormat::Yuyv, 0).is_err());
    }
}
