//! YOLO pre/post-processing shared by model backends.
//!
//! The exported hardhat model takes a square letterboxed RGB tensor and
//! emits one column per anchor: `cx, cy, w, h` followed by one score per
//! class. This module holds the geometry and decoding so it can be tested
//! without a runtime.

use anyhow::{anyhow, Result};

use crate::detect::result::{BoundingBox, Detection, HardhatClass};

/// Padding value used by the model's training-time letterbox.
pub const LETTERBOX_FILL: u8 = 114;

/// Maximum boxes kept per frame after NMS.
pub const MAX_DETECTIONS: usize = 300;

#[derive(Clone, Copy, Debug)]
pub struct DecodeParams {
    /// Candidates below this score are dropped before NMS.
    pub min_confidence: f32,
    pub iou_threshold: f32,
    pub num_classes: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            min_confidence: 0.25,
            iou_threshold: 0.7,
            num_classes: 2,
        }
    }
}

/// Placement of a frame inside the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub size: u32,
    pub scale: f32,
    pub resized_width: u32,
    pub resized_height: u32,
    pub pad_x: u32,
    pub pad_y: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, size: u32) -> Result<Self> {
        if width == 0 || height == 0 || size == 0 {
            return Err(anyhow!("letterbox dimensions must be non-zero"));
        }
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let resized_width = ((width as f32 * scale).round() as u32).clamp(1, size);
        let resized_height = ((height as f32 * scale).round() as u32).clamp(1, size);
        Ok(Self {
            size,
            scale,
            resized_width,
            resized_height,
            pad_x: (size - resized_width) / 2,
            pad_y: (size - resized_height) / 2,
        })
    }

    /// Map a model-space x coordinate back to the source frame.
    fn unmap_x(&self, x: f32) -> f32 {
        (x - self.pad_x as f32) / self.scale
    }

    fn unmap_y(&self, y: f32) -> f32 {
        (y - self.pad_y as f32) / self.scale
    }
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    class: usize,
    score: f32,
}

/// Decode a raw `[1, 4 + nc, N]` or `[1, N, 4 + nc]` output tensor.
pub fn decode_predictions(
    values: &[f32],
    shape: &[usize],
    params: &DecodeParams,
    letterbox: &Letterbox,
    frame_width: u32,
    frame_height: u32,
) -> Result<Vec<Detection>> {
    let rows = 4 + params.num_classes;
    let (channel_major, anchors) = match shape {
        [1, a, b] if *a == rows => (true, *b),
        [1, a, b] if *b == rows => (false, *a),
        _ => {
            return Err(anyhow!(
                "unexpected model output shape {:?} for {} classes",
                shape,
                params.num_classes
            ))
        }
    };
    if values.len() != rows * anchors {
        return Err(anyhow!(
            "model output has {} values, expected {}",
            values.len(),
            rows * anchors
        ));
    }

    let at = |row: usize, anchor: usize| {
        if channel_major {
            values[row * anchors + anchor]
        } else {
            values[anchor * rows + row]
        }
    };

    let max_x = frame_width as f32;
    let max_y = frame_height as f32;
    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class, score) = (0..params.num_classes)
            .map(|c| (c, at(4 + c, anchor)))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !score.is_finite() || score < params.min_confidence {
            continue;
        }
        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        candidates.push(Candidate {
            x1: letterbox.unmap_x(cx - w / 2.0).clamp(0.0, max_x),
            y1: letterbox.unmap_y(cy - h / 2.0).clamp(0.0, max_y),
            x2: letterbox.unmap_x(cx + w / 2.0).clamp(0.0, max_x),
            y2: letterbox.unmap_y(cy + h / 2.0).clamp(0.0, max_y),
            class,
            score: score.min(1.0),
        });
    }

    let kept = non_max_suppression(candidates, params.iou_threshold);
    Ok(kept
        .into_iter()
        .filter_map(|c| {
            let class = match HardhatClass::from_index(c.class) {
                Some(class) => class,
                None => {
                    log::debug!("dropping detection with unknown class index {}", c.class);
                    return None;
                }
            };
            Some(Detection::new(
                BoundingBox::new(c.x1 as i32, c.y1 as i32, c.x2 as i32, c.y2 as i32),
                class,
                c.score,
            ))
        })
        .collect())
}

/// Greedy per-class NMS, highest score first.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for cand in candidates {
        if kept.len() >= MAX_DETECTIONS {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class == cand.class && iou(k, &cand) > iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = ix * iy;
    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_major(anchors: &[[f32; 6]]) -> Vec<f32> {
        let n = anchors.len();
        let mut out = vec![0.0; 6 * n];
        for (i, a) in anchors.iter().enumerate() {
            for (row, v) in a.iter().enumerate() {
                out[row * n + i] = *v;
            }
        }
        out
    }

    #[test]
    fn letterbox_centres_wide_frame() -> Result<()> {
        let lb = Letterbox::fit(1280, 720, 640)?;
        assert_eq!(lb.scale, 0.5);
        assert_eq!((lb.resized_width, lb.resized_height), (640, 360));
        assert_eq!((lb.pad_x, lb.pad_y), (0, 140));
        Ok(())
    }

    #[test]
    fn decodes_and_unmaps_boxes() -> Result<()> {
        let lb = Letterbox::fit(1280, 720, 640)?;
        // One NO-Hardhat box centred at (320, 320) in model space, 100x100.
        let values = channel_major(&[[320.0, 320.0, 100.0, 100.0, 0.1, 0.9]]);
        let dets = decode_predictions(&values, &[1, 6, 1], &DecodeParams::default(), &lb, 1280, 720)?;

        assert_eq!(dets.len(), 1);
        let d = dets[0];
        assert_eq!(d.class, HardhatClass::NoHardhat);
        assert_eq!(d.bbox, BoundingBox::new(540, 260, 740, 460));
        assert!((d.confidence - 0.9).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn drops_low_scores_and_suppresses_overlaps() -> Result<()> {
        let lb = Letterbox::fit(640, 640, 640)?;
        let values = channel_major(&[
            [100.0, 100.0, 50.0, 50.0, 0.8, 0.0],
            [102.0, 101.0, 50.0, 50.0, 0.7, 0.0],
            [102.0, 101.0, 50.0, 50.0, 0.0, 0.6],
            [400.0, 400.0, 50.0, 50.0, 0.1, 0.1],
        ]);
        let dets = decode_predictions(&values, &[1, 6, 4], &DecodeParams::default(), &lb, 640, 640)?;

        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].class, HardhatClass::Hardhat);
        assert!((dets[0].confidence - 0.8).abs() < 1e-6);
        assert_eq!(dets[1].class, HardhatClass::NoHardhat);
        Ok(())
    }

    #[test]
    fn accepts_anchor_major_layout() -> Result<()> {
        let lb = Letterbox::fit(640, 640, 640)?;
        let values = vec![50.0, 50.0, 20.0, 20.0, 0.9, 0.05];
        let dets = decode_predictions(&values, &[1, 1, 6], &DecodeParams::default(), &lb, 640, 640)?;
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox, BoundingBox::new(40, 40, 60, 60));
        Ok(())
    }

    #[test]
    fn rejects_mismatched_shape() -> Result<()> {
        let lb = Letterbox::fit(640, 640, 640)?;
        let err = decode_predictions(&[0.0; 7], &[1, 7, 1], &DecodeParams::default(), &lb, 640, 640);
        assert!(err.is_err());
        Ok(())
    }
}
