use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection, HardhatClass};
use crate::frame::Frame;

/// Model-free backend for tests and demo runs.
///
/// - `scripted`: returns a fixed list of detections per frame index; frames
///   past the end of the script get no detections.
/// - `seeded`: emits deterministic pseudo-random boxes so the whole pipeline
///   can run without an ONNX model.
pub struct StubBackend {
    mode: StubMode,
}

enum StubMode {
    Scripted(Vec<Vec<Detection>>),
    Seeded(StdRng),
}

impl StubBackend {
    pub fn scripted(script: Vec<Vec<Detection>>) -> Self {
        Self {
            mode: StubMode::Scripted(script),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            mode: StubMode::Seeded(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::seeded(0)
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        match &mut self.mode {
            StubMode::Scripted(script) => Ok(script
                .get(frame.index() as usize)
                .cloned()
                .unwrap_or_default()),
            StubMode::Seeded(rng) => Ok(random_detections(rng, frame.width(), frame.height())),
        }
    }
}

fn random_detections(rng: &mut StdRng, width: u32, height: u32) -> Vec<Detection> {
    if width < 8 || height < 8 {
        return Vec::new();
    }
    let count = rng.gen_range(0..=2);
    (0..count)
        .map(|_| {
            let w = rng.gen_range(4..=(width / 4).max(4)) as i32;
            let h = rng.gen_range(4..=(height / 3).max(4)) as i32;
            let x1 = rng.gen_range(0..(width as i32 - w).max(1));
            let y1 = rng.gen_range(0..(height as i32 - h).max(1));
            let class = if rng.gen_bool(0.3) {
                HardhatClass::NoHardhat
            } else {
                HardhatClass::Hardhat
            };
            Detection::new(
                BoundingBox::new(x1, y1, x1 + w, y1 + h),
                class,
                rng.gen_range(0.3f32..1.0),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Bgr;

    #[test]
    fn scripted_backend_follows_frame_index() -> Result<()> {
        let det = Detection::new(BoundingBox::new(1, 1, 5, 5), HardhatClass::NoHardhat, 0.9);
        let mut backend = StubBackend::scripted(vec![vec![], vec![det]]);

        let f0 = Frame::filled(8, 8, Bgr::BLACK, 0)?;
        let f1 = Frame::filled(8, 8, Bgr::BLACK, 1)?;
        let f2 = Frame::filled(8, 8, Bgr::BLACK, 2)?;

        assert!(backend.detect(&f0)?.is_empty());
        assert_eq!(backend.detect(&f1)?, vec![det]);
        assert!(backend.detect(&f2)?.is_empty());
        Ok(())
    }

    #[test]
    fn seeded_backend_is_deterministic_and_in_bounds() -> Result<()> {
        let frame = Frame::filled(64, 48, Bgr::BLACK, 0)?;
        let mut a = StubBackend::seeded(42);
        let mut b = StubBackend::seeded(42);

        for _ in 0..20 {
            let da = a.detect(&frame)?;
            assert_eq!(da, b.detect(&frame)?);
            for d in da {
                assert!(d.bbox.x1 >= 0 && d.bbox.x2 <= 64);
                assert!(d.bbox.y1 >= 0 && d.bbox.y2 <= 48);
                assert!((0.0..=1.0).contains(&d.confidence));
            }
        }
        Ok(())
    }
}
