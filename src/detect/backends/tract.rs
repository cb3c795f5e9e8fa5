#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::detect::yolo::{decode_predictions, DecodeParams, Letterbox, LETTERBOX_FILL};
use crate::frame::Frame;

/// Tract-based backend for the exported hardhat YOLO model.
///
/// Loads a local ONNX file once; every frame is letterboxed into the square
/// model input, run, and decoded back into frame coordinates.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    params: DecodeParams,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            params: DecodeParams::default(),
        })
    }

    /// Override the pre-NMS confidence filter and NMS IoU threshold.
    pub fn with_decode_params(mut self, min_confidence: f32, iou_threshold: f32) -> Self {
        self.params.min_confidence = min_confidence;
        self.params.iou_threshold = iou_threshold;
        self
    }

    fn build_input(&self, frame: &Frame, letterbox: &Letterbox) -> Result<Tensor> {
        let rgb = frame.to_rgb_image()?;
        let resized = imageops::resize(
            &rgb,
            letterbox.resized_width,
            letterbox.resized_height,
            FilterType::Triangle,
        );
        let mut canvas = RgbImage::from_pixel(
            self.input_size,
            self.input_size,
            Rgb([LETTERBOX_FILL; 3]),
        );
        imageops::overlay(
            &mut canvas,
            &resized,
            letterbox.pad_x as i64,
            letterbox.pad_y as i64,
        );

        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let letterbox = Letterbox::fit(frame.width(), frame.height(), self.input_size)?;
        let input = self.build_input(frame, &letterbox)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let values: Vec<f32> = view.iter().copied().collect();

        decode_predictions(
            &values,
            &shape,
            &self.params,
            &letterbox,
            frame.width(),
            frame.height(),
        )
    }

    fn warm_up(&mut self) -> Result<()> {
        let frame = Frame::filled(
            self.input_size,
            self.input_size,
            crate::frame::Bgr::BLACK,
            0,
        )?;
        self.detect(&frame).map(|_| ())
    }
}
