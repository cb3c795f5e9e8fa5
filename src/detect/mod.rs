mod backend;
mod backends;
mod result;
pub mod yolo;

use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::config::DetectorSettings;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoundingBox, Detection, HardhatClass};

/// Which detector implementation to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Seeded pseudo-random detections, no model required.
    #[default]
    Stub,
    /// ONNX model via tract (feature: backend-tract).
    Tract,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

/// Build the configured backend and run its warm-up hook.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let mut backend: Box<dyn DetectorBackend> = match settings.backend {
        BackendKind::Stub => Box::new(StubBackend::seeded(settings.seed)),
        BackendKind::Tract => {
            #[cfg(feature = "backend-tract")]
            {
                Box::new(
                    TractBackend::new(&settings.model_path, settings.input_size)?
                        .with_decode_params(settings.min_confidence, settings.iou_threshold),
                )
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                return Err(anyhow!(
                    "detector backend 'tract' requires the backend-tract feature"
                ));
            }
        }
    };
    backend.warm_up()?;
    log::info!("detector backend '{}' ready", backend.name());
    Ok(backend)
}
