use serde::Serialize;

/// Classes produced by the hardhat model, in model output order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum HardhatClass {
    #[serde(rename = "Hardhat")]
    Hardhat,
    #[serde(rename = "NO-Hardhat")]
    NoHardhat,
}

impl HardhatClass {
    /// Model class index -> class. Unknown indices yield `None`.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Hardhat),
            1 => Some(Self::NoHardhat),
            _ => None,
        }
    }

    /// Label drawn on the frame.
    pub fn label(self) -> &'static str {
        match self {
            Self::Hardhat => "Hardhat",
            Self::NoHardhat => "NO-Hardhat",
        }
    }

    /// True for the class that indicates missing safety equipment.
    pub fn is_violation(self) -> bool {
        matches!(self, Self::NoHardhat)
    }
}

/// Axis-aligned box in integer pixel coordinates (top-left, bottom-right).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

/// One detector output box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class: HardhatClass,
    /// Raw model confidence in [0, 1].
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, class: HardhatClass, confidence: f32) -> Self {
        Self {
            bbox,
            class,
            confidence,
        }
    }

    /// Confidence rounded up to two decimals, as shown in the label and
    /// compared against the display threshold.
    pub fn display_confidence(&self) -> f32 {
        ((self.confidence * 100.0).ceil() / 100.0).clamp(0.0, 1.0)
    }
}
