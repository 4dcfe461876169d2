//! Vision model detections.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in image pixels: `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox(pub [f32; 4]);

impl BoundingBox {
    /// Build from the model's coordinate list. Anything other than four
    /// coordinates is treated as "no box".
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_coords(values: &[f64]) -> Option<Self> {
        match values {
            [x1, y1, x2, y2] => Some(Self([*x1 as f32, *y1 as f32, *x2 as f32, *y2 as f32])),
            _ => None,
        }
    }
}

/// One detection emitted by the recognition service for a single photograph.
///
/// `confidence` is always normalized to `0.0..=1.0`; the recognition client
/// rescales percentage values before they reach the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedTool {
    pub tool_type_id: u64,
    pub confidence: f32,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

impl RecognizedTool {
    pub fn new(tool_type_id: u64, confidence: f32, embedding: Vec<f32>) -> Self {
        Self {
            tool_type_id,
            confidence,
            embedding,
            bbox: None,
        }
    }

    #[must_use]
    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }
}
