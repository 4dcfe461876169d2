//! Scan evidence: one photograph per checkout/checkin attempt plus the
//! detections found in it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::recognition::{BoundingBox, RecognizedTool};

/// Which way the tools were moving when the photograph was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDirection {
    /// Tools handed to the engineer
    Checkout,
    /// Tools returned by the engineer
    Checkin,
}

impl ScanDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checkout => "checkout",
            Self::Checkin => "checkin",
        }
    }
}

impl std::fmt::Display for ScanDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub id: u64,
    pub transaction_id: u64,
    pub direction: ScanDirection,
    pub image_url: String,
    pub debug_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Scan before the store has assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewScan {
    pub transaction_id: u64,
    pub direction: ScanDirection,
    pub image_url: String,
    pub debug_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Persisted form of a [`RecognizedTool`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanDetail {
    pub id: u64,
    pub scan_id: u64,
    pub tool_type_id: u64,
    pub confidence: f32,
    pub embedding: Vec<f32>,
    pub bbox: Option<BoundingBox>,
}

impl ScanDetail {
    /// Rebuild the detection this row was written from.
    pub fn to_recognized(&self) -> RecognizedTool {
        RecognizedTool {
            tool_type_id: self.tool_type_id,
            confidence: self.confidence,
            embedding: self.embedding.clone(),
            bbox: self.bbox,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewScanDetail {
    pub scan_id: u64,
    pub tool_type_id: u64,
    pub confidence: f32,
    pub embedding: Vec<f32>,
    pub bbox: Option<BoundingBox>,
}

impl NewScanDetail {
    pub fn from_recognized(scan_id: u64, tool: &RecognizedTool) -> Self {
        Self {
            scan_id,
            tool_type_id: tool.tool_type_id,
            confidence: tool.confidence,
            embedding: tool.embedding.clone(),
            bbox: tool.bbox,
        }
    }
}
