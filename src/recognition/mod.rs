//! Recognition: turning a photograph into classified tool detections.
//!
//! - [`similarity`]: cosine similarity between embeddings
//! - [`classifier`]: four-bucket classification against the expected set
//! - [`client`]: HTTP client for the remote vision model
//!
//! The vision model itself is opaque; the core only sees it through
//! [`RecognitionService`].

pub mod classifier;
pub mod client;
pub mod similarity;

pub use classifier::{classify, Classification, ClassifiedTool, Thresholds};
pub use client::HttpRecognitionClient;
pub use similarity::{cosine_similarity, SimilarityError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::RecognizedTool;

/// Scale the vision model reports detection confidence on.
///
/// Fixed per deployment. Values outside the scale are malformed payloads,
/// never reinterpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceScale {
    /// `0.0..=1.0`
    #[default]
    Unit,
    /// `0.0..=100.0`
    Percent,
}

impl ConfidenceScale {
    fn max(self) -> f32 {
        match self {
            Self::Unit => 1.0,
            Self::Percent => 100.0,
        }
    }

    /// Map a raw model value onto `0.0..=1.0`, or `None` if it is off scale.
    pub fn normalize(self, raw: f32) -> Option<f32> {
        let max = self.max();
        (raw.is_finite() && (0.0..=max).contains(&raw)).then(|| raw / max)
    }
}

/// Request for one photograph already uploaded to image storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    /// Storage key of the uploaded image
    pub image_id: String,
    /// URL the recognition service fetches the image from
    pub image_url: String,
    /// Detections below this confidence are dropped by the model
    pub confidence_floor: f32,
}

/// Detections for one photograph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResult {
    pub detections: Vec<RecognizedTool>,
    /// Annotated image the model rendered, when it produced one
    pub debug_image_url: Option<String>,
}

/// Recognition service errors
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("recognition service unavailable: {0}")]
    Unavailable(String),
    #[error("recognition service returned status {0}")]
    Status(u16),
    #[error("malformed recognition payload: {0}")]
    Decode(String),
    #[error("failed to build recognition client: {0}")]
    Client(String),
}

/// Remote vision model.
///
/// Implementations must be cancel-safe: the orchestrator drops the future
/// when the request is cancelled or times out.
#[async_trait]
pub trait RecognitionService: Send + Sync {
    async fn scan(&self, request: &ScanRequest) -> Result<ScanResult, RecognitionError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}
