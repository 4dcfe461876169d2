//! Recognition client: HTTP client for the vision model service
//!
//! `GET {base}/analyze/?image_id=..&url=..&threshold=..` returns
//!
//! ```json
//! {
//!   "image_id": "checkout/5b9c...",
//!   "instruments": [
//!     { "class": 0, "confidence": 0.97, "embedding": [...], "bbox": [10, 20, 200, 90], "hash": 1234 }
//!   ],
//!   "debug_image_url": "https://..."
//! }
//! ```
//!
//! The model's `class` is a zero-based index; catalog ids start at the
//! configured offset. `confidence` is read on the configured
//! [`ConfidenceScale`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ConfidenceScale, RecognitionError, RecognitionService, ScanRequest, ScanResult};
use crate::types::{BoundingBox, RecognizedTool};

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    image_id: Option<String>,
    #[serde(default)]
    instruments: Vec<Instrument>,
    #[serde(default)]
    debug_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Instrument {
    class: i64,
    confidence: f32,
    #[serde(default)]
    embedding: Vec<f32>,
    #[serde(default)]
    bbox: Vec<f64>,
}

/// HTTP client for the recognition service
#[derive(Clone)]
pub struct HttpRecognitionClient {
    http: reqwest::Client,
    base_url: String,
    class_id_offset: u64,
    confidence_scale: ConfidenceScale,
}

impl HttpRecognitionClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        class_id_offset: u64,
        confidence_scale: ConfidenceScale,
    ) -> Result<Self, RecognitionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RecognitionError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            class_id_offset,
            confidence_scale,
        })
    }

    /// Get base URL for logging
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RecognitionService for HttpRecognitionClient {
    async fn scan(&self, request: &ScanRequest) -> Result<ScanResult, RecognitionError> {
        let threshold = request.confidence_floor.to_string();
        let resp = self
            .http
            .get(format!("{}/analyze/", self.base_url))
            .query(&[
                ("image_id", request.image_id.as_str()),
                ("url", request.image_url.as_str()),
                ("threshold", threshold.as_str()),
            ])
            .send()
            .await
            .map_err(|e| RecognitionError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), image_id = %request.image_id, "Recognition service returned non-success status");
            return Err(RecognitionError::Status(status.as_u16()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| RecognitionError::Unavailable(e.to_string()))?;

        let result = decode_response(&body, self.class_id_offset, self.confidence_scale)?;
        debug!(
            image_id = %request.image_id,
            detections = result.detections.len(),
            "Recognition service responded"
        );
        Ok(result)
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

/// Decode an `/analyze/` response body into core detections.
///
/// Confidence is divided by the scale's maximum. Off-scale confidences and
/// negative class indices are rejected.
pub fn decode_response(
    body: &[u8],
    class_id_offset: u64,
    scale: ConfidenceScale,
) -> Result<ScanResult, RecognitionError> {
    let parsed: AnalyzeResponse =
        serde_json::from_slice(body).map_err(|e| RecognitionError::Decode(e.to_string()))?;

    let mut detections = Vec::with_capacity(parsed.instruments.len());
    for (index, instrument) in parsed.instruments.into_iter().enumerate() {
        let class = u64::try_from(instrument.class).map_err(|_| {
            RecognitionError::Decode(format!(
                "instrument {index}: negative class index {}",
                instrument.class
            ))
        })?;
        let confidence = scale.normalize(instrument.confidence).ok_or_else(|| {
            RecognitionError::Decode(format!(
                "instrument {index}: confidence {} off the {scale:?} scale",
                instrument.confidence
            ))
        })?;

        let mut tool = RecognizedTool::new(class + class_id_offset, confidence, instrument.embedding);
        if let Some(bbox) = BoundingBox::from_coords(&instrument.bbox) {
            tool = tool.with_bbox(bbox);
        }
        detections.push(tool);
    }

    if let Some(image_id) = parsed.image_id.as_deref() {
        debug!(image_id, "Decoded recognition payload");
    }

    Ok(ScanResult {
        detections,
        debug_image_url: parsed.debug_image_url.filter(|u| !u.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_maps_class_with_offset() {
        let body = br#"{
            "image_id": "checkout/abc",
            "instruments": [
                {"class": 0, "confidence": 0.97, "embedding": [0.1, 0.2], "bbox": [1, 2, 3, 4], "hash": 77}
            ],
            "debug_image_url": "http://img/debug.jpg"
        }"#;
        let result = decode_response(body, 1, ConfidenceScale::Unit).unwrap();
        assert_eq!(result.detections.len(), 1);
        let d = &result.detections[0];
        assert_eq!(d.tool_type_id, 1);
        assert!((d.confidence - 0.97).abs() < 1e-6);
        assert_eq!(d.embedding, vec![0.1, 0.2]);
        assert_eq!(d.bbox, Some(BoundingBox([1.0, 2.0, 3.0, 4.0])));
        assert_eq!(result.debug_image_url.as_deref(), Some("http://img/debug.jpg"));
    }

    #[test]
    fn test_decode_rescales_percent_confidence() {
        let body = br#"{"instruments": [{"class": 4, "confidence": 87.5, "embedding": []}]}"#;
        let result = decode_response(body, 1, ConfidenceScale::Percent).unwrap();
        assert!((result.detections[0].confidence - 0.875).abs() < 1e-6);
        assert_eq!(result.detections[0].tool_type_id, 5);
        assert_eq!(result.detections[0].bbox, None);
    }

    #[test]
    fn test_percent_scale_does_not_guess_per_value() {
        // 1.0 on a percent scale is 1%, not certainty
        let body = br#"{"instruments": [
            {"class": 0, "confidence": 0.99},
            {"class": 0, "confidence": 99.0},
            {"class": 0, "confidence": 1.0}
        ]}"#;
        let result = decode_response(body, 1, ConfidenceScale::Percent).unwrap();
        let confidences: Vec<f32> = result.detections.iter().map(|d| d.confidence).collect();
        assert!((confidences[0] - 0.0099).abs() < 1e-6);
        assert!((confidences[1] - 0.99).abs() < 1e-6);
        assert!((confidences[2] - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_unit_scale_rejects_percentages() {
        let body = br#"{"instruments": [{"class": 1, "confidence": 99.0}]}"#;
        assert!(matches!(
            decode_response(body, 1, ConfidenceScale::Unit),
            Err(RecognitionError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_confidence() {
        let body = br#"{"instruments": [{"class": 1, "confidence": 250.0}]}"#;
        assert!(matches!(
            decode_response(body, 1, ConfidenceScale::Percent),
            Err(RecognitionError::Decode(_))
        ));
        let body = br#"{"instruments": [{"class": 1, "confidence": -0.1}]}"#;
        assert!(matches!(
            decode_response(body, 1, ConfidenceScale::Unit),
            Err(RecognitionError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_negative_class() {
        let body = br#"{"instruments": [{"class": -1, "confidence": 0.5}]}"#;
        assert!(matches!(decode_response(body, 1, ConfidenceScale::Unit), Err(RecognitionError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_response(b"<html>", 1, ConfidenceScale::Unit), Err(RecognitionError::Decode(_))));
    }

    #[test]
    fn test_empty_debug_url_is_none() {
        let body = br#"{"instruments": [], "debug_image_url": ""}"#;
        let result = decode_response(body, 1, ConfidenceScale::Unit).unwrap();
        assert!(result.detections.is_empty());
        assert_eq!(result.debug_image_url, None);
    }
}
