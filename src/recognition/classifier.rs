//! Recognition classifier
//!
//! Partitions one photograph's detections against the expected tool set:
//!
//! - **accepted**: known tool type, similarity and confidence both pass
//! - **manual_check**: known tool type, at least one threshold fails
//!   (or the similarity could not be computed)
//! - **unrecognized**: tool type not in the expected set
//! - **missing**: expected tool types nobody reported
//!
//! The pass is pure and deterministic: bucket order follows detection order,
//! missing order follows reference-set order.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::similarity::cosine_similarity;
use crate::types::{RecognizedTool, ToolType, ToolTypeSummary};

/// Acceptance thresholds. Confidence is on the normalized `0.0..=1.0` scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub confidence: f32,
    pub similarity: f64,
}

/// A detection plus the similarity it scored against its reference entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedTool {
    #[serde(flatten)]
    pub tool: RecognizedTool,
    /// `None` for unrecognized detections and for comparisons that failed
    pub similarity: Option<f64>,
}

/// Result of classifying one photograph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub accepted: Vec<ClassifiedTool>,
    pub manual_check: Vec<ClassifiedTool>,
    pub unrecognized: Vec<ClassifiedTool>,
    pub missing: Vec<ToolTypeSummary>,
}

impl Classification {
    /// Detections that matched a reference entry, whatever their scores.
    pub fn matched_count(&self) -> usize {
        self.accepted.len() + self.manual_check.len()
    }

    /// Manual-check + unrecognized + missing.
    pub fn problem_count(&self) -> usize {
        self.manual_check.len() + self.unrecognized.len() + self.missing.len()
    }

    pub fn is_clean(&self) -> bool {
        self.problem_count() == 0
    }
}

/// Classify `detections` against the `reference` tool list.
pub fn classify(
    detections: &[RecognizedTool],
    reference: &[ToolType],
    thresholds: &Thresholds,
) -> Classification {
    let by_id: HashMap<u64, &ToolType> = reference.iter().map(|t| (t.id, t)).collect();
    let mut seen: HashSet<u64> = HashSet::with_capacity(reference.len());
    let mut result = Classification::default();

    for detection in detections {
        let Some(expected) = by_id.get(&detection.tool_type_id) else {
            debug!(tool_type_id = detection.tool_type_id, "Detection not in expected set");
            result.unrecognized.push(ClassifiedTool {
                tool: detection.clone(),
                similarity: None,
            });
            continue;
        };
        seen.insert(detection.tool_type_id);

        let similarity = match cosine_similarity(&expected.reference_embedding, &detection.embedding) {
            Ok(s) => Some(s),
            Err(e) => {
                debug!(tool_type_id = detection.tool_type_id, error = %e, "Similarity undefined, routing to manual check");
                None
            }
        };

        let passes = similarity.is_some_and(|s| s >= thresholds.similarity)
            && detection.confidence >= thresholds.confidence;

        debug!(
            tool_type_id = detection.tool_type_id,
            confidence = detection.confidence,
            similarity = ?similarity,
            accepted = passes,
            "Classified detection"
        );

        let classified = ClassifiedTool {
            tool: detection.clone(),
            similarity,
        };
        if passes {
            result.accepted.push(classified);
        } else {
            result.manual_check.push(classified);
        }
    }

    result.missing = reference
        .iter()
        .filter(|t| !seen.contains(&t.id))
        .map(ToolType::summary)
        .collect();

    result
}
