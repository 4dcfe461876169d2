//! Cosine similarity between a reference embedding and a detection embedding.

/// Why a single comparison could not be scored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimilarityError {
    #[error("embedding dimensions differ (reference {reference}, recognized {recognized})")]
    DimensionMismatch { reference: usize, recognized: usize },
    #[error("embedding is empty")]
    Empty,
    #[error("embedding has zero magnitude")]
    ZeroMagnitude,
    #[error("similarity is not a finite number")]
    NonFinite,
}

/// Dot product over the product of magnitudes, accumulated in `f64`.
///
/// Returns a value in `-1.0..=1.0` (up to rounding) or an error for inputs
/// where cosine similarity is undefined.
pub fn cosine_similarity(reference: &[f32], recognized: &[f32]) -> Result<f64, SimilarityError> {
    if reference.len() != recognized.len() {
        return Err(SimilarityError::DimensionMismatch {
            reference: reference.len(),
            recognized: recognized.len(),
        });
    }
    if reference.is_empty() {
        return Err(SimilarityError::Empty);
    }

    let mut dot = 0.0_f64;
    let mut norm_reference = 0.0_f64;
    let mut norm_recognized = 0.0_f64;
    for (&a, &b) in reference.iter().zip(recognized) {
        let (a, b) = (f64::from(a), f64::from(b));
        dot += a * b;
        norm_reference += a * a;
        norm_recognized += b * b;
    }

    if norm_reference == 0.0 || norm_recognized == 0.0 {
        return Err(SimilarityError::ZeroMagnitude);
    }

    let similarity = dot / (norm_reference.sqrt() * norm_recognized.sqrt());
    if similarity.is_finite() {
        Ok(similarity)
    } else {
        Err(SimilarityError::NonFinite)
    }
}
