use crate::error::{BenchError, Result};
use crate::index::distance::norm;

/// Weighted sum of an image and a text embedding, re-normalized to unit
/// length. `alpha` weighs the image (0 = text only, 1 = image only).
///
/// If the weighted sum has zero norm the text embedding is returned as is.
pub fn fuse_embeddings(image: &[f32], text: &[f32], alpha: f32) -> Result<Vec<f32>> {
    if image.len() != text.len() {
        return Err(BenchError::DimensionMismatch {
            expected: text.len(),
            actual: image.len(),
        });
    }
    let combined: Vec<f32> = image
        .iter()
        .zip(text)
        .map(|(i, t)| alpha * i + (1.0 - alpha) * t)
        .collect();
    let n = norm(&combined);
    if n == 0.0 {
        return Ok(text.to_vec());
    }
    Ok(combined.into_iter().map(|x| x / n).collect())
}
