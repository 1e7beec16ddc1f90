//! Late-interaction (ColBERT MaxSim) scoring over token-level embeddings.

use super::distance::dot;

/// MaxSim: for each query token take the best dot product against any
/// document token, then sum over query tokens.
///
/// Returns 0.0 if either side has no tokens.
pub fn max_sim(query: &[Vec<f32>], document: &[Vec<f32>]) -> f32 {
    if query.is_empty() || document.is_empty() {
        return 0.0;
    }
    query
        .iter()
        .map(|q| {
            document
                .iter()
                .map(|d| dot(q, d))
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .sum()
}

/// Mean of the token vectors, for searching a single-vector space with a
/// multi-vector query.
pub fn mean_pool(tokens: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = tokens.first()?;
    let mut pooled = vec![0.0f32; first.len()];
    for token in tokens {
        for (acc, x) in pooled.iter_mut().zip(token) {
            *acc += x;
        }
    }
    let n = tokens.len() as f32;
    pooled.iter_mut().for_each(|x| *x /= n);
    Some(pooled)
}
