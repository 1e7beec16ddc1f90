use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use imsearch_eval::types::Embedding;

/// Generate `n` random unit vectors of dimension `dims`.
pub fn random_unit_vectors(n: usize, dims: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let v: Vec<f32> = (0..dims).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            v.iter().map(|x| x / norm).collect()
        })
        .collect()
}

/// Token embeddings: `tokens` random unit vectors per item.
pub fn random_token_sets(n: usize, tokens: usize, dims: usize, seed: u64) -> Vec<Vec<Vec<f32>>> {
    let flat = random_unit_vectors(n * tokens, dims, seed);
    flat.chunks(tokens).map(<[Vec<f32>]>::to_vec).collect()
}

/// Brute-force ids of the `k` vectors most cosine-similar to `query`.
pub fn exact_top_k(query: &[f32], vectors: &[(String, Vec<f32>)], k: usize) -> Vec<String> {
    let mut scored: Vec<(f32, &str)> = vectors
        .iter()
        .map(|(id, v)| (cosine(query, v), id.as_str()))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored.into_iter().take(k).map(|(_, id)| id.to_string()).collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

pub fn clip(values: Vec<f32>) -> Embedding {
    Embedding::single("clip", values)
}

pub fn colbert(tokens: Vec<Vec<f32>>) -> Embedding {
    Embedding::multi("colbert", tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_unit_vectors() {
        let vecs = random_unit_vectors(10, 16, 42);
        assert_eq!(vecs.len(), 10);
        let norm: f32 = vecs[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_random_token_sets() {
        let sets = random_token_sets(3, 4, 8, 7);
        assert_eq!(sets.len(), 3);
        assert_eq!(sets[0].len(), 4);
        assert_eq!(sets[0][0].len(), 8);
    }
}
