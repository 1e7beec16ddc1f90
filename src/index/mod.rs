//! Vector scoring primitives shared by the in-memory store and the query
//! strategies: distance kernels, late-interaction MaxSim, and an exact
//! top-k scan.

pub mod distance;
pub mod late_interaction;

pub use distance::similarity;
pub use late_interaction::{max_sim, mean_pool};

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap entry ordered so that the heap root is the *worst* kept hit.
#[derive(Debug, Clone, Copy)]
struct Hit {
    slot: usize,
    score: f32,
}

impl PartialEq for Hit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Hit {}

impl PartialOrd for Hit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hit {
    // Reverse on score so BinaryHeap (a max-heap) pops the lowest score;
    // among equal scores the higher slot is dropped first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then(self.slot.cmp(&other.slot))
    }
}

/// Keep the `k` highest-scoring `(slot, score)` pairs, best first.
/// Non-finite scores are dropped.
pub fn top_k(scores: impl IntoIterator<Item = (usize, f32)>, k: usize) -> Vec<(usize, f32)> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap = BinaryHeap::with_capacity(k + 1);
    for (slot, score) in scores {
        if !score.is_finite() {
            continue;
        }
        heap.push(Hit { slot, score });
        if heap.len() > k {
            heap.pop();
        }
    }
    let mut hits: Vec<_> = heap.into_iter().map(|h| (h.slot, h.score)).collect();
    hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    hits
}
