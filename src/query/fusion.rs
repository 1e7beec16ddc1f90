//! Score fusion for hybrid retrieval.
//!
//! Relative-score fusion min-max normalizes each input list to [0, 1] and
//! takes `alpha * first + (1 - alpha) * second`; a candidate missing from a
//! list contributes 0 for that list. Ranked fusion replaces scores with
//! reciprocal ranks `1 / (RRF_K + rank)`, rank starting at 1.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BenchError;
use crate::types::Candidate;

/// Reciprocal-rank constant.
pub const RRF_K: f32 = 60.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    #[default]
    RelativeScore,
    Ranked,
}

impl fmt::Display for FusionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FusionMethod::RelativeScore => write!(f, "relative_score"),
            FusionMethod::Ranked => write!(f, "ranked"),
        }
    }
}

impl FromStr for FusionMethod {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relative_score" | "relativescore" | "relative" => Ok(FusionMethod::RelativeScore),
            "ranked" | "rrf" => Ok(FusionMethod::Ranked),
            other => Err(BenchError::Config(format!(
                "unknown fusion method '{other}' (expected relative_score or ranked)"
            ))),
        }
    }
}

/// Min-max normalize scores in place. A list whose scores are all equal
/// normalizes to 1.0.
pub fn normalize_scores(candidates: &mut [Candidate]) {
    let (min, max) = candidates
        .iter()
        .map(|c| c.score)
        .filter(|s| s.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| {
            (lo.min(s), hi.max(s))
        });
    if !min.is_finite() {
        return;
    }
    let span = max - min;
    for c in candidates.iter_mut().filter(|c| c.score.is_finite()) {
        c.score = if span > 0.0 { (c.score - min) / span } else { 1.0 };
    }
}

/// Replace scores with reciprocal ranks. Input must already be ranked.
fn reciprocal_ranks(candidates: &mut [Candidate]) {
    for (i, c) in candidates.iter_mut().enumerate() {
        c.score = 1.0 / (RRF_K + (i + 1) as f32);
    }
}

/// Fuse two ranked candidate lists. `alpha` weighs `first`.
///
/// The result is unsorted; callers pass it through
/// [`crate::types::QueryResult::ranked`]. Attributes of a candidate present
/// in both lists are merged, `first` winning on conflicts.
pub fn fuse(
    mut first: Vec<Candidate>,
    mut second: Vec<Candidate>,
    alpha: f32,
    method: FusionMethod,
) -> Vec<Candidate> {
    match method {
        FusionMethod::RelativeScore => {
            normalize_scores(&mut first);
            normalize_scores(&mut second);
        }
        FusionMethod::Ranked => {
            reciprocal_ranks(&mut first);
            reciprocal_ranks(&mut second);
        }
    }
    weighted_sum(first, second, alpha, 1.0 - alpha)
}

/// Relative-score blend with independent weights, used to mix a hybrid list
/// with a late-interaction list.
pub fn blend(
    mut first: Vec<Candidate>,
    mut second: Vec<Candidate>,
    first_weight: f32,
    second_weight: f32,
) -> Vec<Candidate> {
    normalize_scores(&mut first);
    normalize_scores(&mut second);
    weighted_sum(first, second, first_weight, second_weight)
}

fn weighted_sum(
    first: Vec<Candidate>,
    second: Vec<Candidate>,
    first_weight: f32,
    second_weight: f32,
) -> Vec<Candidate> {
    let mut merged: HashMap<String, Candidate> = HashMap::with_capacity(first.len() + second.len());
    for mut c in first {
        c.score *= first_weight;
        merged.insert(c.id.clone(), c);
    }
    for mut c in second {
        let weighted = second_weight * c.score;
        match merged.get_mut(&c.id) {
            Some(existing) => {
                existing.score += weighted;
                for (k, v) in c.attributes {
                    existing.attributes.entry(k).or_insert(v);
                }
            }
            None => {
                c.score = weighted;
                merged.insert(c.id.clone(), c);
            }
        }
    }
    merged.into_values().collect()
}
