//! Ranking metrics over graded relevance judgments.
//!
//! All functions take `grades`: the relevance grade of each returned
//! candidate in rank order (0 = not relevant). A grade above 0 counts as
//! relevant for precision, recall, and accuracy.

use crate::types::{QueryResult, RelevanceJudgments};

/// DCG with linear gain and a `1 / log2(rank + 1)` discount, rank from 1.
pub fn dcg(grades: &[u32]) -> f64 {
    grades
        .iter()
        .enumerate()
        .map(|(i, &g)| f64::from(g) / ((i + 2) as f64).log2())
        .sum()
}

/// NDCG@k against the ideal ordering of the query's judged grades.
/// 0.0 when the query has no relevant judgments.
pub fn ndcg_at_k(grades: &[u32], ideal_grades: &[u32], k: usize) -> f64 {
    let mut ideal: Vec<u32> = ideal_grades.to_vec();
    ideal.sort_unstable_by(|a, b| b.cmp(a));
    let idcg = dcg(&ideal[..k.min(ideal.len())]);
    if idcg == 0.0 {
        return 0.0;
    }
    dcg(&grades[..k.min(grades.len())]) / idcg
}

fn relevant_in_top(grades: &[u32], k: usize) -> usize {
    grades.iter().take(k).filter(|&&g| g > 0).count()
}

/// Relevant results in the top `k` divided by `k`.
pub fn precision_at_k(grades: &[u32], k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    relevant_in_top(grades, k) as f64 / k as f64
}

/// Relevant results in the top `k` divided by all relevant judgments.
pub fn recall_at_k(grades: &[u32], relevant_total: usize, k: usize) -> f64 {
    if relevant_total == 0 {
        return 0.0;
    }
    relevant_in_top(grades, k) as f64 / relevant_total as f64
}

/// 1.0 when the top-ranked result is relevant.
pub fn accuracy(grades: &[u32]) -> f64 {
    match grades.first() {
        Some(&g) if g > 0 => 1.0,
        _ => 0.0,
    }
}

/// NDCG@k with every relevant grade counted as 1.
pub fn binary_ndcg_at_k(grades: &[u32], ideal_grades: &[u32], k: usize) -> f64 {
    let binary = |g: &[u32]| g.iter().map(|&g| u32::from(g > 0)).collect::<Vec<_>>();
    ndcg_at_k(&binary(grades), &binary(ideal_grades), k)
}

/// Scores of one successfully answered query.
///
/// The returned/relevant counts cover the top `k` results; `total_results`
/// is the full length of the result list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryScores {
    pub total_results: usize,
    /// Results the dataset judges for this query, at any grade.
    pub correctly_returned: usize,
    /// Results never judged for this query.
    pub incorrectly_returned: usize,
    pub relevant_results: usize,
    pub non_relevant_results: usize,
    pub relevant_in_dataset: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub ndcg: f64,
    pub secondary_ndcg: f64,
}

/// Join `result` against the judgments of `query_id` and score it at `k`.
pub fn score_query(
    result: &QueryResult,
    query_id: &str,
    judgments: &RelevanceJudgments,
    k: usize,
) -> QueryScores {
    let grades: Vec<u32> = result
        .ids()
        .map(|id| judgments.grade(query_id, id))
        .collect();
    let relevant_in_dataset = judgments.relevant_count(query_id);
    let ideal = judgments.ideal_grades(query_id);

    let window = k.min(grades.len());
    let correctly_returned = result
        .ids()
        .take(k)
        .filter(|id| judgments.is_judged(query_id, id))
        .count();
    let relevant_results = relevant_in_top(&grades, k);

    QueryScores {
        total_results: grades.len(),
        correctly_returned,
        incorrectly_returned: window - correctly_returned,
        relevant_results,
        non_relevant_results: window - relevant_results,
        relevant_in_dataset,
        accuracy: accuracy(&grades),
        precision: precision_at_k(&grades, k),
        recall: recall_at_k(&grades, relevant_in_dataset, k),
        ndcg: ndcg_at_k(&grades, &ideal, k),
        secondary_ndcg: binary_ndcg_at_k(&grades, &ideal, k),
    }
}
