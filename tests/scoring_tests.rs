mod common;

use common::assertions::assert_close;

use assert_approx_eq::assert_approx_eq;
use proptest::prelude::*;

use imsearch_eval::eval::scoring::{
    accuracy, dcg, ndcg_at_k, precision_at_k, recall_at_k, score_query,
};
use imsearch_eval::types::{Candidate, QueryResult, RelevanceJudgments};

fn result(ids: &[&str]) -> QueryResult {
    let n = ids.len() as f32;
    QueryResult::ranked(
        ids.iter()
            .enumerate()
            .map(|(i, id)| Candidate::new(*id, n - i as f32))
            .collect(),
        ids.len(),
    )
}

// ─── NDCG ───

#[test]
fn test_dcg_known_values() {
    assert_approx_eq!(dcg(&[1]), 1.0, 1e-12);
    assert_approx_eq!(dcg(&[0, 1]), 1.0 / 3f64.log2(), 1e-12);
    assert_approx_eq!(dcg(&[3, 2]), 3.0 + 2.0 / 3f64.log2(), 1e-12);
}

#[test]
fn test_ndcg_graded_partial_order() {
    // Ideal: [3, 2]; returned: [2, 3].
    let got = ndcg_at_k(&[2, 3], &[3, 2], 2);
    let expected = (2.0 + 3.0 / 3f64.log2()) / (3.0 + 2.0 / 3f64.log2());
    assert_approx_eq!(got, expected, 1e-12);
}

#[test]
fn test_ndcg_ideal_is_cut_at_k() {
    // Three relevant items in the dataset but only one slot.
    assert_close(ndcg_at_k(&[1], &[1, 1, 1], 1), 1.0);
}

#[test]
fn test_ndcg_with_fewer_results_than_k() {
    assert_close(ndcg_at_k(&[1], &[1], 25), 1.0);
    assert_close(ndcg_at_k(&[], &[1], 25), 0.0);
}

// ─── precision / recall / accuracy ───

#[test]
fn test_precision_divides_by_k() {
    assert_close(precision_at_k(&[1, 0], 5), 0.2);
    assert_close(precision_at_k(&[1, 1, 1], 0), 0.0);
}

#[test]
fn test_recall_counts_only_top_k() {
    assert_close(recall_at_k(&[0, 0, 1, 1], 2, 2), 0.0);
    assert_close(recall_at_k(&[0, 0, 1, 1], 2, 4), 1.0);
}

#[test]
fn test_accuracy_is_top_one() {
    assert_close(accuracy(&[2, 0]), 1.0);
    assert_close(accuracy(&[0, 2]), 0.0);
}

// ─── score_query ───

#[test]
fn test_score_query_joins_result_ids_with_judgments() {
    let mut judgments = RelevanceJudgments::new();
    judgments.insert("q1", "a", 1);
    judgments.insert("q1", "c", 1);
    judgments.insert("q1", "z", 0);
    judgments.insert("q2", "b", 1);

    let scores = score_query(&result(&["a", "b", "c"]), "q1", &judgments, 3);
    assert_eq!(scores.total_results, 3);
    assert_eq!(scores.relevant_results, 2);
    assert_eq!(scores.relevant_in_dataset, 2);
    assert_close(scores.accuracy, 1.0);
    assert_close(scores.precision, 2.0 / 3.0);
    assert_close(scores.recall, 1.0);
    let expected_ndcg = (1.0 + 1.0 / 4f64.log2()) / (1.0 + 1.0 / 3f64.log2());
    assert_approx_eq!(scores.ndcg, expected_ndcg, 1e-12);
}

#[test]
fn test_score_query_without_judgments_is_zero() {
    let judgments = RelevanceJudgments::new();
    let scores = score_query(&result(&["a"]), "unknown", &judgments, 5);
    assert_eq!(scores.relevant_in_dataset, 0);
    assert_close(scores.ndcg, 0.0);
    assert_close(scores.recall, 0.0);
}

// ─── properties ───

proptest! {
    #[test]
    fn prop_recall_is_monotonic_in_k(
        grades in proptest::collection::vec(0u32..3, 0..30),
        k in 0usize..30,
    ) {
        let total = grades.iter().filter(|g| **g > 0).count();
        let lower = recall_at_k(&grades, total, k);
        let upper = recall_at_k(&grades, total, k + 1);
        prop_assert!(lower <= upper);
        prop_assert!((0.0..=1.0).contains(&upper));
    }

    #[test]
    fn prop_ndcg_is_bounded(
        grades in proptest::collection::vec(0u32..4, 0..20),
        k in 1usize..25,
    ) {
        // Judgments cover every returned grade, so the ideal dominates.
        let ideal: Vec<u32> = grades.iter().copied().filter(|g| *g > 0).collect();
        let ndcg = ndcg_at_k(&grades, &ideal, k);
        prop_assert!((0.0..=1.0 + 1e-9).contains(&ndcg), "ndcg = {}", ndcg);
    }

    #[test]
    fn prop_sorted_grades_are_ideal(
        mut grades in proptest::collection::vec(1u32..4, 1..20),
    ) {
        grades.sort_unstable_by(|a, b| b.cmp(a));
        let ndcg = ndcg_at_k(&grades, &grades, grades.len());
        prop_assert!((ndcg - 1.0).abs() < 1e-9);
    }
}
