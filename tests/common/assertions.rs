use imsearch_eval::error::{BenchError, Result};
use imsearch_eval::types::QueryResult;

/// Assert that results are sorted by descending score with finite scores.
pub fn assert_ranked(result: &QueryResult) {
    for pair in result.candidates.windows(2) {
        assert!(
            pair[0].score.is_finite() && pair[1].score.is_finite(),
            "non-finite score in {:?}",
            result.candidates
        );
        assert!(
            pair[0].score >= pair[1].score,
            "results not sorted: {} ({}) before {} ({})",
            pair[0].id,
            pair[0].score,
            pair[1].id,
            pair[1].score
        );
    }
}

/// Assert that the top result has the expected ID.
pub fn assert_top_result(result: &QueryResult, expected_id: &str) {
    assert!(
        !result.is_empty(),
        "search results are empty, expected top result '{expected_id}'"
    );
    assert_eq!(
        result.candidates[0].id, expected_id,
        "top result is '{}', expected '{expected_id}'",
        result.candidates[0].id
    );
}

/// Assert that search results contain all expected IDs (order-independent).
pub fn assert_results_contain(result: &QueryResult, expected_ids: &[&str]) {
    let ids: Vec<&str> = result.ids().collect();
    for id in expected_ids {
        assert!(
            ids.contains(id),
            "search results do not contain expected ID '{id}'. Got: {ids:?}"
        );
    }
}

pub fn ids(result: &QueryResult) -> Vec<&str> {
    result.ids().collect()
}

pub fn assert_unsupported_strategy<T: std::fmt::Debug>(result: &Result<T>, method: &str) {
    match result {
        Err(BenchError::UnsupportedStrategy { method: m, .. }) => assert_eq!(m, method),
        other => panic!("expected UnsupportedStrategy, got: {other:?}"),
    }
}

pub fn assert_collection_not_found<T: std::fmt::Debug>(result: &Result<T>) {
    match result {
        Err(BenchError::CollectionNotFound { .. }) => {}
        other => panic!("expected CollectionNotFound error, got: {other:?}"),
    }
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
