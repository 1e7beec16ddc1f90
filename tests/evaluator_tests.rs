mod common;

use common::assertions::assert_close;
use common::fixtures::{benchmark_dataset, candidate_id, query_text};
use common::stubs::{ScriptedStore, StaticLoader, StubProvider};

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use imsearch_eval::dataset::{Dataset, LoadOptions};
use imsearch_eval::error::BenchError;
use imsearch_eval::eval::{BenchmarkEvaluator, EvaluatorSettings, RunPhase};
use imsearch_eval::traits::{DatasetLoader, VectorDbAdapter};

fn settings(workers: usize) -> EvaluatorSettings {
    EvaluatorSettings {
        collection: "bench".to_string(),
        split: "test".to_string(),
        load: LoadOptions::default(),
        query_method: None,
        limit: 5,
        k: None,
        workers,
        query_batch_size: 2,
        embedding_model: "clip".to_string(),
    }
}

/// Script every query of `benchmark_dataset(queries, 5)` with its
/// candidates in the given order.
fn scripted(queries: usize, order: [usize; 5]) -> ScriptedStore {
    let mut store = ScriptedStore::new();
    for q in 0..queries {
        let qid = format!("q{q}");
        let ids: Vec<String> = order.iter().map(|c| candidate_id(&qid, *c)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        store = store.answer(&query_text(&qid), &refs);
    }
    store
}

fn evaluator(store: ScriptedStore, dataset: Dataset, workers: usize) -> BenchmarkEvaluator {
    let store: Arc<dyn VectorDbAdapter> = Arc::new(store);
    let loader: Arc<dyn DatasetLoader> = Arc::new(StaticLoader::new(dataset));
    BenchmarkEvaluator::new(store, loader, settings(workers))
}

#[tokio::test]
async fn test_perfect_rankings_score_one() {
    let evaluator = evaluator(scripted(3, [0, 1, 2, 3, 4]), benchmark_dataset(3, 5), 4);
    let report = evaluator.run().await.unwrap();

    assert_eq!(report.metrics.len(), 3);
    for row in &report.metrics {
        assert!(row.error.is_none());
        assert_eq!(row.total_results, 5);
        assert_eq!(row.relevant_results, 1);
        assert_eq!(row.relevant_in_dataset, 1);
        assert_close(row.ndcg, 1.0);
        assert_close(row.accuracy, 1.0);
        assert_close(row.recall, 1.0);
        assert_close(row.precision, 0.2);
    }
    assert_eq!(report.summary.queries, 3);
    assert_eq!(report.summary.failed, 0);
    assert_close(report.summary.ndcg, 1.0);
    assert_close(report.summary.accuracy, 1.0);
    assert_close(report.summary.recall, 1.0);
    assert_eq!(evaluator.phase(), RunPhase::Done);
}

#[tokio::test]
async fn test_relevant_last_is_discounted() {
    let evaluator = evaluator(scripted(3, [4, 3, 2, 1, 0]), benchmark_dataset(3, 5), 2);
    let report = evaluator.run().await.unwrap();
    for row in &report.metrics {
        assert_close(row.ndcg, 1.0 / 6f64.log2());
        assert_close(row.accuracy, 0.0);
        assert_close(row.recall, 1.0);
    }
    assert_close(report.summary.ndcg, 1.0 / 6f64.log2());
}

#[tokio::test]
async fn test_results_are_joined_with_relevance_in_dataset_order() {
    let evaluator = evaluator(scripted(3, [1, 0, 2, 3, 4]), benchmark_dataset(3, 5), 3);
    let report = evaluator.run().await.unwrap();

    assert_eq!(report.results.len(), 15);
    let first = &report.results[0];
    assert_eq!(first.query_id, "q0");
    assert_eq!(first.query, query_text("q0"));
    assert_eq!(first.rank, 1);
    assert_eq!(first.candidate.id, "q0-img-1");
    assert_eq!(first.relevance, 0);
    assert_eq!(report.results[1].relevance, 1);

    let order: Vec<&str> = report.metrics.iter().map(|m| m.query_id.as_str()).collect();
    assert_eq!(order, vec!["q0", "q1", "q2"]);
    assert_eq!(report.metrics[0].metadata["category"], "cat-q0");
    assert_eq!(report.metadata_columns, vec!["category"]);
}

#[tokio::test]
async fn test_failed_query_becomes_error_row() {
    let store = scripted(3, [0, 1, 2, 3, 4]).fail(&query_text("q1"), "shard unavailable");
    let evaluator = evaluator(store, benchmark_dataset(3, 5), 2);
    let report = evaluator.run().await.unwrap();

    let failed = &report.metrics[1];
    assert_eq!(failed.query_id, "q1");
    assert!(failed.error.as_deref().unwrap().contains("shard unavailable"));
    assert!(failed.ndcg.is_nan());
    assert_eq!(failed.total_results, 0);
    assert_eq!(failed.relevant_in_dataset, 1);

    assert_eq!(report.summary.queries, 3);
    assert_eq!(report.summary.failed, 1);
    assert_close(report.summary.ndcg, 1.0);
    assert!(report.results.iter().all(|r| r.query_id != "q1"));
    assert_eq!(evaluator.phase(), RunPhase::Done);
}

#[tokio::test]
async fn test_empty_dataset_fails_the_run() {
    let evaluator = evaluator(ScriptedStore::new(), Dataset::default(), 2);
    let mut phases = evaluator.subscribe();
    match evaluator.run().await {
        Err(BenchError::EmptyDataset { dataset, split }) => {
            assert_eq!(dataset, "static");
            assert_eq!(split, "test");
        }
        other => panic!("expected EmptyDataset, got {other:?}"),
    }
    assert_eq!(evaluator.phase(), RunPhase::Failed);
    assert_eq!(*phases.borrow_and_update(), RunPhase::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_bounds_concurrency() {
    let store = Arc::new(
        scripted(10, [0, 1, 2, 3, 4]).with_delay(Duration::from_millis(20)),
    );
    let loader: Arc<dyn DatasetLoader> = Arc::new(StaticLoader::new(benchmark_dataset(10, 5)));
    let mut config = settings(3);
    config.query_batch_size = 100;
    let evaluator = BenchmarkEvaluator::new(store.clone(), loader, config);

    let report = evaluator.run().await.unwrap();
    assert_eq!(report.metrics.len(), 10);
    assert_eq!(store.searches.load(Ordering::SeqCst), 10);
    let peak = store.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeded 3 workers");
    assert!(peak >= 2, "queries did not run in parallel");
    assert_eq!(report.latency.count, 10);
    assert!(report.latency.p50_ms >= 20.0, "p50 = {}", report.latency.p50_ms);
}

#[tokio::test]
async fn test_model_provider_precomputes_query_embeddings() {
    let store = Arc::new(scripted(2, [0, 1, 2, 3, 4]));
    let provider = Arc::new(StubProvider::new(&["text", "of"]));
    let loader: Arc<dyn DatasetLoader> = Arc::new(StaticLoader::new(benchmark_dataset(2, 5)));
    let evaluator = BenchmarkEvaluator::new(store.clone(), loader, settings(2))
        .with_model_provider(provider.clone());

    evaluator.run().await.unwrap();
    assert_eq!(store.embedded.lock().unwrap().len(), 2);
    assert_eq!(provider.embedding_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_configured_method_is_passed_to_the_store() {
    let store = Arc::new(scripted(2, [0, 1, 2, 3, 4]));
    let loader: Arc<dyn DatasetLoader> = Arc::new(StaticLoader::new(benchmark_dataset(2, 5)));
    let mut config = settings(1);
    config.query_method = Some("keyword".to_string());
    let evaluator = BenchmarkEvaluator::new(store.clone(), loader, config);

    evaluator.run().await.unwrap();
    let methods = store.methods.lock().unwrap().clone();
    assert_eq!(methods, vec![Some("keyword".to_string()); 2]);
}

#[tokio::test]
async fn test_cutoff_k_limits_scoring() {
    let store = scripted(1, [1, 2, 3, 4, 0]);
    let store: Arc<dyn VectorDbAdapter> = Arc::new(store);
    let loader: Arc<dyn DatasetLoader> = Arc::new(StaticLoader::new(benchmark_dataset(1, 5)));
    let mut config = settings(1);
    config.k = Some(3);
    let evaluator = BenchmarkEvaluator::new(store, loader, config);

    let report = evaluator.run().await.unwrap();
    let row = &report.metrics[0];
    assert_eq!(row.total_results, 5);
    assert_eq!(row.relevant_results, 0);
    assert_close(row.recall, 0.0);
    assert_close(row.ndcg, 0.0);
}

#[tokio::test]
async fn test_evaluate_dataset_skips_the_loader() {
    let evaluator = evaluator(scripted(2, [0, 1, 2, 3, 4]), Dataset::default(), 2);
    let report = evaluator
        .evaluate_dataset(&benchmark_dataset(2, 5))
        .await
        .unwrap();
    assert_eq!(report.metrics.len(), 2);
}

#[tokio::test]
async fn test_unknown_method_fails_before_any_search() {
    let store = Arc::new(scripted(3, [0, 1, 2, 3, 4]));
    let loader: Arc<dyn DatasetLoader> = Arc::new(StaticLoader::new(benchmark_dataset(3, 5)));
    let mut config = settings(2);
    config.query_method = Some("teleport".to_string());
    let evaluator = BenchmarkEvaluator::new(store.clone(), loader, config);

    match evaluator.run().await {
        Err(BenchError::UnsupportedStrategy { method, expected }) => {
            assert_eq!(method, "teleport");
            assert!(expected.contains("hybrid"), "{expected}");
        }
        other => panic!("expected UnsupportedStrategy, got {other:?}"),
    }
    assert_eq!(evaluator.phase(), RunPhase::Failed);
    assert_eq!(store.searches.load(Ordering::SeqCst), 0);

    let err = evaluator
        .evaluate_dataset(&benchmark_dataset(3, 5))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 4);
    assert_eq!(store.searches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_perfect_ranking_precision_at_one() {
    let store: Arc<dyn VectorDbAdapter> = Arc::new(scripted(2, [0, 1, 2, 3, 4]));
    let loader: Arc<dyn DatasetLoader> = Arc::new(StaticLoader::new(benchmark_dataset(2, 5)));
    let mut config = settings(2);
    config.k = Some(1);
    let evaluator = BenchmarkEvaluator::new(store, loader, config);

    let report = evaluator.run().await.unwrap();
    for row in &report.metrics {
        assert_eq!(row.total_results, 5);
        assert_eq!(row.relevant_results, 1);
        assert_close(row.precision, 1.0);
        assert_close(row.accuracy, 1.0);
        assert_close(row.recall, 1.0);
        assert_close(row.ndcg, 1.0);
    }
    assert_close(report.summary.precision, 1.0);
}

#[tokio::test]
async fn test_unjudged_results_count_as_incorrectly_returned() {
    let qid = "q0";
    let store = ScriptedStore::new().answer(
        &query_text(qid),
        &[&candidate_id(qid, 1), "stray-7", &candidate_id(qid, 0), "stray-8"],
    );
    let evaluator = evaluator(store, benchmark_dataset(1, 5), 1);
    let report = evaluator.run().await.unwrap();

    let row = &report.metrics[0];
    assert_eq!(row.total_results, 4);
    assert_eq!(row.correctly_returned, 2);
    assert_eq!(row.incorrectly_returned, 2);
    assert_eq!(row.relevant_results, 1);
    assert_eq!(row.non_relevant_results, 3);
    assert_close(row.secondary_ndcg, row.ndcg);
}
