mod common;

use common::assertions::assert_top_result;
use common::fixtures::{row, with_image};
use common::stubs::{memory_params, tagged_image, StubProvider};

use std::sync::atomic::Ordering;
use std::sync::Arc;

use imsearch_eval::config::{Config, InferenceConfig, QueryConfig};
use imsearch_eval::dataset::{Dataset, DatasetColumns};
use imsearch_eval::ingest::{load_collection, ImageRecordBuilder, RecordBuilder, CAPTION_PROPERTY};
use imsearch_eval::query::SearchOptions;
use imsearch_eval::store::MemoryStore;
use imsearch_eval::traits::VectorDbAdapter;
use imsearch_eval::types::{AttributeValue, VectorKind};

const VOCAB: [&str; 5] = ["hawk", "fish", "frog", "red", "green"];

fn columns() -> DatasetColumns {
    DatasetColumns {
        query: "query".to_string(),
        query_id: "query_id".to_string(),
        relevance: "relevant".to_string(),
        candidate_id: "image_id".to_string(),
        metadata: vec!["category".to_string()],
    }
}

fn inference(late_interaction: bool) -> InferenceConfig {
    InferenceConfig {
        embedding_dim: VOCAB.len(),
        colbert_dim: VOCAB.len(),
        late_interaction,
        ..Default::default()
    }
}

fn provider() -> Arc<StubProvider> {
    Arc::new(
        StubProvider::new(&VOCAB)
            .with_caption(1, "a red hawk")
            .with_caption(2, "a green frog")
            .with_caption(3, "a red fish"),
    )
}

fn config(batch_size: usize) -> Config {
    let mut config = Config::default();
    config.vector_store.batch_size = batch_size;
    config.evaluation.workers = 2;
    config
}

#[test]
fn test_schema_has_spaces_and_caption_index() {
    let builder = ImageRecordBuilder::new(columns(), &inference(true));
    let schema = builder.schema("birds");
    assert_eq!(schema.name, "birds");
    assert_eq!(schema.vector_space("clip").unwrap().dimensions, VOCAB.len());
    assert_eq!(schema.vector_space("colbert").unwrap().kind, VectorKind::Multi);
    assert!(schema.text_fields.contains_key(CAPTION_PROPERTY));
    assert!(schema.properties.iter().any(|p| p.name == "category"));

    let without = ImageRecordBuilder::new(columns(), &inference(false)).schema("birds");
    assert!(without.vector_space("colbert").is_none());
}

#[tokio::test]
async fn test_build_record_captions_and_embeds() {
    let provider = provider();
    let builder = ImageRecordBuilder::new(columns(), &inference(true));
    let row = with_image(row("q0", "hawk", "img-1", 1), tagged_image(1));

    let record = builder.build_record(&row, provider.as_ref()).await.unwrap();
    assert_eq!(record.id.as_deref(), Some("img-1"));
    assert_eq!(
        record.properties[CAPTION_PROPERTY],
        AttributeValue::String("a red hawk".to_string())
    );
    assert_eq!(
        record.vectors["clip"].as_single().unwrap(),
        &[1.0, 0.0, 0.0, 1.0, 0.0]
    );
    assert_eq!(record.vectors["colbert"].as_multi().unwrap().len(), 2);
}

#[tokio::test]
async fn test_load_collection_reports_failed_rows_and_continues() {
    let provider = provider();
    let store = MemoryStore::init_client(memory_params(provider.clone(), QueryConfig::default()))
        .await
        .unwrap();
    let builder = ImageRecordBuilder::new(columns(), &inference(false));

    let dataset = Dataset::new(vec![
        with_image(row("q0", "hawk", "img-1", 1), tagged_image(1)),
        // No image: fails.
        row("q0", "hawk", "img-2", 0),
        with_image(row("q1", "frog", "img-3", 1), tagged_image(2)),
        // No caption for tag 9: indexed with an empty caption.
        with_image(row("q1", "frog", "img-4", 0), tagged_image(9)),
        with_image(row("q2", "fish", "img-5", 1), tagged_image(3)),
    ]);

    let report = load_collection(&store, provider.as_ref(), &builder, &dataset, "birds", &config(2))
        .await
        .unwrap();

    assert_eq!(report.submitted(), 5);
    assert_eq!(report.inserted, vec!["img-1", "img-3", "img-4", "img-5"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].index, 1);
    assert_eq!(report.failed[0].id.as_deref(), Some("img-2"));
    assert_eq!(store.count("birds").await.unwrap(), 4);

    let result = store
        .search("green frog", "birds", 1, Some("keyword"), &SearchOptions::default())
        .await
        .unwrap();
    assert_top_result(&result, "img-3");
}

#[tokio::test]
async fn test_embedding_failure_fails_only_that_row() {
    let provider = provider();
    provider.fail_on("a red fish");
    let store = MemoryStore::init_client(memory_params(provider.clone(), QueryConfig::default()))
        .await
        .unwrap();
    let builder = ImageRecordBuilder::new(columns(), &inference(false));
    let dataset = Dataset::new(vec![
        with_image(row("q0", "hawk", "img-1", 1), tagged_image(1)),
        with_image(row("q2", "fish", "img-5", 1), tagged_image(3)),
    ]);

    let report = load_collection(&store, provider.as_ref(), &builder, &dataset, "birds", &config(10))
        .await
        .unwrap();
    assert_eq!(report.inserted, vec!["img-1"]);
    assert_eq!(report.failed[0].index, 1);
    assert!(report.failed[0].reason.contains("stub failure"));
}

#[tokio::test]
async fn test_build_records_keeps_rows_aligned_around_failures() {
    let provider = provider();
    let builder = ImageRecordBuilder::new(columns(), &inference(true));
    let rows = vec![
        with_image(row("q0", "hawk", "img-1", 1), tagged_image(1)),
        row("q0", "hawk", "img-2", 0),
        with_image(row("q1", "frog", "img-3", 1), tagged_image(9)),
        with_image(row("q2", "fish", "img-5", 1), tagged_image(3)),
    ];

    let built = builder.build_records(&rows, provider.as_ref(), 3).await;
    assert_eq!(built.len(), 4);

    let caption = |i: usize| built[i].as_ref().unwrap().properties[CAPTION_PROPERTY].clone();
    assert_eq!(caption(0), AttributeValue::String("a red hawk".to_string()));
    assert!(built[1].is_err());
    assert_eq!(caption(2), AttributeValue::String(String::new()));
    assert_eq!(caption(3), AttributeValue::String("a red fish".to_string()));
    assert_eq!(
        built[3].as_ref().unwrap().vectors["clip"].as_single().unwrap(),
        &[0.0, 1.0, 0.0, 1.0, 0.0]
    );

    // One caption per image, then a dense and a token embedding per image.
    assert_eq!(provider.caption_calls.load(Ordering::SeqCst), 3);
    assert_eq!(provider.embedding_calls.load(Ordering::SeqCst), 6);
}
