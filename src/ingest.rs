//! Building and loading the benchmark collection.
//!
//! Each dataset row becomes one object: the row's scalar columns become
//! properties, the image is captioned, and the caption plus image are
//! embedded into the collection's vector spaces.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{info, instrument, warn};

use crate::config::{Config, InferenceConfig};
use crate::dataset::{Dataset, DatasetColumns, Row};
use crate::error::{BenchError, Result};
use crate::model::{caption_batch, embed_batch, Inferred};
use crate::traits::{ModelProvider, VectorDbAdapter};
use crate::types::{
    AttributeValue, CandidateId, CollectionSchema, DataType, FailedRecord, FtsFieldConfig,
    ImageTensor, InsertReport, PropertySchema, Record, VectorSpace,
};

/// Property holding the generated caption; the keyword-searchable text.
pub const CAPTION_PROPERTY: &str = "caption";

/// Turns dataset rows into collection records.
#[async_trait]
pub trait RecordBuilder: Send + Sync {
    fn schema(&self, collection: &str) -> CollectionSchema;

    /// Id the row's record is inserted under.
    fn record_id(&self, row: &Row) -> Option<CandidateId>;

    async fn build_record(&self, row: &Row, provider: &dyn ModelProvider) -> Result<Record>;

    /// Build a chunk of rows with at most `concurrency` rows in flight.
    /// Output order matches `rows`.
    async fn build_records(
        &self,
        rows: &[Row],
        provider: &dyn ModelProvider,
        concurrency: usize,
    ) -> Vec<Result<Record>> {
        stream::iter(0..rows.len())
            .map(|i| self.build_record(&rows[i], provider))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}

/// Caption-and-embed builder for image datasets.
pub struct ImageRecordBuilder {
    columns: DatasetColumns,
    caption_model: String,
    embedding_model: String,
    embedding_dim: usize,
    /// Late-interaction model and token width, when enabled.
    late_interaction: Option<(String, usize)>,
}

impl ImageRecordBuilder {
    pub fn new(columns: DatasetColumns, inference: &InferenceConfig) -> Self {
        Self {
            columns,
            caption_model: inference.caption_model.clone(),
            embedding_model: inference.embedding_model.clone(),
            embedding_dim: inference.embedding_dim,
            late_interaction: inference
                .late_interaction
                .then(|| ("colbert".to_string(), inference.colbert_dim)),
        }
    }
}

#[async_trait]
impl RecordBuilder for ImageRecordBuilder {
    fn schema(&self, collection: &str) -> CollectionSchema {
        let mut properties = vec![
            PropertySchema::new(&self.columns.candidate_id, DataType::Text),
            PropertySchema::new(&self.columns.query, DataType::Text),
            PropertySchema::new(&self.columns.query_id, DataType::Text),
            PropertySchema::new(&self.columns.relevance, DataType::Int),
            PropertySchema::new(CAPTION_PROPERTY, DataType::Text),
        ];
        properties.extend(
            self.columns
                .metadata
                .iter()
                .map(|c| PropertySchema::new(c, DataType::Text)),
        );

        let mut vector_spaces =
            vec![VectorSpace::single(&self.embedding_model, self.embedding_dim)];
        if let Some((model, dim)) = &self.late_interaction {
            vector_spaces.push(VectorSpace::multi(model, *dim));
        }

        CollectionSchema {
            name: collection.to_string(),
            description: format!("image retrieval benchmark collection {collection}"),
            properties,
            vector_spaces,
            text_fields: [(CAPTION_PROPERTY.to_string(), FtsFieldConfig::default())]
                .into_iter()
                .collect(),
        }
    }

    fn record_id(&self, row: &Row) -> Option<CandidateId> {
        row.key(&self.columns.candidate_id)
    }

    async fn build_record(&self, row: &Row, provider: &dyn ModelProvider) -> Result<Record> {
        self.build_records(std::slice::from_ref(row), provider, 1)
            .await
            .pop()
            .unwrap_or_else(|| Err(BenchError::Internal("no record built for row".to_string())))
    }

    /// Captions every image first, then embeds each caption with its image.
    /// A failed caption indexes as empty text; a failed embedding fails
    /// only its row.
    async fn build_records(
        &self,
        rows: &[Row],
        provider: &dyn ModelProvider,
        concurrency: usize,
    ) -> Vec<Result<Record>> {
        let images: Vec<&ImageTensor> = rows.iter().filter_map(|r| r.image.as_ref()).collect();
        let captions: Vec<String> = caption_batch(provider, &images, &self.caption_model, concurrency)
            .await
            .into_iter()
            .map(|c| match c {
                Inferred::Ready(caption) => caption,
                Inferred::Missing { .. } => String::new(),
            })
            .collect();

        let pairs: Vec<(&str, Option<&ImageTensor>)> = captions
            .iter()
            .zip(&images)
            .map(|(c, img)| (c.as_str(), Some(*img)))
            .collect();
        let mut dense =
            embed_batch(provider, &pairs, &self.embedding_model, concurrency).await.into_iter();

        let mut tokens = match &self.late_interaction {
            Some((model, _)) => {
                let texts: Vec<(&str, Option<&ImageTensor>)> =
                    captions.iter().map(|c| (c.as_str(), None)).collect();
                Some(embed_batch(provider, &texts, model, concurrency).await.into_iter())
            }
            None => None,
        };

        // Batch outputs hold one entry per row with an image, in row order.
        let mut captions = captions.iter();
        rows.iter()
            .map(|row| {
                let id = self.record_id(row);
                let item = id.clone().unwrap_or_else(|| "<no id>".to_string());
                if row.image.is_none() {
                    return Err(BenchError::Item {
                        item,
                        reason: "row has no image".to_string(),
                    });
                }
                let caption = captions.next().cloned().unwrap_or_default();
                if caption.is_empty() {
                    warn!(item = %item, "no caption, indexing empty caption");
                }

                let mut vectors = HashMap::new();
                let embedding = ready(dense.next(), &item)?;
                vectors.insert(self.embedding_model.clone(), embedding);
                if let (Some((model, _)), Some(tokens)) = (&self.late_interaction, tokens.as_mut()) {
                    vectors.insert(model.clone(), ready(tokens.next(), &item)?);
                }

                let mut properties: HashMap<_, _> = row
                    .values
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                properties.insert(CAPTION_PROPERTY.to_string(), AttributeValue::String(caption));

                Ok(Record {
                    id,
                    properties,
                    vectors,
                })
            })
            .collect()
    }
}

fn ready<T>(inferred: Option<Inferred<T>>, item: &str) -> Result<T> {
    match inferred {
        Some(Inferred::Ready(value)) => Ok(value),
        Some(Inferred::Missing { reason }) => Err(BenchError::Item {
            item: item.to_string(),
            reason,
        }),
        None => Err(BenchError::Internal(format!("batch output missing for {item}"))),
    }
}

/// Create `collection` and fill it from `dataset`.
///
/// Rows are built `workers` at a time and inserted in chunks of
/// `config.vector_store.batch_size`. A row that cannot be built is reported
/// as failed; the load continues.
#[instrument(skip_all, fields(collection = %collection, rows = dataset.len()))]
pub async fn load_collection(
    store: &dyn VectorDbAdapter,
    provider: &dyn ModelProvider,
    builder: &dyn RecordBuilder,
    dataset: &Dataset,
    collection: &str,
    config: &Config,
) -> Result<InsertReport> {
    store.create_collection(&builder.schema(collection)).await?;

    let batch_size = config.vector_store.batch_size.max(1);
    let workers = config.evaluation.effective_workers();
    let mut report = InsertReport::default();

    for (chunk_no, rows) in dataset.rows.chunks(batch_size).enumerate() {
        let offset = chunk_no * batch_size;
        let built = builder.build_records(rows, provider, workers).await;

        let mut records = Vec::with_capacity(built.len());
        let mut positions = Vec::with_capacity(built.len());
        let mut failed = Vec::new();
        for (i, result) in built.into_iter().enumerate() {
            match result {
                Ok(record) => {
                    positions.push(offset + i);
                    records.push(record);
                }
                Err(e) => failed.push(FailedRecord {
                    index: offset + i,
                    id: builder.record_id(&rows[i]),
                    reason: e.to_string(),
                }),
            }
        }

        let inserted = store.insert_data(collection, records, batch_size).await?;
        report.inserted.extend(inserted.inserted);
        report.failed.extend(failed);
        report.failed.extend(inserted.failed.into_iter().map(|mut f| {
            f.index = positions[f.index];
            f
        }));
        info!(
            chunk = chunk_no,
            inserted = report.inserted.len(),
            failed = report.failed.len(),
            "loaded chunk"
        );
    }

    report.failed.sort_by_key(|f| f.index);
    info!(
        inserted = report.inserted.len(),
        failed = report.failed.len(),
        "collection loaded"
    );
    Ok(report)
}
