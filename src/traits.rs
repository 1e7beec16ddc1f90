//! Capability interfaces implemented by every backend.
//!
//! The evaluator and the ingestion pipeline depend only on these traits, so a
//! vector database, inference service, or dataset can be swapped without
//! touching the benchmark logic. All traits are object-safe via `async_trait`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{QueryConfig, VectorStoreConfig};
use crate::dataset::{Dataset, DatasetColumns, LoadOptions};
use crate::error::Result;
use crate::query::SearchOptions;
use crate::types::{CollectionSchema, Embedding, ImageTensor, InsertReport, QueryResult, Record};

/// Everything a vector-store adapter needs to connect and to build its
/// query strategy.
#[derive(Clone)]
pub struct ClientParams {
    pub store: VectorStoreConfig,
    pub query: QueryConfig,
    pub model_provider: Arc<dyn ModelProvider>,
}

/// Connection and collection lifecycle for one vector database.
///
/// Ranking is not the adapter's job: `search` hands off to the backend's
/// [`crate::query::Query`] implementation.
#[async_trait]
pub trait VectorDbAdapter: Send + Sync {
    /// Connect to the backing store.
    ///
    /// # Errors
    /// Returns `BenchError::Connection` if the endpoint is unreachable.
    async fn init_client(params: ClientParams) -> Result<Self>
    where
        Self: Sized;

    /// Create a collection. An existing collection of the same name is
    /// replaced.
    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()>;

    /// Delete a collection. Returns `false` if it did not exist.
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    /// Insert records in chunks of `batch_size`. Per-record failures are
    /// reported, not raised.
    async fn insert_data(
        &self,
        collection: &str,
        records: Vec<Record>,
        batch_size: usize,
    ) -> Result<InsertReport>;

    /// Run one query. `query_method = None` uses the configured default.
    ///
    /// # Errors
    /// Returns `BenchError::UnsupportedStrategy` for an unknown method.
    async fn search(
        &self,
        query: &str,
        collection: &str,
        limit: usize,
        query_method: Option<&str>,
        options: &SearchOptions,
    ) -> Result<QueryResult>;

    /// Release held connections. Calling it more than once is a no-op.
    async fn close(&self) -> Result<()>;

    fn name(&self) -> &str;
}

/// Embedding and captioning backed by an inference service.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Embed text, optionally fused with an image.
    ///
    /// # Errors
    /// Returns `BenchError::UnknownModel` if `model_name` is not served.
    async fn get_embedding(
        &self,
        text: &str,
        image: Option<&ImageTensor>,
        model_name: &str,
    ) -> Result<Embedding>;

    /// Caption an image with the named captioning model.
    async fn generate_caption(&self, image: &ImageTensor, model_name: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// Source of a labeled benchmark dataset.
///
/// Column accessors are pure and must return the same names for the whole run.
#[async_trait]
pub trait DatasetLoader: Send + Sync {
    async fn load(&self, split: &str, options: &LoadOptions) -> Result<Dataset>;

    fn query_column(&self) -> &str;

    fn query_id_column(&self) -> &str;

    fn relevance_column(&self) -> &str;

    /// Column holding the id each row is inserted under; result ids are
    /// joined against it.
    fn candidate_id_column(&self) -> &str;

    fn metadata_columns(&self) -> &[String] {
        &[]
    }

    /// Human-readable dataset name.
    fn name(&self) -> &str;

    fn columns(&self) -> DatasetColumns {
        DatasetColumns {
            query: self.query_column().to_string(),
            query_id: self.query_id_column().to_string(),
            relevance: self.relevance_column().to_string(),
            candidate_id: self.candidate_id_column().to_string(),
            metadata: self.metadata_columns().to_vec(),
        }
    }
}
