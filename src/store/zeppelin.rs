//! Zeppelin vector search server adapter.
//!
//! A collection is a family of Zeppelin namespaces, one per vector space,
//! named `{collection}-{space}`. Every namespace receives the record's
//! properties as attributes; the first single-vector namespace also carries
//! the full-text configuration.
//!
//! A namespace holds one vector per id, so a multi-vector space stores one
//! row per token: id `{record}#{token}`, tagged with [`PARENT_ID_ATTR`] and
//! [`TOKEN_COUNT_ATTR`] so late-interaction queries can regroup them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{BenchError, Result};
use crate::metrics;
use crate::query::{Query, SearchOptions, ZeppelinQuery};
use crate::traits::{ClientParams, VectorDbAdapter};
use crate::types::{
    AttributeValue, CandidateId, CollectionSchema, DistanceMetric, EmbeddingData, FailedRecord,
    FtsFieldConfig, InsertReport, QueryResult, Record, VectorKind,
};

use super::prepare_record;

/// Attribute naming the record a token row belongs to.
pub const PARENT_ID_ATTR: &str = "_doc_id";
/// Attribute holding the number of token rows of the parent record.
pub const TOKEN_COUNT_ATTR: &str = "_token_count";

/// Vector entry for upsert.
#[derive(Debug, Clone, Serialize)]
pub struct WireVector {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, AttributeValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateNamespace<'a> {
    pub name: &'a str,
    pub dimensions: usize,
    pub distance_metric: DistanceMetric,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_text_search: Option<&'a std::collections::BTreeMap<String, FtsFieldConfig>>,
}

/// Attribute filter applied by the server before ranking.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WireFilter {
    In {
        field: String,
        values: Vec<AttributeValue>,
    },
}

/// Query request. Exactly one of `vector` or `rank_by` is set.
#[derive(Debug, Clone, Serialize)]
pub struct WireQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank_by: Option<serde_json::Value>,
    pub top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<WireFilter>,
}

impl WireQuery {
    pub fn near(vector: Vec<f32>, top_k: usize) -> Self {
        Self {
            vector: Some(vector),
            rank_by: None,
            top_k,
            filter: None,
        }
    }
}

/// Search result entry. `score` is a distance for vector queries and a
/// BM25 score for `rank_by` queries.
#[derive(Debug, Clone, Deserialize)]
pub struct WireResult {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub attributes: Option<HashMap<String, AttributeValue>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireQueryResponse {
    pub results: Vec<WireResult>,
}

/// Thin HTTP client for the Zeppelin REST API.
pub struct ZeppelinClient {
    base_url: String,
    http: reqwest::Client,
}

impl ZeppelinClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(64)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn health(&self) -> Result<()> {
        let resp = self
            .http
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await
            .map_err(send_error)?;
        check(resp).await.map(|_| ())
    }

    pub async fn create_namespace(&self, body: &CreateNamespace<'_>) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/v1/namespaces", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(send_error)?;
        check(resp).await.map(|_| ())
    }

    /// Returns `false` when the namespace did not exist.
    pub async fn delete_namespace(&self, name: &str) -> Result<bool> {
        let resp = self
            .http
            .delete(format!("{}/v1/namespaces/{}", self.base_url, name))
            .send()
            .await
            .map_err(send_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(resp).await.map(|_| true)
    }

    pub async fn upsert(&self, namespace: &str, vectors: &[WireVector]) -> Result<()> {
        let body = serde_json::json!({ "vectors": vectors });
        let resp = self
            .http
            .post(format!("{}/v1/namespaces/{}/vectors", self.base_url, namespace))
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;
        check(resp).await.map(|_| ())
    }

    pub async fn delete_vectors(&self, namespace: &str, ids: &[String]) -> Result<()> {
        let body = serde_json::json!({ "ids": ids });
        let resp = self
            .http
            .delete(format!("{}/v1/namespaces/{}/vectors", self.base_url, namespace))
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;
        check(resp).await.map(|_| ())
    }

    pub async fn query(&self, namespace: &str, request: &WireQuery) -> Result<WireQueryResponse> {
        let resp = self
            .http
            .post(format!("{}/v1/namespaces/{}/query", self.base_url, namespace))
            .json(request)
            .send()
            .await
            .map_err(send_error)?;
        let resp = check(resp).await?;
        Ok(resp.json::<WireQueryResponse>().await?)
    }
}

fn send_error(e: reqwest::Error) -> BenchError {
    if e.is_connect() || e.is_timeout() {
        BenchError::connection("zeppelin", e)
    } else {
        BenchError::Http(e)
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(BenchError::Remote {
        status: status.as_u16(),
        message,
    })
}

pub fn namespace(collection: &str, space: &str) -> String {
    format!("{collection}-{space}")
}

/// Schemas of collections created through this adapter, shared with the
/// query strategies.
pub type Schemas = Arc<DashMap<String, CollectionSchema>>;

pub struct ZeppelinAdapter {
    client: Arc<ZeppelinClient>,
    schemas: Schemas,
    query: ZeppelinQuery,
    /// Spaces tried when deleting a collection whose schema is unknown.
    default_spaces: Vec<String>,
    closed: AtomicBool,
}

impl ZeppelinAdapter {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BenchError::connection("zeppelin", "adapter is closed"));
        }
        Ok(())
    }

    /// Upsert one chunk into every namespace. A failing namespace fails the
    /// whole chunk, and the rows already written to earlier namespaces are
    /// deleted again.
    async fn upsert_chunk(
        &self,
        schema: &CollectionSchema,
        chunk: &[(CandidateId, Record)],
    ) -> Result<()> {
        let mut written: Vec<(String, Vec<String>)> = Vec::new();
        for space in &schema.vector_spaces {
            let vectors: Vec<WireVector> = chunk
                .iter()
                .filter_map(|(id, record)| Some((id, record, record.vectors.get(&space.name)?)))
                .flat_map(|(id, record, embedding)| wire_rows(id, record, &embedding.data))
                .collect();
            if vectors.is_empty() {
                continue;
            }
            let ns = namespace(&schema.name, &space.name);
            if let Err(e) = self.client.upsert(&ns, &vectors).await {
                self.roll_back(written).await;
                return Err(e);
            }
            written.push((ns, vectors.into_iter().map(|v| v.id).collect()));
        }
        Ok(())
    }

    /// Best effort: a failed delete is logged and leaves the rows behind.
    async fn roll_back(&self, written: Vec<(String, Vec<String>)>) {
        for (ns, ids) in written {
            match self.client.delete_vectors(&ns, &ids).await {
                Ok(()) => debug!(namespace = %ns, rows = ids.len(), "rolled back chunk"),
                Err(e) => warn!(namespace = %ns, rows = ids.len(), error = %e, "rollback failed"),
            }
        }
    }
}

/// Rows of one record in one space: a single row, or one row per token.
fn wire_rows(id: &str, record: &Record, data: &EmbeddingData) -> Vec<WireVector> {
    match data {
        EmbeddingData::Single(values) => vec![WireVector {
            id: id.to_string(),
            values: values.clone(),
            attributes: record.properties.clone(),
        }],
        EmbeddingData::Multi(tokens) => tokens
            .iter()
            .enumerate()
            .map(|(t, values)| {
                let mut attributes = record.properties.clone();
                attributes.insert(PARENT_ID_ATTR.to_string(), AttributeValue::String(id.to_string()));
                attributes.insert(
                    TOKEN_COUNT_ATTR.to_string(),
                    AttributeValue::Integer(tokens.len() as i64),
                );
                WireVector {
                    id: format!("{id}#{t}"),
                    values: values.clone(),
                    attributes,
                }
            })
            .collect(),
    }
}

#[async_trait]
impl VectorDbAdapter for ZeppelinAdapter {
    #[instrument(skip(params), fields(host = %params.store.host, port = params.store.port))]
    async fn init_client(params: ClientParams) -> Result<Self> {
        let base_url = params.store.base_url()?;
        let client = Arc::new(ZeppelinClient::new(
            base_url.as_str(),
            Duration::from_secs(params.store.timeout_secs),
        )?);
        client.health().await.map_err(|e| match e {
            BenchError::Connection { .. } => e,
            other => BenchError::connection("zeppelin", other),
        })?;

        let schemas: Schemas = Arc::new(DashMap::new());
        let default_spaces = vec![
            params.query.target_vector.clone(),
            params.query.late_interaction_vector.clone(),
        ];
        let query = ZeppelinQuery::new(
            params.query,
            params.model_provider,
            Arc::clone(&client),
            Arc::clone(&schemas),
        );
        info!(url = %base_url, "connected to zeppelin");
        Ok(Self {
            client,
            schemas,
            query,
            default_spaces,
            closed: AtomicBool::new(false),
        })
    }

    #[instrument(skip(self, schema), fields(collection = %schema.name))]
    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        self.ensure_open()?;
        if schema.vector_spaces.is_empty() {
            return Err(BenchError::Validation(format!(
                "collection '{}' needs at least one vector space",
                schema.name
            )));
        }
        self.delete_collection(&schema.name).await?;

        let text_space = schema
            .vector_spaces
            .iter()
            .find(|s| s.kind == VectorKind::Single)
            .map(|s| s.name.as_str());
        for space in &schema.vector_spaces {
            let ns = namespace(&schema.name, &space.name);
            let full_text_search = (Some(space.name.as_str()) == text_space
                && !schema.text_fields.is_empty())
            .then_some(&schema.text_fields);
            self.client
                .create_namespace(&CreateNamespace {
                    name: &ns,
                    dimensions: space.dimensions,
                    distance_metric: space.distance,
                    full_text_search,
                })
                .await?;
            debug!(namespace = %ns, dimensions = space.dimensions, "created namespace");
        }
        self.schemas.insert(schema.name.clone(), schema.clone());
        info!(spaces = schema.vector_spaces.len(), "created collection");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_collection(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        let spaces: Vec<String> = match self.schemas.remove(name) {
            Some((_, schema)) => schema.vector_spaces.into_iter().map(|s| s.name).collect(),
            None => self.default_spaces.clone(),
        };
        let mut existed = false;
        for space in spaces {
            existed |= self.client.delete_namespace(&namespace(name, &space)).await?;
        }
        if existed {
            info!("deleted collection");
        }
        Ok(existed)
    }

    #[instrument(skip(self, records), fields(records = records.len()))]
    async fn insert_data(
        &self,
        collection: &str,
        records: Vec<Record>,
        batch_size: usize,
    ) -> Result<InsertReport> {
        self.ensure_open()?;
        if batch_size == 0 {
            return Err(BenchError::Validation("batch_size must be positive".to_string()));
        }
        let schema = self
            .schemas
            .get(collection)
            .map(|s| s.value().clone())
            .ok_or_else(|| BenchError::CollectionNotFound {
                collection: collection.to_string(),
            })?;

        let mut report = InsertReport::default();
        let mut records = records.into_iter().enumerate().peekable();
        while records.peek().is_some() {
            let mut indices = Vec::new();
            let mut chunk = Vec::new();
            for (index, record) in records.by_ref().take(batch_size) {
                if record.vectors.is_empty() {
                    report.failed.push(FailedRecord {
                        index,
                        id: record.id.clone(),
                        reason: "record has no vectors".to_string(),
                    });
                    continue;
                }
                match prepare_record(&schema, index, &record) {
                    Ok(id) => {
                        indices.push(index);
                        chunk.push((id, record));
                    }
                    Err(failed) => report.failed.push(failed),
                }
            }
            if chunk.is_empty() {
                continue;
            }

            match self.upsert_chunk(&schema, &chunk).await {
                Ok(()) => report.inserted.extend(chunk.into_iter().map(|(id, _)| id)),
                Err(e) => {
                    warn!(error = %e, records = chunk.len(), "chunk upsert failed");
                    let reason = e.to_string();
                    report.failed.extend(indices.into_iter().zip(chunk).map(
                        |(index, (id, _))| FailedRecord {
                            index,
                            id: Some(id),
                            reason: reason.clone(),
                        },
                    ));
                }
            }
        }
        report.failed.sort_by_key(|f| f.index);

        metrics::RECORDS_INSERTED_TOTAL
            .with_label_values(&[collection, "ok"])
            .inc_by(report.inserted.len() as u64);
        metrics::RECORDS_INSERTED_TOTAL
            .with_label_values(&[collection, "error"])
            .inc_by(report.failed.len() as u64);
        info!(
            inserted = report.inserted.len(),
            failed = report.failed.len(),
            "insert complete"
        );
        Ok(report)
    }

    async fn search(
        &self,
        query: &str,
        collection: &str,
        limit: usize,
        query_method: Option<&str>,
        options: &SearchOptions,
    ) -> Result<QueryResult> {
        self.ensure_open()?;
        self.query
            .query(query, collection, limit, query_method, options)
            .await
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("zeppelin adapter closed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "zeppelin"
    }
}
