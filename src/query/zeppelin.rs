//! Query strategies over a Zeppelin server.
//!
//! Vector search is a near-vector query against the space's namespace and
//! keyword search is a BM25 `rank_by` query.
//!
//! Late interaction runs in two rounds over the token rows of the multi-vector
//! namespace. Each query token first pulls its nearest token rows, which
//! nominate candidate documents. Each query token then scores every token of
//! those candidates through an `in` filter on the parent id, and the
//! per-document MaxSim is summed on the client.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, instrument};

use crate::config::QueryConfig;
use crate::error::{BenchError, Result};
use crate::store::zeppelin::{
    namespace, Schemas, WireFilter, WireQuery, WireResult, ZeppelinClient, PARENT_ID_ATTR,
    TOKEN_COUNT_ATTR,
};
use crate::traits::ModelProvider;
use crate::types::{
    AttributeValue, Candidate, DistanceMetric, EmbeddingData, QueryResult, VectorKind,
};

use super::{embed_query, query_properties, target_vector, Query, QueryRequest};

pub struct ZeppelinQuery {
    config: QueryConfig,
    provider: Arc<dyn ModelProvider>,
    client: Arc<ZeppelinClient>,
    schemas: Schemas,
}

impl ZeppelinQuery {
    pub fn new(
        config: QueryConfig,
        provider: Arc<dyn ModelProvider>,
        client: Arc<ZeppelinClient>,
        schemas: Schemas,
    ) -> Self {
        Self {
            config,
            provider,
            client,
            schemas,
        }
    }

    /// Distance metric and dimensionality of a space, when the collection
    /// was created through this process.
    fn space_info(&self, collection: &str, space: &str) -> Result<Option<(DistanceMetric, usize)>> {
        let Some(schema) = self.schemas.get(collection) else {
            return Ok(None);
        };
        let space = schema
            .vector_space(space)
            .ok_or_else(|| BenchError::UnknownVectorSpace {
                collection: collection.to_string(),
                space: space.to_string(),
            })?;
        Ok(Some((space.distance, space.dimensions)))
    }

    /// Namespace holding the full-text index.
    fn text_namespace(&self, collection: &str) -> String {
        let space = self
            .schemas
            .get(collection)
            .and_then(|schema| {
                schema
                    .vector_spaces
                    .iter()
                    .find(|s| s.kind == VectorKind::Single)
                    .map(|s| s.name.clone())
            })
            .unwrap_or_else(|| self.config.target_vector.clone());
        namespace(collection, &space)
    }

    async fn run(&self, collection: &str, ns: &str, request: &WireQuery) -> Result<Vec<WireResult>> {
        match self.client.query(ns, request).await {
            Ok(resp) => Ok(resp.results),
            Err(BenchError::Remote { status: 404, .. }) => Err(BenchError::CollectionNotFound {
                collection: collection.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Metric of `space`, after checking every vector against its width.
    fn checked_metric(
        &self,
        collection: &str,
        space: &str,
        vectors: &[Vec<f32>],
        default_metric: DistanceMetric,
    ) -> Result<DistanceMetric> {
        let Some((metric, dimensions)) = self.space_info(collection, space)? else {
            return Ok(default_metric);
        };
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(BenchError::DimensionMismatch {
                expected: dimensions,
                actual: bad.len(),
            });
        }
        Ok(metric)
    }

    async fn near_vector(
        &self,
        request: &QueryRequest<'_>,
        space: &str,
        values: Vec<f32>,
        default_metric: DistanceMetric,
    ) -> Result<QueryResult> {
        let metric = self.checked_metric(
            request.collection,
            space,
            std::slice::from_ref(&values),
            default_metric,
        )?;

        let ns = namespace(request.collection, space);
        let wire = WireQuery::near(values, request.limit);
        let results = self.run(request.collection, &ns, &wire).await?;
        debug!(namespace = %ns, hits = results.len(), "near-vector query");
        let candidates = results
            .into_iter()
            .map(|r| candidate(r, |d| distance_to_score(d, metric)))
            .collect();
        Ok(QueryResult::ranked(candidates, request.limit))
    }
}

/// Zeppelin ranks by distance; convert to a higher-is-better score.
fn distance_to_score(distance: f32, metric: DistanceMetric) -> f32 {
    match metric {
        DistanceMetric::Cosine => 1.0 - distance,
        DistanceMetric::Euclidean | DistanceMetric::DotProduct => -distance,
    }
}

fn token_count(value: Option<AttributeValue>) -> usize {
    match value {
        Some(AttributeValue::Integer(n)) if n > 0 => n as usize,
        _ => 1,
    }
}

fn parent_id(result: &WireResult) -> Option<String> {
    result
        .attributes
        .as_ref()?
        .get(PARENT_ID_ATTR)
        .map(AttributeValue::as_key)
}

/// Sum over query tokens of the best score against each document's tokens.
/// `per_token` holds one result list per query token.
fn max_sim_totals(
    per_token: Vec<Vec<WireResult>>,
    metric: DistanceMetric,
) -> HashMap<String, f32> {
    let mut totals: HashMap<String, f32> = HashMap::new();
    for results in per_token {
        let mut best: HashMap<String, f32> = HashMap::new();
        for result in &results {
            let Some(doc) = parent_id(result) else {
                continue;
            };
            let score = distance_to_score(result.score, metric);
            best.entry(doc)
                .and_modify(|b| *b = b.max(score))
                .or_insert(score);
        }
        for (doc, score) in best {
            *totals.entry(doc).or_insert(0.0) += score;
        }
    }
    totals
}

fn candidate(result: WireResult, score: impl Fn(f32) -> f32) -> Candidate {
    Candidate {
        id: result.id,
        score: score(result.score),
        attributes: result.attributes.unwrap_or_default(),
    }
}

#[async_trait]
impl Query for ZeppelinQuery {
    fn config(&self) -> &QueryConfig {
        &self.config
    }

    #[instrument(skip(self, request), fields(collection = request.collection))]
    async fn vector_query(&self, request: QueryRequest<'_>) -> Result<QueryResult> {
        let space = target_vector(&self.config, request.options);
        let embedding = embed_query(self.provider.as_ref(), &request, space, false).await?;
        let values = match &embedding.data {
            EmbeddingData::Single(v) => v.clone(),
            EmbeddingData::Multi(_) => embedding.pooled(),
        };
        self.near_vector(&request, space, values, DistanceMetric::Cosine)
            .await
    }

    #[instrument(skip(self, request), fields(collection = request.collection))]
    async fn keyword_query(&self, request: QueryRequest<'_>) -> Result<QueryResult> {
        let fields = query_properties(&self.config, request.options);
        let rank_by = match fields {
            [] => {
                return Err(BenchError::Validation(
                    "keyword search needs at least one query property".to_string(),
                ))
            }
            [field] => serde_json::json!([field, "BM25", request.text]),
            many => {
                let terms: Vec<_> = many
                    .iter()
                    .map(|f| serde_json::json!([f, "BM25", request.text]))
                    .collect();
                serde_json::json!(["Sum", terms])
            }
        };

        let ns = self.text_namespace(request.collection);
        let wire = WireQuery {
            vector: None,
            rank_by: Some(rank_by),
            top_k: request.limit,
            filter: None,
        };
        let results = self.run(request.collection, &ns, &wire).await?;
        debug!(namespace = %ns, hits = results.len(), "bm25 query");
        let candidates = results.into_iter().map(|r| candidate(r, |s| s)).collect();
        Ok(QueryResult::ranked(candidates, request.limit))
    }

    #[instrument(skip(self, request), fields(collection = request.collection))]
    async fn late_interaction_query(&self, request: QueryRequest<'_>) -> Result<QueryResult> {
        let space = self.config.late_interaction_vector.as_str();
        let embedding = embed_query(self.provider.as_ref(), &request, space, true).await?;
        let tokens = match embedding.data {
            EmbeddingData::Multi(tokens) => tokens,
            EmbeddingData::Single(v) => vec![v],
        };
        if tokens.is_empty() {
            return Err(BenchError::inference(
                &embedding.model,
                "query produced no token embeddings",
            ));
        }
        let collection = request.collection;
        let metric = self.checked_metric(collection, space, &tokens, DistanceMetric::DotProduct)?;
        let ns = namespace(collection, space);

        let pool = self.config.pool_size(request.limit);
        let nominated = try_join_all(tokens.iter().map(|t| {
            let wire = WireQuery::near(t.clone(), pool);
            let ns = ns.as_str();
            async move { self.run(collection, ns, &wire).await }
        }))
        .await?;

        // Candidate documents with their token counts and properties.
        let mut docs: HashMap<String, (usize, HashMap<String, AttributeValue>)> = HashMap::new();
        for result in nominated.into_iter().flatten() {
            let Some(mut attributes) = result.attributes else {
                continue;
            };
            let Some(doc) = attributes.remove(PARENT_ID_ATTR).map(|v| v.as_key()) else {
                continue;
            };
            let count = token_count(attributes.remove(TOKEN_COUNT_ATTR));
            docs.entry(doc).or_insert((count, attributes));
        }
        if docs.is_empty() {
            return Ok(QueryResult::default());
        }

        let filter = WireFilter::In {
            field: PARENT_ID_ATTR.to_string(),
            values: docs.keys().cloned().map(AttributeValue::String).collect(),
        };
        let rows: usize = docs.values().map(|(count, _)| *count).sum();
        let scored = try_join_all(tokens.iter().map(|t| {
            let wire = WireQuery {
                filter: Some(filter.clone()),
                ..WireQuery::near(t.clone(), rows)
            };
            let ns = ns.as_str();
            async move { self.run(collection, ns, &wire).await }
        }))
        .await?;
        debug!(
            namespace = %ns,
            query_tokens = tokens.len(),
            candidates = docs.len(),
            token_rows = rows,
            "late-interaction rerank"
        );

        let totals = max_sim_totals(scored, metric);
        let candidates = docs
            .into_iter()
            .filter_map(|(id, (_, attributes))| {
                let score = *totals.get(&id)?;
                Some(Candidate {
                    id,
                    score,
                    attributes,
                })
            })
            .collect();
        Ok(QueryResult::ranked(candidates, request.limit))
    }
}
