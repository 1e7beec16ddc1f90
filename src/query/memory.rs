//! Query strategies over [`crate::store::MemoryStore`] collections.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::config::QueryConfig;
use crate::error::{BenchError, Result};
use crate::index::{max_sim, similarity, top_k};
use crate::store::memory::{Collections, MemoryCollection, MemoryStore};
use crate::traits::ModelProvider;
use crate::types::{Candidate, EmbeddingData, QueryResult, VectorSpace};

use super::{embed_query, query_properties, target_vector, Query, QueryRequest};

pub struct MemoryQuery {
    config: QueryConfig,
    provider: Arc<dyn ModelProvider>,
    collections: Collections,
}

impl MemoryQuery {
    pub fn new(
        config: QueryConfig,
        provider: Arc<dyn ModelProvider>,
        collections: Collections,
    ) -> Self {
        Self {
            config,
            provider,
            collections,
        }
    }
}

fn space_of<'a>(col: &'a MemoryCollection, name: &str) -> Result<&'a VectorSpace> {
    col.schema
        .vector_space(name)
        .ok_or_else(|| BenchError::UnknownVectorSpace {
            collection: col.schema.name.clone(),
            space: name.to_string(),
        })
}

fn candidates(col: &MemoryCollection, hits: Vec<(usize, f32)>) -> QueryResult {
    let candidates = hits
        .into_iter()
        .map(|(slot, score)| Candidate {
            id: col.ids[slot].clone(),
            score,
            attributes: col.properties[slot].clone(),
        })
        .collect();
    QueryResult { candidates }
}

#[async_trait]
impl Query for MemoryQuery {
    fn config(&self) -> &QueryConfig {
        &self.config
    }

    #[instrument(skip(self, request), fields(collection = request.collection))]
    async fn vector_query(&self, request: QueryRequest<'_>) -> Result<QueryResult> {
        let col = MemoryStore::collection(&self.collections, request.collection)?;
        let space_name = target_vector(&self.config, request.options);
        {
            let guard = col.read().await;
            space_of(&guard, space_name)?;
        }

        let embedding = embed_query(self.provider.as_ref(), &request, space_name, false).await?;
        let query = match embedding.as_single() {
            Some(v) => v.to_vec(),
            None => embedding.pooled(),
        };

        let guard = col.read().await;
        let space = space_of(&guard, space_name)?;
        if query.len() != space.dimensions {
            return Err(BenchError::DimensionMismatch {
                expected: space.dimensions,
                actual: query.len(),
            });
        }

        let metric = space.distance;
        let column = guard.vectors.get(space_name).map(Vec::as_slice).unwrap_or(&[]);
        let scores = column.iter().enumerate().filter_map(|(slot, v)| match v {
            Some(EmbeddingData::Single(v)) => Some((slot, similarity(&query, v, metric))),
            Some(EmbeddingData::Multi(tokens)) => {
                Some((slot, max_sim(std::slice::from_ref(&query), tokens)))
            }
            None => None,
        });
        let hits = top_k(scores, request.limit);
        debug!(space = space_name, hits = hits.len(), "vector search");
        Ok(candidates(&guard, hits))
    }

    #[instrument(skip(self, request), fields(collection = request.collection))]
    async fn keyword_query(&self, request: QueryRequest<'_>) -> Result<QueryResult> {
        let col = MemoryStore::collection(&self.collections, request.collection)?;
        let guard = col.read().await;
        let fields = query_properties(&self.config, request.options);

        let indexes: Vec<_> = fields
            .iter()
            .filter_map(|f| guard.text_indexes.get(f))
            .collect();
        if indexes.is_empty() {
            return Err(BenchError::Validation(format!(
                "collection '{}' has no full-text index on {}",
                request.collection,
                fields.join(", ")
            )));
        }

        let mut totals = vec![0.0f32; guard.len()];
        let mut matched = vec![false; guard.len()];
        for index in indexes {
            for (slot, score) in index.search(request.text) {
                totals[slot] += score;
                matched[slot] = true;
            }
        }
        let scores = totals
            .into_iter()
            .enumerate()
            .filter(|(slot, _)| matched[*slot]);
        let hits = top_k(scores, request.limit);
        debug!(hits = hits.len(), "keyword search");
        Ok(candidates(&guard, hits))
    }

    #[instrument(skip(self, request), fields(collection = request.collection))]
    async fn late_interaction_query(&self, request: QueryRequest<'_>) -> Result<QueryResult> {
        let col = MemoryStore::collection(&self.collections, request.collection)?;
        let space_name = self.config.late_interaction_vector.as_str();
        {
            let guard = col.read().await;
            space_of(&guard, space_name)?;
        }

        let embedding = embed_query(self.provider.as_ref(), &request, space_name, true).await?;
        let tokens: Vec<Vec<f32>> = match &embedding.data {
            EmbeddingData::Multi(tokens) => tokens.clone(),
            EmbeddingData::Single(v) => vec![v.clone()],
        };

        let guard = col.read().await;
        let space = space_of(&guard, space_name)?;
        if let Some(bad) = tokens.iter().find(|t| t.len() != space.dimensions) {
            return Err(BenchError::DimensionMismatch {
                expected: space.dimensions,
                actual: bad.len(),
            });
        }

        let column = guard.vectors.get(space_name).map(Vec::as_slice).unwrap_or(&[]);
        let scores = column.iter().enumerate().filter_map(|(slot, v)| match v {
            Some(EmbeddingData::Multi(doc)) => Some((slot, max_sim(&tokens, doc))),
            Some(EmbeddingData::Single(v)) => {
                Some((slot, max_sim(&tokens, std::slice::from_ref(v))))
            }
            None => None,
        });
        let hits = top_k(scores, request.limit);
        debug!(
            space = space_name,
            query_tokens = tokens.len(),
            hits = hits.len(),
            "late interaction search"
        );
        Ok(candidates(&guard, hits))
    }
}
