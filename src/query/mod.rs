//! Retrieval strategies and the router that selects among them.
//!
//! A backend implements the primitive strategies (`vector_query`,
//! `keyword_query`, `late_interaction_query`); hybrid and blended
//! strategies are composed from those here, so every backend fuses scores
//! the same way.

pub mod fusion;
pub mod memory;
pub mod zeppelin;

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::config::QueryConfig;
use crate::error::{BenchError, Result};
use crate::metrics;
use crate::traits::ModelProvider;
use crate::types::{Embedding, ImageTensor, QueryResult};

pub use fusion::FusionMethod;
pub use memory::MemoryQuery;
pub use zeppelin::ZeppelinQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryMethod {
    Vector,
    Keyword,
    Hybrid,
    LateInteraction,
    HybridLateInteraction,
}

impl QueryMethod {
    pub const ALL: [QueryMethod; 5] = [
        QueryMethod::Vector,
        QueryMethod::Keyword,
        QueryMethod::Hybrid,
        QueryMethod::LateInteraction,
        QueryMethod::HybridLateInteraction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMethod::Vector => "vector",
            QueryMethod::Keyword => "keyword",
            QueryMethod::Hybrid => "hybrid",
            QueryMethod::LateInteraction => "colbert",
            QueryMethod::HybridLateInteraction => "hybrid_colbert",
        }
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            QueryMethod::Vector => &["near_vector", "clip_query"],
            QueryMethod::Keyword => &["bm25", "keyword_query"],
            QueryMethod::Hybrid => &["hybrid_query", "clip_hybrid_query"],
            QueryMethod::LateInteraction => &["late_interaction", "colbert_query"],
            QueryMethod::HybridLateInteraction => &["hybrid_colbert_query"],
        }
    }

    /// Resolve an optional method name. `None` selects `default`.
    ///
    /// # Errors
    /// Returns `BenchError::UnsupportedStrategy` for an unrecognized name.
    pub fn resolve(name: Option<&str>, default: QueryMethod) -> Result<QueryMethod> {
        match name {
            None => Ok(default),
            Some(name) => name.parse(),
        }
    }

    fn expected() -> String {
        Self::ALL
            .iter()
            .map(QueryMethod::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for QueryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMethod {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == needle || m.aliases().contains(&needle.as_str()))
            .ok_or_else(|| BenchError::UnsupportedStrategy {
                method: s.to_string(),
                expected: Self::expected(),
            })
    }
}

/// Per-call overrides for a search. Unset fields fall back to
/// [`QueryConfig`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Hybrid weight of the vector list.
    pub alpha: Option<f32>,
    /// Vector space searched by vector and hybrid strategies.
    pub target_vector: Option<String>,
    /// Text fields searched by keyword strategies.
    pub query_properties: Option<Vec<String>>,
    /// Precomputed query embedding for the target vector space.
    pub embedding: Option<Embedding>,
    /// Precomputed token embeddings for late interaction.
    pub late_embedding: Option<Embedding>,
    /// Image attached to the query; fused into computed embeddings.
    pub image: Option<ImageTensor>,
}

/// Arguments shared by every strategy call.
#[derive(Debug, Clone, Copy)]
pub struct QueryRequest<'a> {
    pub text: &'a str,
    pub collection: &'a str,
    pub limit: usize,
    pub options: &'a SearchOptions,
}

impl<'a> QueryRequest<'a> {
    pub fn with_limit(self, limit: usize) -> Self {
        Self { limit, ..self }
    }
}

/// A retrieval strategy contract.
///
/// Backends implement the primitive strategies; [`Query::query`] routes a
/// method name to one of them.
#[async_trait]
pub trait Query: Send + Sync {
    fn config(&self) -> &QueryConfig;

    async fn vector_query(&self, request: QueryRequest<'_>) -> Result<QueryResult>;

    async fn keyword_query(&self, request: QueryRequest<'_>) -> Result<QueryResult>;

    async fn late_interaction_query(&self, request: QueryRequest<'_>) -> Result<QueryResult>;

    /// Vector and keyword search over an enlarged candidate pool, fused by
    /// the configured [`FusionMethod`].
    async fn hybrid_query(&self, request: QueryRequest<'_>) -> Result<QueryResult> {
        let config = self.config();
        let alpha = hybrid_alpha(config, request.options)?;
        let pool = request.with_limit(config.pool_size(request.limit));

        let (vector, keyword) =
            futures::try_join!(self.vector_query(pool), self.keyword_query(pool))?;
        debug!(
            vector_hits = vector.len(),
            keyword_hits = keyword.len(),
            alpha,
            fusion = %config.fusion,
            "fusing hybrid results"
        );

        let fused = fusion::fuse(vector.candidates, keyword.candidates, alpha, config.fusion);
        Ok(QueryResult::ranked(fused, request.limit))
    }

    /// Hybrid results blended with late-interaction results, each taken
    /// from its top `blend_top_k` and normalized.
    async fn hybrid_late_interaction_query(
        &self,
        request: QueryRequest<'_>,
    ) -> Result<QueryResult> {
        let config = self.config();
        let top = request.with_limit(config.blend_top_k.max(request.limit));

        let (hybrid, late) =
            futures::try_join!(self.hybrid_query(top), self.late_interaction_query(top))?;
        let blended = fusion::blend(
            hybrid.candidates,
            late.candidates,
            config.hybrid_weight,
            config.colbert_weight,
        );
        Ok(QueryResult::ranked(blended, request.limit))
    }

    /// Run one query. `query_method = None` uses `config().method`.
    ///
    /// # Errors
    /// Returns `BenchError::UnsupportedStrategy` for an unknown method name,
    /// or any error raised by the selected strategy.
    #[instrument(skip(self, options), fields(method = tracing::field::Empty))]
    async fn query(
        &self,
        near_text: &str,
        collection: &str,
        limit: usize,
        query_method: Option<&str>,
        options: &SearchOptions,
    ) -> Result<QueryResult> {
        let default = self.config().method.parse()?;
        let method = QueryMethod::resolve(query_method, default)?;
        tracing::Span::current().record("method", method.as_str());

        let request = QueryRequest {
            text: near_text,
            collection,
            limit,
            options,
        };
        let start = Instant::now();
        let result = match method {
            QueryMethod::Vector => self.vector_query(request).await,
            QueryMethod::Keyword => self.keyword_query(request).await,
            QueryMethod::Hybrid => self.hybrid_query(request).await,
            QueryMethod::LateInteraction => self.late_interaction_query(request).await,
            QueryMethod::HybridLateInteraction => {
                self.hybrid_late_interaction_query(request).await
            }
        };

        metrics::QUERY_DURATION
            .with_label_values(&[method.as_str()])
            .observe(start.elapsed().as_secs_f64());
        metrics::QUERIES_TOTAL
            .with_label_values(&[method.as_str(), metrics::status(result.is_ok())])
            .inc();
        result
    }
}

fn hybrid_alpha(config: &QueryConfig, options: &SearchOptions) -> Result<f32> {
    let alpha = options.alpha.unwrap_or(config.alpha);
    if !(0.0..=1.0).contains(&alpha) {
        return Err(BenchError::Validation(format!(
            "hybrid alpha must be within [0, 1], got {alpha}"
        )));
    }
    Ok(alpha)
}

/// Vector space searched by vector-based strategies.
pub(crate) fn target_vector<'a>(config: &'a QueryConfig, options: &'a SearchOptions) -> &'a str {
    options
        .target_vector
        .as_deref()
        .unwrap_or(&config.target_vector)
}

/// Text fields searched by keyword strategies.
pub(crate) fn query_properties<'a>(
    config: &'a QueryConfig,
    options: &'a SearchOptions,
) -> &'a [String] {
    options
        .query_properties
        .as_deref()
        .unwrap_or(&config.query_properties)
}

/// Query embedding for `space`: the precomputed one when it was produced by
/// the model of the same name, otherwise computed through `provider`.
/// Vector spaces are named after the model that fills them.
pub(crate) async fn embed_query(
    provider: &dyn ModelProvider,
    request: &QueryRequest<'_>,
    space: &str,
    late: bool,
) -> Result<Embedding> {
    let precomputed = if late {
        request.options.late_embedding.as_ref()
    } else {
        request.options.embedding.as_ref()
    };
    if let Some(embedding) = precomputed.filter(|e| e.model == space) {
        return Ok(embedding.clone());
    }
    provider
        .get_embedding(request.text, request.options.image.as_ref(), space)
        .await
}
