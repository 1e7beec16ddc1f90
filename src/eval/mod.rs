//! Benchmark evaluator.
//!
//! One run moves through `Idle → Loading → Querying → Scoring → Done`,
//! ending in `Failed` if loading, configuration, or the worker pool fails.
//! The current phase is published on a `watch` channel.
//!
//! Queries run as independent tokio tasks, at most `workers` at a time,
//! submitted in batches of `query_batch_size`. Each task returns an owned
//! outcome; rows are assembled single-threaded in dataset order once every
//! task has joined. A query whose search fails becomes an error row with
//! NaN scores and the run continues.

pub mod scoring;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use ulid::Ulid;

use crate::config::Config;
use crate::dataset::{Dataset, LoadOptions};
use crate::error::{BenchError, Result};
use crate::query::{QueryMethod, SearchOptions};
use crate::traits::{DatasetLoader, ModelProvider, VectorDbAdapter};
use crate::types::{Candidate, QueryId, QueryItem, QueryResult, RelevanceJudgments};

use scoring::{score_query, QueryScores};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Loading,
    Querying,
    Scoring,
    Done,
    Failed,
}

/// One returned candidate of one query.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub query_id: QueryId,
    pub query: String,
    /// 1-based.
    pub rank: usize,
    pub candidate: Candidate,
    pub relevance: u32,
}

/// Scores of one query. Error rows carry NaN scores and `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsRow {
    pub query_id: QueryId,
    pub query: String,
    pub total_results: usize,
    pub correctly_returned: usize,
    pub incorrectly_returned: usize,
    pub relevant_results: usize,
    pub non_relevant_results: usize,
    pub relevant_in_dataset: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub ndcg: f64,
    /// NDCG with binary gains.
    pub secondary_ndcg: f64,
    pub error: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl MetricsRow {
    fn scored(item: &QueryItem, scores: QueryScores) -> Self {
        Self {
            query_id: item.id.clone(),
            query: item.text.clone(),
            total_results: scores.total_results,
            correctly_returned: scores.correctly_returned,
            incorrectly_returned: scores.incorrectly_returned,
            relevant_results: scores.relevant_results,
            non_relevant_results: scores.non_relevant_results,
            relevant_in_dataset: scores.relevant_in_dataset,
            accuracy: scores.accuracy,
            precision: scores.precision,
            recall: scores.recall,
            ndcg: scores.ndcg,
            secondary_ndcg: scores.secondary_ndcg,
            error: None,
            metadata: item.metadata.clone(),
        }
    }

    fn failed(item: &QueryItem, relevant_in_dataset: usize, error: &BenchError) -> Self {
        Self {
            query_id: item.id.clone(),
            query: item.text.clone(),
            total_results: 0,
            correctly_returned: 0,
            incorrectly_returned: 0,
            relevant_results: 0,
            non_relevant_results: 0,
            relevant_in_dataset,
            accuracy: f64::NAN,
            precision: f64::NAN,
            recall: f64::NAN,
            ndcg: f64::NAN,
            secondary_ndcg: f64::NAN,
            error: Some(error.to_string()),
            metadata: item.metadata.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Means over successfully answered queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub queries: usize,
    pub failed: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub ndcg: f64,
    pub secondary_ndcg: f64,
}

impl MetricsSummary {
    pub fn from_rows(rows: &[MetricsRow]) -> Self {
        let ok: Vec<&MetricsRow> = rows.iter().filter(|r| !r.is_error()).collect();
        let mean = |f: fn(&MetricsRow) -> f64| {
            if ok.is_empty() {
                f64::NAN
            } else {
                ok.iter().map(|r| f(r)).sum::<f64>() / ok.len() as f64
            }
        };
        Self {
            queries: rows.len(),
            failed: rows.len() - ok.len(),
            accuracy: mean(|r| r.accuracy),
            precision: mean(|r| r.precision),
            recall: mean(|r| r.recall),
            ndcg: mean(|r| r.ndcg),
            secondary_ndcg: mean(|r| r.secondary_ndcg),
        }
    }
}

/// Per-query search latency, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
}

impl LatencySummary {
    fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.is_empty() {
            return Self::default();
        }
        Self {
            count: hist.len(),
            p50_ms: hist.value_at_quantile(0.50) as f64 / 1000.0,
            p95_ms: hist.value_at_quantile(0.95) as f64 / 1000.0,
            p99_ms: hist.value_at_quantile(0.99) as f64 / 1000.0,
            max_ms: hist.max() as f64 / 1000.0,
            mean_ms: hist.mean() / 1000.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub run_id: Ulid,
    pub started_at: DateTime<Utc>,
    pub results: Vec<ResultRow>,
    pub metrics: Vec<MetricsRow>,
    pub summary: MetricsSummary,
    pub latency: LatencySummary,
    /// Metadata columns of the metrics table, in order.
    pub metadata_columns: Vec<String>,
}

/// Knobs of one evaluation run.
#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    pub collection: String,
    pub split: String,
    pub load: LoadOptions,
    /// `None` uses the store's default method.
    pub query_method: Option<String>,
    pub limit: usize,
    /// Metric cutoff; defaults to `limit`.
    pub k: Option<usize>,
    pub workers: usize,
    pub query_batch_size: usize,
    /// Model used to precompute query embeddings when a provider is set.
    pub embedding_model: String,
}

impl EvaluatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            collection: config.vector_store.collection.clone(),
            split: config.dataset.split.clone(),
            load: LoadOptions {
                sample_size: config.dataset.sample_size,
                seed: config.dataset.seed,
            },
            query_method: Some(config.query.method.clone()),
            limit: config.query.limit,
            k: config.evaluation.k,
            workers: config.evaluation.effective_workers(),
            query_batch_size: config.evaluation.query_batch_size,
            embedding_model: config.query.target_vector.clone(),
        }
    }

    fn k(&self) -> usize {
        self.k.unwrap_or(self.limit)
    }
}

struct QueryOutcome {
    index: usize,
    result: Result<QueryResult>,
    elapsed: Duration,
}

pub struct BenchmarkEvaluator {
    store: Arc<dyn VectorDbAdapter>,
    loader: Arc<dyn DatasetLoader>,
    provider: Option<Arc<dyn ModelProvider>>,
    settings: EvaluatorSettings,
    phase: watch::Sender<RunPhase>,
}

impl BenchmarkEvaluator {
    pub fn new(
        store: Arc<dyn VectorDbAdapter>,
        loader: Arc<dyn DatasetLoader>,
        settings: EvaluatorSettings,
    ) -> Self {
        let (phase, _) = watch::channel(RunPhase::Idle);
        Self {
            store,
            loader,
            provider: None,
            settings,
            phase,
        }
    }

    /// Precompute query embeddings through `provider` instead of letting the
    /// store embed query text itself.
    pub fn with_model_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: RunPhase) {
        debug!(?phase, "evaluator phase");
        self.phase.send_replace(phase);
    }

    /// Load the dataset and evaluate every unique query in it.
    #[instrument(skip(self), fields(dataset = self.loader.name(), split = %self.settings.split))]
    pub async fn run(&self) -> Result<BenchmarkReport> {
        self.check_method()?;
        self.set_phase(RunPhase::Loading);
        let dataset = match self.loader.load(&self.settings.split, &self.settings.load).await {
            Ok(dataset) => dataset,
            Err(e) => {
                error!(error = %e, "dataset load failed");
                self.set_phase(RunPhase::Failed);
                return Err(e);
            }
        };
        self.evaluate_loaded(&dataset).await
    }

    /// Evaluate an already loaded dataset.
    pub async fn evaluate_dataset(&self, dataset: &Dataset) -> Result<BenchmarkReport> {
        self.check_method()?;
        self.set_phase(RunPhase::Loading);
        self.evaluate_loaded(dataset).await
    }

    /// An unknown method name fails the whole run before any work starts.
    fn check_method(&self) -> Result<()> {
        let Some(name) = self.settings.query_method.as_deref() else {
            return Ok(());
        };
        if let Err(e) = name.parse::<QueryMethod>() {
            error!(error = %e, "query method rejected");
            self.set_phase(RunPhase::Failed);
            return Err(e);
        }
        Ok(())
    }

    async fn evaluate_loaded(&self, dataset: &Dataset) -> Result<BenchmarkReport> {
        let result = self.evaluate_inner(dataset).await;
        match &result {
            Ok(report) => {
                self.set_phase(RunPhase::Done);
                info!(
                    run_id = %report.run_id,
                    queries = report.summary.queries,
                    failed = report.summary.failed,
                    ndcg = report.summary.ndcg,
                    recall = report.summary.recall,
                    p95_ms = report.latency.p95_ms,
                    "evaluation complete"
                );
            }
            Err(e) => {
                error!(error = %e, "evaluation failed");
                self.set_phase(RunPhase::Failed);
            }
        }
        result
    }

    async fn evaluate_inner(&self, dataset: &Dataset) -> Result<BenchmarkReport> {
        let run_id = Ulid::new();
        let started_at = Utc::now();
        let columns = self.loader.columns();

        let queries = dataset.queries(&columns);
        if queries.is_empty() {
            return Err(BenchError::EmptyDataset {
                dataset: self.loader.name().to_string(),
                split: self.settings.split.clone(),
            });
        }
        let judgments = dataset.judgments(&columns);
        info!(
            %run_id,
            queries = queries.len(),
            judged_queries = judgments.query_count(),
            workers = self.settings.workers,
            "starting evaluation"
        );

        self.set_phase(RunPhase::Querying);
        let outcomes = self.run_queries(&queries).await?;

        self.set_phase(RunPhase::Scoring);
        let mut hist = Histogram::<u64>::new(3)
            .map_err(|e| BenchError::Internal(format!("latency histogram: {e}")))?;
        let (results, metrics) = self.score(&queries, outcomes, &judgments, &mut hist);
        let summary = MetricsSummary::from_rows(&metrics);

        Ok(BenchmarkReport {
            run_id,
            started_at,
            results,
            metrics,
            summary,
            latency: LatencySummary::from_histogram(&hist),
            metadata_columns: columns.metadata.clone(),
        })
    }

    /// Run every query on the worker pool. Outcomes come back indexed by
    /// query position.
    async fn run_queries(&self, queries: &[QueryItem]) -> Result<Vec<QueryOutcome>> {
        let workers = self.settings.workers.max(1);
        let batch_size = self.settings.query_batch_size.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut outcomes = Vec::with_capacity(queries.len());

        for (batch_no, batch) in queries.chunks(batch_size).enumerate() {
            let mut tasks = JoinSet::new();
            for (i, item) in batch.iter().enumerate() {
                let index = batch_no * batch_size + i;
                let item = item.clone();
                let store = Arc::clone(&self.store);
                let provider = self.provider.clone();
                let semaphore = Arc::clone(&semaphore);
                let collection = self.settings.collection.clone();
                let method = self.settings.query_method.clone();
                let model = self.settings.embedding_model.clone();
                let limit = self.settings.limit;

                tasks.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| BenchError::Internal(format!("worker pool closed: {e}")))?;
                    let start = Instant::now();
                    let result = search_one(
                        store.as_ref(),
                        provider.as_deref(),
                        &item,
                        &collection,
                        method.as_deref(),
                        &model,
                        limit,
                    )
                    .await;
                    Ok::<_, BenchError>(QueryOutcome {
                        index,
                        result,
                        elapsed: start.elapsed(),
                    })
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let outcome = joined
                    .map_err(|e| BenchError::Internal(format!("query task failed: {e}")))??;
                outcomes.push(outcome);
            }
            debug!(batch = batch_no, done = outcomes.len(), "query batch complete");
        }

        outcomes.sort_by_key(|o| o.index);
        Ok(outcomes)
    }

    fn score(
        &self,
        queries: &[QueryItem],
        outcomes: Vec<QueryOutcome>,
        judgments: &RelevanceJudgments,
        hist: &mut Histogram<u64>,
    ) -> (Vec<ResultRow>, Vec<MetricsRow>) {
        let k = self.settings.k();
        let mut results = Vec::new();
        let mut metrics = Vec::with_capacity(outcomes.len());

        for outcome in outcomes {
            let item = &queries[outcome.index];
            hist.record(outcome.elapsed.as_micros() as u64).ok();

            match outcome.result {
                Ok(result) => {
                    let scores = score_query(&result, &item.id, judgments, k);
                    debug!(
                        query_id = %item.id,
                        ndcg = scores.ndcg,
                        recall = scores.recall,
                        "scored query"
                    );
                    metrics.push(MetricsRow::scored(item, scores));
                    results.extend(result.candidates.into_iter().enumerate().map(|(i, c)| {
                        ResultRow {
                            query_id: item.id.clone(),
                            query: item.text.clone(),
                            rank: i + 1,
                            relevance: judgments.grade(&item.id, &c.id),
                            candidate: c,
                        }
                    }));
                }
                Err(e) => {
                    warn!(query_id = %item.id, error = %e, "query failed");
                    metrics.push(MetricsRow::failed(
                        item,
                        judgments.relevant_count(&item.id),
                        &e,
                    ));
                }
            }
        }
        debug!(rows = results.len(), "joined results");
        (results, metrics)
    }
}

async fn search_one(
    store: &dyn VectorDbAdapter,
    provider: Option<&dyn ModelProvider>,
    item: &QueryItem,
    collection: &str,
    method: Option<&str>,
    embedding_model: &str,
    limit: usize,
) -> Result<QueryResult> {
    let mut options = SearchOptions {
        image: item.image.clone(),
        ..Default::default()
    };
    if let Some(provider) = provider {
        let embedding = provider
            .get_embedding(&item.text, item.image.as_ref(), embedding_model)
            .await?;
        options.embedding = Some(embedding);
    }
    store
        .search(&item.text, collection, limit, method, &options)
        .await
}
