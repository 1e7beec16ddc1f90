use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use imsearch_eval::config::{QueryConfig, StoreBackend, VectorStoreConfig};
use imsearch_eval::dataset::{Dataset, LoadOptions};
use imsearch_eval::error::{BenchError, Result};
use imsearch_eval::query::SearchOptions;
use imsearch_eval::traits::{ClientParams, DatasetLoader, ModelProvider, VectorDbAdapter};
use imsearch_eval::types::{
    Candidate, CollectionSchema, Embedding, ImageTensor, InsertReport, QueryResult, Record,
};

/// Deterministic provider: every embedding is a bag-of-words over a fixed
/// vocabulary, so similarity is exactly word overlap.
pub struct StubProvider {
    vocab: Vec<String>,
    /// Caption per image tag (see [`tagged_image`]).
    captions: HashMap<u32, String>,
    /// Texts whose embedding fails.
    failing: Mutex<HashSet<String>>,
    pub embedding_calls: AtomicUsize,
    pub caption_calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(vocab: &[&str]) -> Self {
        Self {
            vocab: vocab.iter().map(|w| w.to_string()).collect(),
            captions: HashMap::new(),
            failing: Mutex::new(HashSet::new()),
            embedding_calls: AtomicUsize::new(0),
            caption_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_caption(mut self, tag: u32, caption: &str) -> Self {
        self.captions.insert(tag, caption.to_string());
        self
    }

    pub fn fail_on(&self, text: &str) {
        self.failing.lock().unwrap().insert(text.to_string());
    }

    pub fn dim(&self) -> usize {
        self.vocab.len()
    }

    fn one_hot(&self, word: &str) -> Option<Vec<f32>> {
        let slot = self.vocab.iter().position(|w| w == word)?;
        let mut v = vec![0.0; self.vocab.len()];
        v[slot] = 1.0;
        Some(v)
    }

    fn words(text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .collect()
    }

    /// Bag-of-words vector of `text`.
    pub fn bag(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.vocab.len()];
        for word in Self::words(text) {
            if let Some(hot) = self.one_hot(&word) {
                v.iter_mut().zip(hot).for_each(|(a, b)| *a += b);
            }
        }
        v
    }
}

#[async_trait]
impl ModelProvider for StubProvider {
    async fn get_embedding(
        &self,
        text: &str,
        _image: Option<&ImageTensor>,
        model_name: &str,
    ) -> Result<Embedding> {
        self.embedding_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(text) {
            return Err(BenchError::inference(model_name, "stub failure"));
        }
        match model_name {
            "clip" | "align" => Ok(Embedding::single(model_name, self.bag(text))),
            "colbert" => {
                let mut tokens: Vec<Vec<f32>> = Self::words(text)
                    .iter()
                    .filter_map(|w| self.one_hot(w))
                    .collect();
                if tokens.is_empty() {
                    tokens.push(vec![0.0; self.vocab.len()]);
                }
                Ok(Embedding::multi(model_name, tokens))
            }
            other => Err(BenchError::UnknownModel {
                kind: "embedding",
                model: other.to_string(),
            }),
        }
    }

    async fn generate_caption(&self, image: &ImageTensor, model_name: &str) -> Result<String> {
        self.caption_calls.fetch_add(1, Ordering::SeqCst);
        let tag = image.data.first().copied().unwrap_or_default() as u32;
        self.captions
            .get(&tag)
            .cloned()
            .ok_or_else(|| BenchError::inference(model_name, format!("no caption for {tag}")))
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// A 1x1 image whose first channel carries `tag`.
pub fn tagged_image(tag: u32) -> ImageTensor {
    ImageTensor {
        height: 1,
        width: 1,
        data: vec![tag as f32, 0.0, 0.0],
    }
}

/// Store that answers searches from a script keyed by query text.
pub struct ScriptedStore {
    answers: HashMap<String, std::result::Result<Vec<Candidate>, String>>,
    delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub searches: AtomicUsize,
    /// Query texts that arrived with a precomputed embedding.
    pub embedded: Mutex<Vec<String>>,
    /// Methods requested, in arrival order.
    pub methods: Mutex<Vec<Option<String>>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            answers: HashMap::new(),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            searches: AtomicUsize::new(0),
            embedded: Mutex::new(Vec::new()),
            methods: Mutex::new(Vec::new()),
        }
    }

    /// Answer `query` with `ids`, scored in descending order.
    pub fn answer(mut self, query: &str, ids: &[&str]) -> Self {
        let n = ids.len() as f32;
        let candidates = ids
            .iter()
            .enumerate()
            .map(|(i, id)| Candidate::new(*id, n - i as f32))
            .collect();
        self.answers.insert(query.to_string(), Ok(candidates));
        self
    }

    pub fn fail(mut self, query: &str, reason: &str) -> Self {
        self.answers.insert(query.to_string(), Err(reason.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl VectorDbAdapter for ScriptedStore {
    async fn init_client(_params: ClientParams) -> Result<Self> {
        Ok(Self::new())
    }

    async fn create_collection(&self, _schema: &CollectionSchema) -> Result<()> {
        Ok(())
    }

    async fn delete_collection(&self, _name: &str) -> Result<bool> {
        Ok(true)
    }

    async fn insert_data(
        &self,
        _collection: &str,
        records: Vec<Record>,
        _batch_size: usize,
    ) -> Result<InsertReport> {
        Ok(InsertReport {
            inserted: records.into_iter().filter_map(|r| r.id).collect(),
            failed: Vec::new(),
        })
    }

    async fn search(
        &self,
        query: &str,
        _collection: &str,
        limit: usize,
        query_method: Option<&str>,
        options: &SearchOptions,
    ) -> Result<QueryResult> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.methods
            .lock()
            .unwrap()
            .push(query_method.map(str::to_string));
        if options.embedding.is_some() {
            self.embedded.lock().unwrap().push(query.to_string());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.answers.get(query) {
            Some(Ok(candidates)) => Ok(QueryResult::ranked(candidates.clone(), limit)),
            Some(Err(reason)) => Err(BenchError::Remote {
                status: 500,
                message: reason.clone(),
            }),
            None => Ok(QueryResult::default()),
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Loader serving a fixed in-memory dataset.
pub struct StaticLoader {
    pub dataset: Dataset,
    pub metadata: Vec<String>,
}

impl StaticLoader {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            metadata: vec!["category".to_string()],
        }
    }
}

#[async_trait]
impl DatasetLoader for StaticLoader {
    async fn load(&self, _split: &str, options: &LoadOptions) -> Result<Dataset> {
        Ok(self.dataset.clone().sample(options))
    }

    fn query_column(&self) -> &str {
        "query"
    }

    fn query_id_column(&self) -> &str {
        "query_id"
    }

    fn relevance_column(&self) -> &str {
        "relevant"
    }

    fn candidate_id_column(&self) -> &str {
        "image_id"
    }

    fn metadata_columns(&self) -> &[String] {
        &self.metadata
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Client params for an embedded store backed by `provider`.
pub fn memory_params(provider: Arc<dyn ModelProvider>, query: QueryConfig) -> ClientParams {
    ClientParams {
        store: VectorStoreConfig {
            backend: StoreBackend::Memory,
            ..Default::default()
        },
        query,
        model_provider: provider,
    }
}
