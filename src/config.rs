//! Run configuration.
//!
//! Values come from three layers, later layers winning: built-in defaults,
//! an optional TOML file, and environment variables (the container launch
//! contract). Every key is optional.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BenchError, Result};
use crate::model::DEFAULT_CAPTION_PROMPT;
use crate::query::fusion::FusionMethod;
use crate::query::QueryMethod;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dataset: DatasetConfig,
    pub vector_store: VectorStoreConfig,
    pub inference: InferenceConfig,
    pub query: QueryConfig,
    pub evaluation: EvaluationConfig,
    pub output: OutputConfig,
    pub upload: UploadConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Human-readable dataset name, used in logs and errors.
    pub name: String,
    /// A directory holding `{split}.jsonl` files, or a single JSONL file.
    pub path: PathBuf,
    pub split: String,
    /// Number of rows to sample; 0 keeps every row.
    pub sample_size: usize,
    pub seed: u64,
    pub columns: ColumnConfig,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            name: "INQUIRE".to_string(),
            path: PathBuf::from("data/inquire"),
            split: "test".to_string(),
            sample_size: 0,
            seed: 42,
            columns: ColumnConfig::default(),
        }
    }
}

/// Column names of the tabular dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub query: String,
    pub query_id: String,
    pub relevance: String,
    pub candidate_id: String,
    pub metadata: Vec<String>,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            query: "query".to_string(),
            query_id: "query_id".to_string(),
            relevance: "relevant".to_string(),
            candidate_id: "inat24_image_id".to_string(),
            metadata: vec![
                "category".to_string(),
                "supercategory".to_string(),
                "iconic_group".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Zeppelin,
}

impl FromStr for StoreBackend {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "zeppelin" => Ok(StoreBackend::Zeppelin),
            other => Err(BenchError::Config(format!(
                "unknown vector store backend '{other}' (expected memory or zeppelin)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub backend: StoreBackend,
    pub host: String,
    pub port: u16,
    pub collection: String,
    /// Records per insert request.
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            host: "127.0.0.1".to_string(),
            port: 8080,
            collection: "INQUIRE".to_string(),
            batch_size: 100,
            timeout_secs: 30,
        }
    }
}

impl VectorStoreConfig {
    pub fn base_url(&self) -> Result<Url> {
        base_url("vector_store", &self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
    pub caption_model: String,
    /// Model used to embed records and queries for the primary vector space.
    pub embedding_model: String,
    /// Width of `embedding_model` vectors.
    pub embedding_dim: usize,
    /// Also store token embeddings for late-interaction search.
    pub late_interaction: bool,
    pub clip_alpha: f32,
    pub align_alpha: f32,
    /// Token embedding width of the late-interaction model.
    pub colbert_dim: usize,
    pub gemma3_prompt: String,
    pub qwen2_5_prompt: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            host: "triton".to_string(),
            port: 8000,
            timeout_secs: 60,
            caption_model: "gemma3".to_string(),
            embedding_model: "clip".to_string(),
            embedding_dim: 512,
            late_interaction: false,
            clip_alpha: 0.7,
            align_alpha: 0.7,
            colbert_dim: 128,
            gemma3_prompt: DEFAULT_CAPTION_PROMPT.to_string(),
            qwen2_5_prompt: DEFAULT_CAPTION_PROMPT.to_string(),
        }
    }
}

impl InferenceConfig {
    pub fn base_url(&self) -> Result<Url> {
        base_url("inference", &self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Strategy used when a search does not name one.
    pub method: String,
    pub limit: usize,
    /// Hybrid weight of the vector list (0 = keyword only, 1 = vector only).
    pub alpha: f32,
    pub target_vector: String,
    pub late_interaction_vector: String,
    pub query_properties: Vec<String>,
    pub fusion: FusionMethod,
    /// Each sub-search fetches `limit * candidate_pool_factor` candidates.
    pub candidate_pool_factor: usize,
    pub hybrid_weight: f32,
    pub colbert_weight: f32,
    pub blend_top_k: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            method: "hybrid".to_string(),
            limit: 25,
            alpha: 0.4,
            target_vector: "clip".to_string(),
            late_interaction_vector: "colbert".to_string(),
            query_properties: vec!["caption".to_string()],
            fusion: FusionMethod::RelativeScore,
            candidate_pool_factor: 2,
            hybrid_weight: 0.7,
            colbert_weight: 0.3,
            blend_top_k: 25,
        }
    }
}

impl QueryConfig {
    pub fn pool_size(&self, limit: usize) -> usize {
        limit.saturating_mul(self.candidate_pool_factor.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Parallel query workers; 0 means one per available CPU.
    pub workers: usize,
    pub query_batch_size: usize,
    /// Metric cutoff; defaults to the query limit.
    pub k: Option<usize>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            query_batch_size: 100,
            k: None,
        }
    }
}

impl EvaluationConfig {
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub results_dir: PathBuf,
    pub image_results_file: String,
    pub query_eval_metrics_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        // A mounted volume takes precedence over the working directory.
        let results_dir = if Path::new("/app/results").is_dir() {
            PathBuf::from("/app/results")
        } else {
            PathBuf::from("results")
        };
        Self {
            results_dir,
            image_results_file: "image_search_results.csv".to_string(),
            query_eval_metrics_file: "query_eval_metrics.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub enabled: bool,
    pub bucket: String,
    pub prefix: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub secure: bool,
    pub region: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bucket: "sage_imsearch".to_string(),
            prefix: "dev-metrics".to_string(),
            endpoint: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            secure: false,
            region: "us-east-1".to_string(),
        }
    }
}

impl UploadConfig {
    /// Name of the first missing setting that blocks an upload, if any.
    pub fn missing_setting(&self) -> Option<&'static str> {
        if self.bucket.is_empty() {
            Some("S3_BUCKET")
        } else if self.endpoint.is_empty() {
            Some("S3_ENDPOINT")
        } else if self.access_key.is_empty() || self.secret_key.is_empty() {
            Some("S3_ACCESS_KEY/S3_SECRET_KEY")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load defaults, then the TOML file at `path` (if any), then the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`], reading overrides through `lookup` instead of
    /// the process environment.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    BenchError::Config(format!("cannot read config file {}: {e}", p.display()))
                })?;
                toml::from_str::<Config>(&text).map_err(|e| {
                    BenchError::Config(format!("invalid config file {}: {e}", p.display()))
                })?
            }
            None => Config::default(),
        };
        config.apply_env(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        let env = EnvOverrides { lookup };

        env.string("DATASET_NAME", &mut self.dataset.name);
        if let Some(path) = env.get("DATASET") {
            self.dataset.path = PathBuf::from(path);
        }
        env.string("DATASET_SPLIT", &mut self.dataset.split);
        env.parsed("SAMPLE_SIZE", &mut self.dataset.sample_size)?;
        env.parsed("SEED", &mut self.dataset.seed)?;

        env.parsed("VECTOR_STORE_BACKEND", &mut self.vector_store.backend)?;
        env.string("VECTOR_STORE_HOST", &mut self.vector_store.host);
        env.parsed("VECTOR_STORE_PORT", &mut self.vector_store.port)?;
        env.string("COLLECTION_NAME", &mut self.vector_store.collection);
        env.parsed("INSERT_BATCH_SIZE", &mut self.vector_store.batch_size)?;

        env.string("INFERENCE_HOST", &mut self.inference.host);
        env.parsed("INFERENCE_PORT", &mut self.inference.port)?;
        env.string("CAPTION_MODEL", &mut self.inference.caption_model);
        env.string("GEMMA3_PROMPT", &mut self.inference.gemma3_prompt);
        env.string("QWEN2_5_PROMPT", &mut self.inference.qwen2_5_prompt);
        env.string("EMBEDDING_MODEL", &mut self.inference.embedding_model);
        env.parsed("EMBEDDING_DIM", &mut self.inference.embedding_dim)?;
        env.flag("LATE_INTERACTION", &mut self.inference.late_interaction)?;

        env.string("QUERY_METHOD", &mut self.query.method);
        env.string("TARGET_VECTOR", &mut self.query.target_vector);
        env.parsed("RESPONSE_LIMIT", &mut self.query.limit)?;
        env.parsed("QUERY_ALPHA", &mut self.query.alpha)?;
        env.parsed("FUSION", &mut self.query.fusion)?;

        env.parsed("WORKERS", &mut self.evaluation.workers)?;
        env.parsed("QUERY_BATCH_SIZE", &mut self.evaluation.query_batch_size)?;

        if let Some(dir) = env.get("RESULTS_DIR") {
            self.output.results_dir = PathBuf::from(dir);
        }
        env.string("IMAGE_RESULTS_FILE", &mut self.output.image_results_file);
        env.string("QUERY_EVAL_METRICS_FILE", &mut self.output.query_eval_metrics_file);

        env.flag("UPLOAD_TO_S3", &mut self.upload.enabled)?;
        env.string("S3_BUCKET", &mut self.upload.bucket);
        env.string("S3_PREFIX", &mut self.upload.prefix);
        env.string("S3_ENDPOINT", &mut self.upload.endpoint);
        env.string("S3_ACCESS_KEY", &mut self.upload.access_key);
        env.string("S3_SECRET_KEY", &mut self.upload.secret_key);
        env.flag("S3_SECURE", &mut self.upload.secure)?;
        env.string("S3_REGION", &mut self.upload.region);

        env.string("LOG_LEVEL", &mut self.logging.level);
        env.string("LOG_FORMAT", &mut self.logging.format);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.query.limit == 0 {
            return Err(BenchError::Config("query.limit must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.query.alpha) {
            return Err(BenchError::Config(format!(
                "query.alpha must be within [0, 1], got {}",
                self.query.alpha
            )));
        }
        if self.vector_store.batch_size == 0 {
            return Err(BenchError::Config("vector_store.batch_size must be > 0".into()));
        }
        if self.evaluation.query_batch_size == 0 {
            return Err(BenchError::Config(
                "evaluation.query_batch_size must be > 0".into(),
            ));
        }
        if self.evaluation.k == Some(0) {
            return Err(BenchError::Config("evaluation.k must be > 0".into()));
        }
        if self.dataset.split.trim().is_empty() {
            return Err(BenchError::Config("dataset.split must not be empty".into()));
        }
        if self.inference.embedding_dim == 0 || self.inference.colbert_dim == 0 {
            return Err(BenchError::Config("embedding dimensions must be > 0".into()));
        }
        self.query.method.parse::<QueryMethod>()?;
        self.vector_store.base_url()?;
        self.inference.base_url()?;
        Ok(())
    }
}

fn base_url(section: &str, host: &str, port: u16) -> Result<Url> {
    let raw = if host.starts_with("http://") || host.starts_with("https://") {
        format!("{host}:{port}")
    } else {
        format!("http://{host}:{port}")
    };
    Url::parse(&raw).map_err(|e| BenchError::Config(format!("invalid {section} host '{host}': {e}")))
}

struct EnvOverrides<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvOverrides<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, slot: &mut String) {
        if let Some(v) = self.get(key) {
            *slot = v;
        }
    }

    fn parsed<T>(&self, key: &str, slot: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(v) = self.get(key) {
            *slot = v
                .trim()
                .parse()
                .map_err(|e| BenchError::Config(format!("invalid value for {key} ('{v}'): {e}")))?;
        }
        Ok(())
    }

    fn flag(&self, key: &str, slot: &mut bool) -> Result<()> {
        if let Some(v) = self.get(key) {
            *slot = match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(BenchError::Config(format!(
                        "invalid value for {key} ('{v}'): expected true or false"
                    )))
                }
            };
        }
        Ok(())
    }
}
