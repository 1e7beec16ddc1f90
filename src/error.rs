use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    // Connection errors
    #[error("connection error ({component}): {message}")]
    Connection { component: String, message: String },

    // Query routing errors
    #[error("unsupported query method '{method}' (expected one of: {expected})")]
    UnsupportedStrategy { method: String, expected: String },

    // Model errors
    #[error("unknown {kind} model '{model}'")]
    UnknownModel { kind: &'static str, model: String },

    #[error("inference error ({model}): {message}")]
    Inference { model: String, message: String },

    // Per-item errors
    #[error("item '{item}' failed: {reason}")]
    Item { item: String, reason: String },

    // Dataset errors
    #[error("dataset '{dataset}' (split '{split}') contains no queries")]
    EmptyDataset { dataset: String, split: String },

    #[error("dataset error: {0}")]
    Dataset(String),

    // Collection errors
    #[error("collection not found: {collection}")]
    CollectionNotFound { collection: String },

    #[error("vector space '{space}' not defined in collection '{collection}'")]
    UnknownVectorSpace { collection: String, space: String },

    // Validation errors
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("validation error: {0}")]
    Validation(String),

    // Remote vector store errors
    #[error("vector store error ({status}): {message}")]
    Remote { status: u16, message: String },

    // Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] object_store::Error),

    // HTTP errors
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    // IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // Internal
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BenchError>;

/// Error taxonomy used to decide whether a failure aborts a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connection,
    UnsupportedStrategy,
    PerItem,
    EmptyDataset,
    Other,
}

impl BenchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BenchError::Config(_) => ErrorKind::Configuration,

            BenchError::Connection { .. } => ErrorKind::Connection,

            BenchError::UnsupportedStrategy { .. } => ErrorKind::UnsupportedStrategy,

            BenchError::UnknownModel { .. }
            | BenchError::Inference { .. }
            | BenchError::Item { .. } => ErrorKind::PerItem,

            BenchError::EmptyDataset { .. } => ErrorKind::EmptyDataset,

            _ => ErrorKind::Other,
        }
    }

    /// Process exit code for an error that reached the top level.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Configuration => 2,
            ErrorKind::Connection => 3,
            ErrorKind::UnsupportedStrategy => 4,
            ErrorKind::EmptyDataset => 5,
            ErrorKind::PerItem | ErrorKind::Other => 1,
        }
    }

    pub fn connection(component: &str, message: impl std::fmt::Display) -> Self {
        BenchError::Connection {
            component: component.to_string(),
            message: message.to_string(),
        }
    }

    pub fn inference(model: &str, message: impl std::fmt::Display) -> Self {
        BenchError::Inference {
            model: model.to_string(),
            message: message.to_string(),
        }
    }
}
