//! imsearch-eval: hybrid image-retrieval benchmarking for vector databases
//! and embedding models.

pub mod config;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod fts;
pub mod index;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod output;
pub mod query;
pub mod store;
pub mod traits;
pub mod types;
pub mod upload;
