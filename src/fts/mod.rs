//! Full-text search: tokenization and BM25 scoring.

pub mod bm25;
pub mod tokenizer;

pub use bm25::{Bm25Index, Bm25Params};
pub use tokenizer::Tokenizer;
