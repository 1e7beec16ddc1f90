//! Embedding and captioning models.
//!
//! The model names are a closed set: `clip`, `colbert`, `align` for
//! embeddings and `gemma3`, `qwen2_5` for captions. Batch helpers isolate
//! failures per item so one bad image never aborts a load.

pub mod fusion;
pub mod triton;

use std::fmt;
use std::str::FromStr;

use futures::stream::{self, StreamExt};
use tracing::warn;

use crate::config::InferenceConfig;
use crate::error::{BenchError, Result};
use crate::traits::ModelProvider;
use crate::types::{Embedding, ImageTensor};

pub use fusion::fuse_embeddings;
pub use triton::TritonProvider;

/// Default caption instruction. Each captioner carries its own copy in
/// [`InferenceConfig`] so they can be tuned independently.
pub const DEFAULT_CAPTION_PROMPT: &str = "\
role:
You are a world-class Scientific Image Captioning Expert.

context:
You will be shown a scientific image captured by edge devices. Your goal is to analyze its content and significance in detail.

task:
Generate exactly one scientifically detailed caption that accurately describes what is visible in the image and its scientific relevance.
Make it as detailed as possible. Also extract text and numbers from the images.

constraints:
- Only return:
  1. A single caption.
  2. a list of 15 keywords relevant to the image.
- Do not include any additional text, explanations, or formatting.

format:
  caption: <your_scientific_caption_here>
  keywords: <keyword1>, <keyword2>, ...
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingModel {
    /// Dense text/image embedding.
    Clip,
    /// Token-level text embeddings for late interaction.
    Colbert,
    /// Alternative dense text/image embedding.
    Align,
}

impl EmbeddingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingModel::Clip => "clip",
            EmbeddingModel::Colbert => "colbert",
            EmbeddingModel::Align => "align",
        }
    }

    pub fn accepts_image(&self) -> bool {
        !matches!(self, EmbeddingModel::Colbert)
    }
}

impl fmt::Display for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingModel {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "clip" => Ok(EmbeddingModel::Clip),
            "colbert" => Ok(EmbeddingModel::Colbert),
            "align" => Ok(EmbeddingModel::Align),
            other => Err(BenchError::UnknownModel {
                kind: "embedding",
                model: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptionModel {
    Gemma3,
    Qwen25,
}

impl CaptionModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptionModel::Gemma3 => "gemma3",
            CaptionModel::Qwen25 => "qwen2_5",
        }
    }

    /// The instruction configured for this captioner.
    pub fn prompt<'a>(&self, config: &'a InferenceConfig) -> &'a str {
        match self {
            CaptionModel::Gemma3 => &config.gemma3_prompt,
            CaptionModel::Qwen25 => &config.qwen2_5_prompt,
        }
    }
}

impl fmt::Display for CaptionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptionModel {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gemma3" => Ok(CaptionModel::Gemma3),
            "qwen2_5" => Ok(CaptionModel::Qwen25),
            other => Err(BenchError::UnknownModel {
                kind: "caption",
                model: other.to_string(),
            }),
        }
    }
}

/// Outcome of one item of a batch inference call.
#[derive(Debug, Clone, PartialEq)]
pub enum Inferred<T> {
    Ready(T),
    Missing { reason: String },
}

impl<T> Inferred<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Inferred::Ready(_))
    }

    fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(v) => Inferred::Ready(v),
            Err(e) => Inferred::Missing {
                reason: e.to_string(),
            },
        }
    }
}

/// Embed `(text, image)` pairs with at most `concurrency` requests in
/// flight. Output order matches input order.
pub async fn embed_batch(
    provider: &dyn ModelProvider,
    items: &[(&str, Option<&ImageTensor>)],
    model_name: &str,
    concurrency: usize,
) -> Vec<Inferred<Embedding>> {
    stream::iter(0..items.len())
        .map(|i| {
            let (text, image) = items[i];
            async move {
                let result = provider.get_embedding(text, image, model_name).await;
                if let Err(e) = &result {
                    warn!(item = i, model = model_name, error = %e, "embedding failed");
                }
                Inferred::from_result(result)
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// Caption images with at most `concurrency` requests in flight. Output
/// order matches input order.
pub async fn caption_batch(
    provider: &dyn ModelProvider,
    images: &[&ImageTensor],
    model_name: &str,
    concurrency: usize,
) -> Vec<Inferred<String>> {
    stream::iter(0..images.len())
        .map(|i| {
            let image = images[i];
            async move {
                let result = provider.generate_caption(image, model_name).await;
                if let Err(e) = &result {
                    warn!(item = i, model = model_name, error = %e, "caption failed");
                }
                Inferred::from_result(result)
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}
