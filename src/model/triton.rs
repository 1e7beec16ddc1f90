//! Triton Inference Server provider over the KServe v2 HTTP/REST protocol.
//!
//! Model I/O contract:
//! - `clip`, `align`: inputs `text` (BYTES `[1]`) and `image` (FP32
//!   `[h, w, 3]`); outputs `text_embedding` and `image_embedding`. Text-only
//!   requests send a `[1, 1, 3]` zero image.
//! - `colbert`: input `text`; outputs `embedding` (flattened, padded to the
//!   longest sequence) and `token_lengths`.
//! - `gemma3`, `qwen2_5`: inputs `image` and `prompt` (BYTES); output
//!   `caption`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::config::InferenceConfig;
use crate::error::{BenchError, Result};
use crate::metrics;
use crate::traits::ModelProvider;
use crate::types::{Embedding, ImageTensor};

use super::fusion::fuse_embeddings;
use super::{CaptionModel, EmbeddingModel};

const MALFORMED_IMAGE: &str = "image tensor shape does not match its data";

#[derive(Debug, Serialize)]
struct InferInput {
    name: &'static str,
    shape: Vec<usize>,
    datatype: &'static str,
    data: Value,
}

impl InferInput {
    fn text(name: &'static str, text: &str) -> Self {
        Self {
            name,
            shape: vec![1],
            datatype: "BYTES",
            data: Value::from(vec![text]),
        }
    }

    fn image(image: Option<&ImageTensor>) -> Self {
        let (shape, data) = match image {
            Some(img) => (img.shape().to_vec(), img.data.clone()),
            None => (vec![1, 1, ImageTensor::CHANNELS], vec![0.0; ImageTensor::CHANNELS]),
        };
        Self {
            name: "image",
            shape,
            datatype: "FP32",
            data: Value::from(data),
        }
    }
}

#[derive(Debug, Serialize)]
struct RequestedOutput {
    name: &'static str,
}

#[derive(Debug, Serialize)]
struct InferRequest {
    inputs: Vec<InferInput>,
    outputs: Vec<RequestedOutput>,
}

#[derive(Debug, Deserialize)]
struct OutputTensor {
    name: String,
    #[serde(default)]
    shape: Vec<i64>,
    #[serde(default)]
    data: Vec<Value>,
}

impl OutputTensor {
    fn floats(&self) -> Option<Vec<f32>> {
        self.data.iter().map(|v| v.as_f64().map(|x| x as f32)).collect()
    }

    fn first_int(&self) -> Option<usize> {
        self.data.first()?.as_u64().map(|n| n as usize)
    }

    fn first_string(&self) -> Option<&str> {
        self.data.first()?.as_str()
    }
}

#[derive(Debug, Deserialize)]
struct InferResponse {
    #[serde(default)]
    outputs: Vec<OutputTensor>,
}

impl InferResponse {
    fn output(&self, model: &str, name: &str) -> Result<&OutputTensor> {
        self.outputs
            .iter()
            .find(|o| o.name == name)
            .ok_or_else(|| BenchError::inference(model, format!("response lacks output '{name}'")))
    }
}

pub struct TritonProvider {
    base_url: String,
    http: reqwest::Client,
    config: InferenceConfig,
}

impl TritonProvider {
    /// Build a provider without contacting the server.
    pub fn new(config: InferenceConfig) -> Result<Self> {
        let base_url = config.base_url()?;
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(64)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            http,
            config,
        })
    }

    /// Build a provider and check that the server reports ready.
    #[instrument(skip(config), fields(host = %config.host, port = config.port))]
    pub async fn connect(config: InferenceConfig) -> Result<Self> {
        let provider = Self::new(config)?;
        let resp = provider
            .http
            .get(format!("{}/v2/health/ready", provider.base_url))
            .send()
            .await
            .map_err(|e| BenchError::connection("triton", e))?;
        if !resp.status().is_success() {
            return Err(BenchError::connection(
                "triton",
                format!("server not ready ({})", resp.status()),
            ));
        }
        info!(url = %provider.base_url, "connected to triton");
        Ok(provider)
    }

    async fn infer(
        &self,
        model: &str,
        kind: &'static str,
        request: &InferRequest,
    ) -> Result<InferResponse> {
        let result = self.send(model, kind, request).await;
        metrics::INFERENCE_CALLS_TOTAL
            .with_label_values(&[model, metrics::status(result.is_ok())])
            .inc();
        result
    }

    async fn send(
        &self,
        model: &str,
        kind: &'static str,
        request: &InferRequest,
    ) -> Result<InferResponse> {
        let resp = self
            .http
            .post(format!("{}/v2/models/{}/infer", self.base_url, model))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    BenchError::connection("triton", e)
                } else {
                    BenchError::inference(model, e)
                }
            })?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(BenchError::UnknownModel {
                kind,
                model: model.to_string(),
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BenchError::inference(model, format!("{status}: {text}")));
        }
        resp.json::<InferResponse>()
            .await
            .map_err(|e| BenchError::inference(model, format!("malformed response: {e}")))
    }

    async fn dense_embedding(
        &self,
        model: EmbeddingModel,
        text: &str,
        image: Option<&ImageTensor>,
        alpha: f32,
    ) -> Result<Embedding> {
        let name = model.as_str();
        let request = InferRequest {
            inputs: vec![InferInput::text("text", text), InferInput::image(image)],
            outputs: vec![
                RequestedOutput {
                    name: "text_embedding",
                },
                RequestedOutput {
                    name: "image_embedding",
                },
            ],
        };
        let resp = self.infer(name, "embedding", &request).await?;
        let text_emb = floats(&resp, name, "text_embedding")?;

        let values = match image {
            Some(_) => {
                let image_emb = floats(&resp, name, "image_embedding")?;
                fuse_embeddings(&image_emb, &text_emb, alpha)
                    .map_err(|e| BenchError::inference(name, e))?
            }
            None => text_emb,
        };
        Ok(Embedding::single(name, values))
    }

    async fn colbert_embedding(&self, text: &str) -> Result<Embedding> {
        let name = EmbeddingModel::Colbert.as_str();
        let request = InferRequest {
            inputs: vec![InferInput::text("text", text)],
            outputs: vec![
                RequestedOutput { name: "embedding" },
                RequestedOutput {
                    name: "token_lengths",
                },
            ],
        };
        let resp = self.infer(name, "embedding", &request).await?;
        let flat = floats(&resp, name, "embedding")?;
        let tokens = resp
            .output(name, "token_lengths")?
            .first_int()
            .ok_or_else(|| BenchError::inference(name, "token_lengths is empty"))?;

        let tokens = unpad_tokens(&flat, self.config.colbert_dim, tokens)
            .map_err(|reason| BenchError::inference(name, reason))?;
        Ok(Embedding::multi(name, tokens))
    }
}

fn floats(resp: &InferResponse, model: &str, output: &str) -> Result<Vec<f32>> {
    let tensor = resp.output(model, output)?;
    let values = tensor
        .floats()
        .ok_or_else(|| BenchError::inference(model, format!("output '{output}' is not numeric")))?;
    if values.is_empty() {
        return Err(BenchError::inference(model, format!("output '{output}' is empty")));
    }
    debug!(output, shape = ?tensor.shape, "decoded output");
    Ok(values)
}

/// Split a padded `[max_len * dim]` buffer into the first `count` token
/// vectors.
fn unpad_tokens(
    flat: &[f32],
    dim: usize,
    count: usize,
) -> std::result::Result<Vec<Vec<f32>>, String> {
    if dim == 0 || flat.len() % dim != 0 {
        return Err(format!(
            "embedding of {} values is not a multiple of {dim}",
            flat.len()
        ));
    }
    let rows = flat.len() / dim;
    if count == 0 || count > rows {
        return Err(format!("token length {count} outside 1..={rows}"));
    }
    Ok(flat.chunks_exact(dim).take(count).map(<[f32]>::to_vec).collect())
}

#[async_trait]
impl ModelProvider for TritonProvider {
    #[instrument(skip(self, text, image), fields(has_image = image.is_some()))]
    async fn get_embedding(
        &self,
        text: &str,
        image: Option<&ImageTensor>,
        model_name: &str,
    ) -> Result<Embedding> {
        let model: EmbeddingModel = model_name.parse()?;
        if let Some(img) = image {
            if !img.is_well_formed() {
                return Err(BenchError::inference(model_name, MALFORMED_IMAGE));
            }
        }
        match model {
            EmbeddingModel::Clip => {
                self.dense_embedding(model, text, image, self.config.clip_alpha)
                    .await
            }
            EmbeddingModel::Align => {
                self.dense_embedding(model, text, image, self.config.align_alpha)
                    .await
            }
            EmbeddingModel::Colbert => {
                if image.is_some() {
                    debug!("colbert ignores the image input");
                }
                self.colbert_embedding(text).await
            }
        }
    }

    #[instrument(skip(self, image))]
    async fn generate_caption(&self, image: &ImageTensor, model_name: &str) -> Result<String> {
        let model: CaptionModel = model_name.parse()?;
        if !image.is_well_formed() {
            return Err(BenchError::inference(model_name, MALFORMED_IMAGE));
        }
        let request = InferRequest {
            inputs: vec![
                InferInput::image(Some(image)),
                InferInput::text("prompt", model.prompt(&self.config)),
            ],
            outputs: vec![RequestedOutput { name: "caption" }],
        };
        let resp = self.infer(model.as_str(), "caption", &request).await?;
        let caption = resp
            .output(model.as_str(), "caption")?
            .first_string()
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(caption)
    }

    fn name(&self) -> &str {
        "triton"
    }
}
