//! JSON Lines dataset loader.
//!
//! Reads `{dir}/{split}.jsonl` when `path` is a directory. When `path` is a
//! file, every row is read and rows carrying a `split` column are filtered
//! to the requested split.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::config::{ColumnConfig, DatasetConfig};
use crate::error::{BenchError, Result};
use crate::traits::DatasetLoader;
use crate::types::{AttributeValue, ImageTensor};

use super::{Dataset, LoadOptions, Row};

const SPLIT_COLUMN: &str = "split";
const IMAGE_KEY: &str = "image";
const QUERY_IMAGE_KEY: &str = "query_image";

pub struct JsonlDatasetLoader {
    name: String,
    path: PathBuf,
    columns: ColumnConfig,
}

impl JsonlDatasetLoader {
    pub fn new(name: &str, path: impl Into<PathBuf>, columns: ColumnConfig) -> Self {
        Self {
            name: name.to_string(),
            path: path.into(),
            columns,
        }
    }

    pub fn from_config(config: &DatasetConfig) -> Self {
        Self::new(&config.name, config.path.clone(), config.columns.clone())
    }

    fn split_source(&self, split: &str) -> (PathBuf, bool) {
        if self.path.is_dir() {
            (self.path.join(format!("{split}.jsonl")), false)
        } else {
            (self.path.clone(), true)
        }
    }
}

#[async_trait]
impl DatasetLoader for JsonlDatasetLoader {
    #[instrument(skip(self, options), fields(dataset = %self.name))]
    async fn load(&self, split: &str, options: &LoadOptions) -> Result<Dataset> {
        let (file, filter_split) = self.split_source(split);
        let text = tokio::fs::read_to_string(&file).await.map_err(|e| {
            BenchError::Dataset(format!("cannot read {}: {e}", file.display()))
        })?;

        let mut rows = parse_rows(&file, &text)?;
        if filter_split {
            rows.retain(|row| match row.get(SPLIT_COLUMN) {
                Some(value) => value.as_key() == split,
                None => true,
            });
        }

        let dataset = Dataset::new(rows).sample(options);
        info!(
            file = %file.display(),
            split,
            rows = dataset.len(),
            "loaded dataset"
        );
        Ok(dataset)
    }

    fn query_column(&self) -> &str {
        &self.columns.query
    }

    fn query_id_column(&self) -> &str {
        &self.columns.query_id
    }

    fn relevance_column(&self) -> &str {
        &self.columns.relevance
    }

    fn candidate_id_column(&self) -> &str {
        &self.columns.candidate_id
    }

    fn metadata_columns(&self) -> &[String] {
        &self.columns.metadata
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn parse_rows(file: &Path, text: &str) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|e| {
            BenchError::Dataset(format!("{}:{}: invalid JSON: {e}", file.display(), lineno + 1))
        })?;
        let Value::Object(object) = value else {
            return Err(BenchError::Dataset(format!(
                "{}:{}: expected a JSON object per line",
                file.display(),
                lineno + 1
            )));
        };
        rows.push(parse_row(file, lineno + 1, object)?);
    }
    Ok(rows)
}

fn parse_row(file: &Path, lineno: usize, object: serde_json::Map<String, Value>) -> Result<Row> {
    let mut values = BTreeMap::new();
    let mut image = None;
    let mut query_image = None;

    for (key, value) in object {
        match key.as_str() {
            IMAGE_KEY | QUERY_IMAGE_KEY if !value.is_null() => {
                let tensor: ImageTensor = serde_json::from_value(value).map_err(|e| {
                    BenchError::Dataset(format!(
                        "{}:{lineno}: invalid image tensor in '{key}': {e}",
                        file.display()
                    ))
                })?;
                if key == IMAGE_KEY {
                    image = Some(tensor);
                } else {
                    query_image = Some(tensor);
                }
            }
            _ => match serde_json::from_value::<AttributeValue>(value) {
                Ok(v) => {
                    values.insert(key, v);
                }
                // Nulls and nested objects carry nothing the benchmark reads.
                Err(_) => debug!(column = %key, lineno, "skipping non-scalar column"),
            },
        }
    }

    Ok(Row {
        values,
        image,
        query_image,
    })
}
