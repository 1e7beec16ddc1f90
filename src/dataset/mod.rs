//! Tabular benchmark datasets.
//!
//! A dataset is a list of rows; each row is one (query, candidate) pair with
//! its relevance label and metadata, the shape of INQUIRE-style benchmarks.
//! Queries and relevance judgments are both derived from the rows.

pub mod jsonl;

use std::collections::{BTreeMap, HashSet};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::types::{AttributeValue, ImageTensor, QueryItem, RelevanceJudgments};

pub use jsonl::JsonlDatasetLoader;

/// Sampling parameters for [`crate::traits::DatasetLoader::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Rows to keep; 0 keeps all rows.
    pub sample_size: usize,
    pub seed: u64,
}

/// Column names resolved from a loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetColumns {
    pub query: String,
    pub query_id: String,
    pub relevance: String,
    pub candidate_id: String,
    pub metadata: Vec<String>,
}

/// One dataset row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub values: BTreeMap<String, AttributeValue>,
    /// Image of the candidate this row describes.
    pub image: Option<ImageTensor>,
    /// Image attached to the query itself, if the benchmark has one.
    pub query_image: Option<ImageTensor>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&AttributeValue> {
        self.values.get(column)
    }

    /// The column rendered as a string key, if present and non-empty.
    pub fn key(&self, column: &str) -> Option<String> {
        self.values
            .get(column)
            .map(AttributeValue::as_key)
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub rows: Vec<Row>,
}

impl Dataset {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Deterministically subsample rows. The same `sample_size` and `seed`
    /// over the same rows always select the same rows, kept in their
    /// original order.
    pub fn sample(self, options: &LoadOptions) -> Self {
        let total = self.rows.len();
        if options.sample_size == 0 || options.sample_size >= total {
            return self;
        }

        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut picked = rand::seq::index::sample(&mut rng, total, options.sample_size).into_vec();
        picked.sort_unstable();

        let mut slots: Vec<Option<Row>> = self.rows.into_iter().map(Some).collect();
        let rows = picked
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect::<Vec<_>>();

        debug!(total, sampled = rows.len(), seed = options.seed, "sampled dataset rows");
        Self { rows }
    }

    /// Unique queries in row order; the first row of each query id wins.
    pub fn queries(&self, columns: &DatasetColumns) -> Vec<QueryItem> {
        let mut seen = HashSet::new();
        let mut queries = Vec::new();
        let mut skipped = 0usize;

        for row in &self.rows {
            let (Some(id), Some(text)) = (row.key(&columns.query_id), row.key(&columns.query))
            else {
                skipped += 1;
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }
            let metadata = columns
                .metadata
                .iter()
                .filter_map(|c| row.get(c).map(|v| (c.clone(), v.as_key())))
                .collect();
            queries.push(QueryItem {
                id,
                text,
                image: row.query_image.clone(),
                metadata,
            });
        }

        if skipped > 0 {
            warn!(skipped, "rows without query id or text were ignored");
        }
        queries
    }

    /// Relevance judgments keyed by (query id, candidate id).
    pub fn judgments(&self, columns: &DatasetColumns) -> RelevanceJudgments {
        let mut judgments = RelevanceJudgments::new();
        for row in &self.rows {
            let (Some(query_id), Some(candidate_id)) =
                (row.key(&columns.query_id), row.key(&columns.candidate_id))
            else {
                continue;
            };
            let grade = row.get(&columns.relevance).map(AttributeValue::as_grade).unwrap_or(0);
            judgments.insert(&query_id, &candidate_id, grade);
        }
        judgments
    }
}
