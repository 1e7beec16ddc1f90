use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Identifier of a candidate object inside a collection.
pub type CandidateId = String;

/// Identifier of a benchmark query.
pub type QueryId = String;

/// Distance metric for a vector space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    DotProduct,
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistanceMetric::Cosine => write!(f, "cosine"),
            DistanceMetric::Euclidean => write!(f, "euclidean"),
            DistanceMetric::DotProduct => write!(f, "dot_product"),
        }
    }
}

/// Scalar values carried by dataset rows, records, and result metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    StringList(Vec<String>),
}

impl AttributeValue {
    /// Render the value as a join key. Integral floats render without a
    /// fraction so `7` and `7.0` produce the same key.
    pub fn as_key(&self) -> String {
        match self {
            AttributeValue::String(s) => s.clone(),
            AttributeValue::Integer(i) => i.to_string(),
            AttributeValue::Float(f) if f.fract() == 0.0 && f.is_finite() => {
                format!("{}", *f as i64)
            }
            AttributeValue::Float(f) => f.to_string(),
            AttributeValue::Bool(b) => b.to_string(),
            AttributeValue::StringList(items) => items.join(","),
        }
    }

    /// Interpret the value as a graded relevance label. Negative, non-numeric
    /// and unparseable values grade as 0.
    pub fn as_grade(&self) -> u32 {
        match self {
            AttributeValue::Integer(i) => (*i).max(0) as u32,
            AttributeValue::Float(f) if f.is_finite() && *f > 0.0 => f.round() as u32,
            AttributeValue::Bool(true) => 1,
            AttributeValue::String(s) => match s.trim() {
                "true" | "True" => 1,
                other => other.parse::<f64>().map(|f| f.max(0.0).round() as u32).unwrap_or(0),
            },
            _ => 0,
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_key())
    }
}

/// An RGB image as a row-major `height x width x 3` float tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTensor {
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl ImageTensor {
    pub const CHANNELS: usize = 3;

    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, Self::CHANNELS]
    }

    pub fn is_well_formed(&self) -> bool {
        self.height > 0
            && self.width > 0
            && self.data.len() == self.height * self.width * Self::CHANNELS
    }
}

/// Vector payload of an embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingData {
    /// One pooled vector.
    Single(Vec<f32>),
    /// One vector per token (late interaction).
    Multi(Vec<Vec<f32>>),
}

/// An embedding tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub model: String,
    pub data: EmbeddingData,
}

impl Embedding {
    pub fn single(model: &str, values: Vec<f32>) -> Self {
        Self {
            model: model.to_string(),
            data: EmbeddingData::Single(values),
        }
    }

    pub fn multi(model: &str, tokens: Vec<Vec<f32>>) -> Self {
        Self {
            model: model.to_string(),
            data: EmbeddingData::Multi(tokens),
        }
    }

    /// Per-vector dimensionality (token dimensionality for multi-vectors).
    pub fn dimension(&self) -> usize {
        match &self.data {
            EmbeddingData::Single(v) => v.len(),
            EmbeddingData::Multi(tokens) => tokens.first().map(Vec::len).unwrap_or(0),
        }
    }

    pub fn as_single(&self) -> Option<&[f32]> {
        match &self.data {
            EmbeddingData::Single(v) => Some(v),
            EmbeddingData::Multi(_) => None,
        }
    }

    pub fn as_multi(&self) -> Option<&[Vec<f32>]> {
        match &self.data {
            EmbeddingData::Multi(tokens) => Some(tokens),
            EmbeddingData::Single(_) => None,
        }
    }

    /// Mean-pool a multi-vector into one vector; single vectors are returned as-is.
    pub fn pooled(&self) -> Vec<f32> {
        match &self.data {
            EmbeddingData::Single(v) => v.clone(),
            EmbeddingData::Multi(tokens) => {
                crate::index::mean_pool(tokens).unwrap_or_else(|| vec![0.0; self.dimension()])
            }
        }
    }

    pub fn is_finite(&self) -> bool {
        match &self.data {
            EmbeddingData::Single(v) => v.iter().all(|x| x.is_finite()),
            EmbeddingData::Multi(tokens) => tokens.iter().flatten().all(|x| x.is_finite()),
        }
    }
}

/// A benchmark query. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryItem {
    pub id: QueryId,
    pub text: String,
    pub image: Option<ImageTensor>,
    pub metadata: BTreeMap<String, String>,
}

/// Graded relevance labels keyed by (query id, candidate id).
#[derive(Debug, Clone, Default)]
pub struct RelevanceJudgments {
    grades: HashMap<QueryId, HashMap<CandidateId, u32>>,
}

impl RelevanceJudgments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a label. Duplicate pairs keep the highest grade.
    pub fn insert(&mut self, query_id: &str, candidate_id: &str, grade: u32) {
        let slot = self
            .grades
            .entry(query_id.to_string())
            .or_default()
            .entry(candidate_id.to_string())
            .or_insert(0);
        *slot = (*slot).max(grade);
    }

    /// Grade of a candidate for a query; unknown pairs are irrelevant.
    pub fn grade(&self, query_id: &str, candidate_id: &str) -> u32 {
        self.grades
            .get(query_id)
            .and_then(|m| m.get(candidate_id))
            .copied()
            .unwrap_or(0)
    }

    /// Whether the dataset carries any label, relevant or not, for the pair.
    pub fn is_judged(&self, query_id: &str, candidate_id: &str) -> bool {
        self.grades
            .get(query_id)
            .is_some_and(|m| m.contains_key(candidate_id))
    }

    /// Number of candidates judged relevant (grade > 0) for a query.
    pub fn relevant_count(&self, query_id: &str) -> usize {
        self.grades
            .get(query_id)
            .map(|m| m.values().filter(|g| **g > 0).count())
            .unwrap_or(0)
    }

    /// Grades of a query's judged candidates, best first.
    pub fn ideal_grades(&self, query_id: &str) -> Vec<u32> {
        let mut grades: Vec<u32> = self
            .grades
            .get(query_id)
            .map(|m| m.values().copied().filter(|g| *g > 0).collect())
            .unwrap_or_default();
        grades.sort_unstable_by(|a, b| b.cmp(a));
        grades
    }

    pub fn query_count(&self) -> usize {
        self.grades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grades.is_empty()
    }
}

/// One ranked candidate returned by a vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub score: f32,
    #[serde(default)]
    pub attributes: HashMap<String, AttributeValue>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
            attributes: HashMap::new(),
        }
    }
}

/// Ranked result list for one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub candidates: Vec<Candidate>,
}

impl QueryResult {
    /// Build a result that satisfies the ranking invariant: finite scores,
    /// sorted by descending score (ties by ascending id), at most `limit`.
    pub fn ranked(candidates: Vec<Candidate>, limit: usize) -> Self {
        let before = candidates.len();
        let mut candidates: Vec<Candidate> =
            candidates.into_iter().filter(|c| c.score.is_finite()).collect();
        if candidates.len() != before {
            tracing::warn!(
                dropped = before - candidates.len(),
                "dropped candidates with non-finite scores"
            );
        }
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(limit);
        Self { candidates }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().map(|c| c.id.as_str())
    }
}

/// Scalar property type of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Text,
    TextList,
    Number,
    Int,
    Bool,
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub name: String,
    pub data_type: DataType,
}

impl PropertySchema {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
        }
    }
}

/// Whether a vector space stores one vector or one vector per token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorKind {
    #[default]
    Single,
    Multi,
}

/// A named vector space inside a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSpace {
    pub name: String,
    pub dimensions: usize,
    #[serde(default)]
    pub kind: VectorKind,
    #[serde(default)]
    pub distance: DistanceMetric,
}

impl VectorSpace {
    pub fn single(name: &str, dimensions: usize) -> Self {
        Self {
            name: name.to_string(),
            dimensions,
            kind: VectorKind::Single,
            distance: DistanceMetric::Cosine,
        }
    }

    pub fn multi(name: &str, dimensions: usize) -> Self {
        Self {
            name: name.to_string(),
            dimensions,
            kind: VectorKind::Multi,
            distance: DistanceMetric::DotProduct,
        }
    }
}

/// Full-text indexing options for one text field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtsFieldConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_true")]
    pub stemming: bool,
    #[serde(default = "default_true")]
    pub remove_stopwords: bool,
}

fn default_language() -> String {
    "english".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for FtsFieldConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            stemming: true,
            remove_stopwords: true,
        }
    }
}

/// Schema of a collection: scalar properties, named vector spaces, and
/// full-text indexed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: Vec<PropertySchema>,
    pub vector_spaces: Vec<VectorSpace>,
    #[serde(default)]
    pub text_fields: BTreeMap<String, FtsFieldConfig>,
}

impl CollectionSchema {
    pub fn vector_space(&self, name: &str) -> Option<&VectorSpace> {
        self.vector_spaces.iter().find(|s| s.name == name)
    }
}

/// An object submitted for insertion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub id: Option<CandidateId>,
    pub properties: HashMap<String, AttributeValue>,
    pub vectors: HashMap<String, Embedding>,
}

/// A record that could not be inserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRecord {
    /// Position of the record in the submitted batch.
    pub index: usize,
    pub id: Option<CandidateId>,
    pub reason: String,
}

/// Outcome of a batch insert. Every submitted record appears exactly once,
/// either in `inserted` or in `failed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InsertReport {
    pub inserted: Vec<CandidateId>,
    pub failed: Vec<FailedRecord>,
}

impl InsertReport {
    pub fn submitted(&self) -> usize {
        self.inserted.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Append another report whose indices start at `offset`.
    pub fn extend(&mut self, other: InsertReport, offset: usize) {
        self.inserted.extend(other.inserted);
        self.failed
            .extend(other.failed.into_iter().map(|mut f| {
                f.index += offset;
                f
            }));
    }
}
