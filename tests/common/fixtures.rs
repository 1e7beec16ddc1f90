use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use imsearch_eval::dataset::{Dataset, Row};
use imsearch_eval::types::{
    AttributeValue, CollectionSchema, Embedding, FtsFieldConfig, ImageTensor, PropertySchema,
    DataType, Record, VectorSpace,
};

/// One labeled (query, candidate) row using the [`super::stubs::StaticLoader`]
/// column names.
pub fn row(query_id: &str, query: &str, image_id: &str, relevant: i64) -> Row {
    let mut values = BTreeMap::new();
    values.insert("query_id".to_string(), AttributeValue::String(query_id.to_string()));
    values.insert("query".to_string(), AttributeValue::String(query.to_string()));
    values.insert("image_id".to_string(), AttributeValue::String(image_id.to_string()));
    values.insert("relevant".to_string(), AttributeValue::Integer(relevant));
    values.insert(
        "category".to_string(),
        AttributeValue::String(format!("cat-{query_id}")),
    );
    Row {
        values,
        image: None,
        query_image: None,
    }
}

pub fn with_image(mut row: Row, image: ImageTensor) -> Row {
    row.image = Some(image);
    row
}

/// `queries` queries with `per_query` candidates each; only the first
/// candidate of each query (`{qid}-img-0`) is relevant.
pub fn benchmark_dataset(queries: usize, per_query: usize) -> Dataset {
    let mut rows = Vec::new();
    for q in 0..queries {
        let qid = format!("q{q}");
        for c in 0..per_query {
            let relevant = i64::from(c == 0);
            rows.push(row(&qid, &query_text(&qid), &candidate_id(&qid, c), relevant));
        }
    }
    Dataset::new(rows)
}

pub fn query_text(qid: &str) -> String {
    format!("text of {qid}")
}

pub fn candidate_id(qid: &str, c: usize) -> String {
    format!("{qid}-img-{c}")
}

/// Write JSON objects as `{dir}/{split}.jsonl`.
pub fn write_jsonl(dir: &Path, split: &str, rows: &[serde_json::Value]) -> PathBuf {
    let path = dir.join(format!("{split}.jsonl"));
    let text: Vec<String> = rows.iter().map(|r| r.to_string()).collect();
    std::fs::write(&path, text.join("\n")).expect("failed to write dataset file");
    path
}

/// Schema with a `clip` single space of `dim`, an optional `colbert` multi
/// space, and a full-text indexed `caption`.
pub fn schema(name: &str, dim: usize, late_interaction: bool) -> CollectionSchema {
    let mut vector_spaces = vec![VectorSpace::single("clip", dim)];
    if late_interaction {
        vector_spaces.push(VectorSpace::multi("colbert", dim));
    }
    CollectionSchema {
        name: name.to_string(),
        description: String::new(),
        properties: vec![PropertySchema::new("caption", DataType::Text)],
        vector_spaces,
        text_fields: [("caption".to_string(), FtsFieldConfig::default())]
            .into_iter()
            .collect(),
    }
}

/// Record carrying `caption` as property and `vectors` as embeddings.
pub fn record(id: &str, caption: &str, vectors: Vec<Embedding>) -> Record {
    let mut properties = HashMap::new();
    properties.insert(
        "caption".to_string(),
        AttributeValue::String(caption.to_string()),
    );
    Record {
        id: Some(id.to_string()),
        properties,
        vectors: vectors.into_iter().map(|e| (e.model.clone(), e)).collect(),
    }
}
