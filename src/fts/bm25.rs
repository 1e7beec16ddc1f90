//! In-memory BM25 inverted index.
//!
//! score(q, D) = Σ IDF(t) × tf(t,D)×(k1+1) / (tf(t,D) + k1×(1 − b + b×|D|/avgdl))
//! IDF(t) = ln((N − n(t) + 0.5) / (n(t) + 0.5) + 1)

use std::collections::HashMap;

use super::tokenizer::Tokenizer;
use crate::types::FtsFieldConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Inverted index over one text field. Documents are addressed by a dense
/// `usize` slot assigned by the caller.
pub struct Bm25Index {
    tokenizer: Tokenizer,
    params: Bm25Params,
    postings: HashMap<String, HashMap<usize, u32>>,
    doc_lengths: HashMap<usize, u32>,
    total_length: u64,
}

impl Bm25Index {
    pub fn new(config: &FtsFieldConfig) -> Self {
        Self::with_params(config, Bm25Params::default())
    }

    pub fn with_params(config: &FtsFieldConfig, params: Bm25Params) -> Self {
        Self {
            tokenizer: Tokenizer::new(config),
            params,
            postings: HashMap::new(),
            doc_lengths: HashMap::new(),
            total_length: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    /// Index `text` under `doc`, replacing any earlier text for that slot.
    pub fn insert(&mut self, doc: usize, text: &str) {
        self.remove(doc);
        let terms = self.tokenizer.tokenize(text);
        let length = terms.len() as u32;
        for term in terms {
            *self.postings.entry(term).or_default().entry(doc).or_insert(0) += 1;
        }
        self.doc_lengths.insert(doc, length);
        self.total_length += u64::from(length);
    }

    pub fn remove(&mut self, doc: usize) {
        let Some(length) = self.doc_lengths.remove(&doc) else {
            return;
        };
        self.total_length -= u64::from(length);
        self.postings.retain(|_, docs| {
            docs.remove(&doc);
            !docs.is_empty()
        });
    }

    /// Score every document matching at least one query term. Unsorted.
    pub fn search(&self, query: &str) -> Vec<(usize, f32)> {
        let n = self.doc_lengths.len();
        if n == 0 {
            return Vec::new();
        }
        let avgdl = (self.total_length as f32 / n as f32).max(f32::EPSILON);
        let Bm25Params { k1, b } = self.params;

        let mut terms = self.tokenizer.tokenize(query);
        terms.sort_unstable();
        terms.dedup();

        let mut scores: HashMap<usize, f32> = HashMap::new();
        for term in &terms {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let df = docs.len() as f32;
            let idf = ((n as f32 - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (&doc, &tf) in docs {
                let tf = tf as f32;
                let dl = self.doc_lengths.get(&doc).copied().unwrap_or(0) as f32;
                let norm = tf + k1 * (1.0 - b + b * dl / avgdl);
                *scores.entry(doc).or_insert(0.0) += idf * tf * (k1 + 1.0) / norm;
            }
        }
        scores.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(docs: &[&str]) -> Bm25Index {
        let mut idx = Bm25Index::new(&FtsFieldConfig::default());
        for (i, d) in docs.iter().enumerate() {
            idx.insert(i, d);
        }
        idx
    }

    fn ranked(idx: &Bm25Index, q: &str) -> Vec<usize> {
        let mut hits = idx.search(q);
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits.into_iter().map(|(d, _)| d).collect()
    }

    #[test]
    fn matching_documents_outrank_others() {
        let idx = index(&[
            "a heron standing in shallow water",
            "a fox crossing a snowy field",
            "two herons nesting near water",
        ]);
        let hits = ranked(&idx, "heron water");
        assert_eq!(hits.len(), 2);
        assert!(!hits.contains(&1));
    }

    #[test]
    fn rarer_terms_weigh_more() {
        let idx = index(&["owl tree", "owl rock", "owl tree moss"]);
        let hits = ranked(&idx, "owl moss");
        assert_eq!(hits[0], 2);
    }

    #[test]
    fn reinsert_replaces_text() {
        let mut idx = index(&["red fox"]);
        idx.insert(0, "grey wolf");
        assert!(idx.search("fox").is_empty());
        assert_eq!(idx.search("wolf").len(), 1);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn empty_index_returns_nothing() {
        let idx = index(&[]);
        assert!(idx.search("anything").is_empty());
    }
}
