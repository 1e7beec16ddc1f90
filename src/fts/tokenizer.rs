use rust_stemmers::{Algorithm, Stemmer};
use unicode_segmentation::UnicodeSegmentation;

use crate::types::FtsFieldConfig;

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "it", "its",
    "of", "on", "or", "that", "the", "to", "was", "were", "will", "with", "this", "but", "they",
    "have", "had", "what", "when", "where", "who", "which", "there", "their", "been", "not", "no",
];

/// Splits text into normalized terms for BM25 indexing and querying.
///
/// Index and query text must go through the same tokenizer configuration.
pub struct Tokenizer {
    stemmer: Option<Stemmer>,
    remove_stopwords: bool,
}

impl Tokenizer {
    pub fn new(config: &FtsFieldConfig) -> Self {
        let stemmer = config
            .stemming
            .then(|| language_algorithm(&config.language))
            .flatten()
            .map(Stemmer::create);
        Self {
            stemmer,
            remove_stopwords: config.remove_stopwords,
        }
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.unicode_words()
            .map(str::to_lowercase)
            .filter(|w| !(self.remove_stopwords && ENGLISH_STOP_WORDS.contains(&w.as_str())))
            .map(|w| match &self.stemmer {
                Some(stemmer) => stemmer.stem(&w).into_owned(),
                None => w,
            })
            .collect()
    }
}

fn language_algorithm(language: &str) -> Option<Algorithm> {
    match language.to_ascii_lowercase().as_str() {
        "english" | "en" => Some(Algorithm::English),
        "french" | "fr" => Some(Algorithm::French),
        "german" | "de" => Some(Algorithm::German),
        "spanish" | "es" => Some(Algorithm::Spanish),
        "italian" | "it" => Some(Algorithm::Italian),
        "portuguese" | "pt" => Some(Algorithm::Portuguese),
        _ => None,
    }
}
