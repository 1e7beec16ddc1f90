//! Vector-store adapters.
//!
//! `memory` is an embedded store used for local runs and tests; `zeppelin`
//! talks to a Zeppelin server over HTTP. Both validate records the same way
//! before insertion and both delegate ranking to a [`crate::query::Query`].

pub mod memory;
pub mod zeppelin;

use std::sync::Arc;

use uuid::Uuid;

use crate::config::StoreBackend;
use crate::error::{BenchError, Result};
use crate::traits::{ClientParams, VectorDbAdapter};
use crate::types::{
    AttributeValue, CandidateId, CollectionSchema, EmbeddingData, FailedRecord, Record,
    VectorKind,
};

pub use memory::MemoryStore;
pub use zeppelin::ZeppelinAdapter;

/// Connect the backend selected in `params.store.backend`.
pub async fn connect(params: ClientParams) -> Result<Arc<dyn VectorDbAdapter>> {
    Ok(match params.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::init_client(params).await?),
        StoreBackend::Zeppelin => Arc::new(ZeppelinAdapter::init_client(params).await?),
    })
}

/// Check a record against the collection schema and settle its id.
///
/// Records without an id get a random UUID. On failure the returned
/// [`FailedRecord`] carries `index` and the reason.
pub(crate) fn prepare_record(
    schema: &CollectionSchema,
    index: usize,
    record: &Record,
) -> std::result::Result<CandidateId, FailedRecord> {
    let fail = |reason: String| FailedRecord {
        index,
        id: record.id.clone(),
        reason,
    };

    let id = match &record.id {
        Some(id) if id.trim().is_empty() => return Err(fail("empty record id".to_string())),
        Some(id) => id.clone(),
        None => Uuid::new_v4().to_string(),
    };
    validate_vectors(schema, record).map_err(|e| fail(e.to_string()))?;
    Ok(id)
}

fn validate_vectors(schema: &CollectionSchema, record: &Record) -> Result<()> {
    for (name, embedding) in &record.vectors {
        let space = schema
            .vector_space(name)
            .ok_or_else(|| BenchError::UnknownVectorSpace {
                collection: schema.name.clone(),
                space: name.clone(),
            })?;

        match (&embedding.data, space.kind) {
            (EmbeddingData::Single(values), VectorKind::Single) => {
                check_dimension(space.dimensions, values.len())?;
            }
            (EmbeddingData::Multi(tokens), VectorKind::Multi) => {
                if tokens.is_empty() {
                    return Err(BenchError::Validation(format!(
                        "multi-vector '{name}' has no tokens"
                    )));
                }
                for token in tokens {
                    check_dimension(space.dimensions, token.len())?;
                }
            }
            (_, kind) => {
                return Err(BenchError::Validation(format!(
                    "vector '{name}' does not match the {kind:?} vector space"
                )));
            }
        }

        if !embedding.is_finite() {
            return Err(BenchError::Validation(format!(
                "vector '{name}' contains non-finite values"
            )));
        }
    }
    Ok(())
}

fn check_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(BenchError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

/// Text indexed for a property value; only string-like values are
/// searchable.
pub(crate) fn searchable_text(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::String(s) => Some(s.clone()),
        AttributeValue::StringList(items) => Some(items.join(" ")),
        _ => None,
    }
}
