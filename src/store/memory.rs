//! Embedded in-memory vector store.
//!
//! Collections live in a `DashMap`; each collection sits behind its own
//! `RwLock` so inserts into one collection never block searches of
//! another. Objects are addressed by a dense slot; re-inserting an id
//! overwrites its slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{BenchError, Result};
use crate::fts::Bm25Index;
use crate::metrics;
use crate::query::{MemoryQuery, Query, SearchOptions};
use crate::traits::{ClientParams, VectorDbAdapter};
use crate::types::{
    AttributeValue, CandidateId, CollectionSchema, EmbeddingData, InsertReport, QueryResult,
    Record,
};

use super::{prepare_record, searchable_text};

/// One collection's objects, vectors, and text indexes.
pub struct MemoryCollection {
    pub schema: CollectionSchema,
    pub ids: Vec<CandidateId>,
    slots: HashMap<CandidateId, usize>,
    pub properties: Vec<HashMap<String, AttributeValue>>,
    /// Per vector space, one entry per slot.
    pub vectors: HashMap<String, Vec<Option<EmbeddingData>>>,
    /// Per text field.
    pub text_indexes: HashMap<String, Bm25Index>,
}

impl MemoryCollection {
    pub fn new(schema: CollectionSchema) -> Self {
        let vectors = schema
            .vector_spaces
            .iter()
            .map(|s| (s.name.clone(), Vec::new()))
            .collect();
        let text_indexes = schema
            .text_fields
            .iter()
            .map(|(field, cfg)| (field.clone(), Bm25Index::new(cfg)))
            .collect();
        Self {
            schema,
            ids: Vec::new(),
            slots: HashMap::new(),
            properties: Vec::new(),
            vectors,
            text_indexes,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Store a validated record under `id`.
    fn upsert(&mut self, id: CandidateId, record: Record) {
        let slot = match self.slots.get(&id) {
            Some(&slot) => slot,
            None => {
                let slot = self.ids.len();
                self.ids.push(id.clone());
                self.slots.insert(id, slot);
                self.properties.push(HashMap::new());
                for column in self.vectors.values_mut() {
                    column.push(None);
                }
                slot
            }
        };

        for (field, index) in self.text_indexes.iter_mut() {
            match record.properties.get(field).and_then(searchable_text) {
                Some(text) => index.insert(slot, &text),
                None => index.remove(slot),
            }
        }
        for (space, column) in self.vectors.iter_mut() {
            column[slot] = record.vectors.get(space).map(|e| e.data.clone());
        }
        self.properties[slot] = record.properties;
    }
}

pub type Collections = Arc<DashMap<String, Arc<RwLock<MemoryCollection>>>>;

pub struct MemoryStore {
    collections: Collections,
    query: MemoryQuery,
    closed: AtomicBool,
}

impl MemoryStore {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BenchError::connection("memory", "store is closed"));
        }
        Ok(())
    }

    pub(crate) fn collection(
        collections: &Collections,
        name: &str,
    ) -> Result<Arc<RwLock<MemoryCollection>>> {
        collections
            .get(name)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| BenchError::CollectionNotFound {
                collection: name.to_string(),
            })
    }

    /// Number of objects stored in `collection`.
    pub async fn count(&self, collection: &str) -> Result<usize> {
        let col = Self::collection(&self.collections, collection)?;
        let guard = col.read().await;
        Ok(guard.len())
    }
}

#[async_trait]
impl VectorDbAdapter for MemoryStore {
    async fn init_client(params: ClientParams) -> Result<Self> {
        let collections: Collections = Arc::new(DashMap::new());
        let query = MemoryQuery::new(
            params.query,
            params.model_provider,
            Arc::clone(&collections),
        );
        debug!("memory store ready");
        Ok(Self {
            collections,
            query,
            closed: AtomicBool::new(false),
        })
    }

    #[instrument(skip(self, schema), fields(collection = %schema.name))]
    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        self.ensure_open()?;
        if schema.name.trim().is_empty() {
            return Err(BenchError::Validation("collection name is empty".to_string()));
        }
        let replaced = self
            .collections
            .insert(
                schema.name.clone(),
                Arc::new(RwLock::new(MemoryCollection::new(schema.clone()))),
            )
            .is_some();
        info!(
            spaces = schema.vector_spaces.len(),
            text_fields = schema.text_fields.len(),
            replaced,
            "created collection"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_collection(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        let existed = self.collections.remove(name).is_some();
        if existed {
            info!("deleted collection");
        }
        Ok(existed)
    }

    #[instrument(skip(self, records), fields(records = records.len()))]
    async fn insert_data(
        &self,
        collection: &str,
        records: Vec<Record>,
        batch_size: usize,
    ) -> Result<InsertReport> {
        self.ensure_open()?;
        if batch_size == 0 {
            return Err(BenchError::Validation("batch_size must be positive".to_string()));
        }
        let col = Self::collection(&self.collections, collection)?;

        let mut report = InsertReport::default();
        let mut records = records.into_iter().enumerate().peekable();
        while records.peek().is_some() {
            let chunk: Vec<_> = records.by_ref().take(batch_size).collect();
            let mut guard = col.write().await;
            for (index, record) in chunk {
                match prepare_record(&guard.schema, index, &record) {
                    Ok(id) => {
                        guard.upsert(id.clone(), record);
                        report.inserted.push(id);
                    }
                    Err(failed) => {
                        warn!(index, reason = %failed.reason, "record rejected");
                        report.failed.push(failed);
                    }
                }
            }
        }

        metrics::RECORDS_INSERTED_TOTAL
            .with_label_values(&[collection, "ok"])
            .inc_by(report.inserted.len() as u64);
        metrics::RECORDS_INSERTED_TOTAL
            .with_label_values(&[collection, "error"])
            .inc_by(report.failed.len() as u64);
        info!(
            inserted = report.inserted.len(),
            failed = report.failed.len(),
            "insert complete"
        );
        Ok(report)
    }

    async fn search(
        &self,
        query: &str,
        collection: &str,
        limit: usize,
        query_method: Option<&str>,
        options: &SearchOptions,
    ) -> Result<QueryResult> {
        self.ensure_open()?;
        self.query
            .query(query, collection, limit, query_method, options)
            .await
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.collections.clear();
            debug!("memory store closed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
