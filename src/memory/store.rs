// src/memory/store.rs
//! Memory store and its two backends

use crate::backend::{global_resolver, Backend, BackendResolver, Component};
use crate::memory::scoring::{rank, record_tokens, Query};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, info, trace};

/// Record metadata
pub type Metadata = Map<String, Value>;

/// One saved memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub value: String,

    #[serde(default)]
    pub metadata: Metadata,
}

trait MemoryBackend: Send + Sync {
    fn save(&self, record: MemoryRecord);
    fn search(&self, query: &Query, limit: usize) -> Vec<MemoryRecord>;
    fn get_all(&self) -> Vec<MemoryRecord>;
    fn reset(&self);
    fn len(&self) -> usize;
}

/// Record with its search data computed once at save time
struct IndexedRecord {
    record: MemoryRecord,
    lowered: String,
    tokens: HashSet<String>,
}

/// Read-mostly store: searches share the lock and never re-tokenize
#[derive(Default)]
struct NativeMemory {
    records: RwLock<Vec<IndexedRecord>>,
}

impl MemoryBackend for NativeMemory {
    fn save(&self, record: MemoryRecord) {
        let indexed = IndexedRecord {
            lowered: record.value.to_lowercase(),
            tokens: record_tokens(&record.value, &record.metadata),
            record,
        };
        self.records.write().push(indexed);
    }

    fn search(&self, query: &Query, limit: usize) -> Vec<MemoryRecord> {
        let records = self.records.read();
        let scored = records
            .iter()
            .enumerate()
            .map(|(index, r)| (query.score(&r.lowered, &r.tokens), index))
            .collect();
        rank(scored, limit)
            .into_iter()
            .map(|index| records[index].record.clone())
            .collect()
    }

    fn get_all(&self) -> Vec<MemoryRecord> {
        self.records.read().iter().map(|r| r.record.clone()).collect()
    }

    fn reset(&self) {
        self.records.write().clear();
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }
}

/// Plain list behind one lock; scoring data is derived on every search
#[derive(Default)]
struct FallbackMemory {
    records: Mutex<Vec<MemoryRecord>>,
}

impl FallbackMemory {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MemoryRecord>> {
        // A panic elsewhere cannot leave a Vec half-pushed; keep serving.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MemoryBackend for FallbackMemory {
    fn save(&self, record: MemoryRecord) {
        self.lock().push(record);
    }

    fn search(&self, query: &Query, limit: usize) -> Vec<MemoryRecord> {
        let records = self.lock();
        let scored = records
            .iter()
            .enumerate()
            .map(|(index, r)| {
                let tokens = record_tokens(&r.value, &r.metadata);
                (query.score(&r.value.to_lowercase(), &tokens), index)
            })
            .collect();
        rank(scored, limit)
            .into_iter()
            .map(|index| records[index].clone())
            .collect()
    }

    fn get_all(&self) -> Vec<MemoryRecord> {
        self.lock().clone()
    }

    fn reset(&self) {
        self.lock().clear();
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// In-process memory store. Every operation is internally serialized, so a
/// store may be shared across threads.
pub struct AcceleratedMemoryStorage {
    backend: Backend,
    inner: Box<dyn MemoryBackend>,
}

impl AcceleratedMemoryStorage {
    pub fn new() -> Self {
        Self::with_resolver(global_resolver())
    }

    pub fn with_resolver(resolver: &BackendResolver) -> Self {
        Self::with_backend(resolver.resolve(Component::Memory))
    }

    pub fn with_backend(backend: Backend) -> Self {
        let inner: Box<dyn MemoryBackend> = match backend {
            Backend::Native => Box::new(NativeMemory::default()),
            Backend::Fallback => Box::new(FallbackMemory::default()),
        };
        info!("Memory storage ready ({} backend)", backend);
        Self { backend, inner }
    }

    pub fn implementation(&self) -> Backend {
        self.backend
    }

    /// Append a record. Values are not keys; duplicates are kept.
    pub fn save(&self, value: impl Into<String>, metadata: Metadata) {
        let record = MemoryRecord {
            value: value.into(),
            metadata,
        };
        trace!("Saving memory ({} bytes)", record.value.len());
        self.inner.save(record);
    }

    /// Up to `limit` records ranked by relevance to `query`. Accepts any
    /// integer type; zero and negative limits return nothing.
    pub fn search<L: TryInto<usize>>(&self, query: &str, limit: L) -> Vec<MemoryRecord> {
        let limit = limit.try_into().unwrap_or(0);
        if limit == 0 {
            return Vec::new();
        }
        let query = Query::parse(query);
        if query.is_empty() {
            return Vec::new();
        }
        let results = self.inner.search(&query, limit);
        debug!("Memory search returned {} records", results.len());
        results
    }

    /// Every record in insertion order
    pub fn get_all(&self) -> Vec<MemoryRecord> {
        self.inner.get_all()
    }

    pub fn reset(&self) {
        self.inner.reset();
        debug!("Memory storage reset");
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AcceleratedMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}
