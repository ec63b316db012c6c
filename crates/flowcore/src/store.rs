use crate::{ExecutionId, ExecutionRecord, StoreError, Transition};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Append-only persistence of execution records.
///
/// The engine is the only writer for a given execution id. Implementations
/// are expected to reject any transition on a finalized record.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist a freshly created record.
    async fn create(&self, record: ExecutionRecord) -> Result<(), StoreError>;

    /// Append one transition to the record's log.
    async fn append(&self, id: ExecutionId, transition: Transition) -> Result<(), StoreError>;

    /// Materialized record with every transition applied.
    async fn load(&self, id: ExecutionId) -> Result<ExecutionRecord, StoreError>;

    /// The transition log in append order.
    async fn transitions(&self, id: ExecutionId) -> Result<Vec<Transition>, StoreError>;
}

struct Entry {
    record: ExecutionRecord,
    log: Vec<Transition>,
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<ExecutionId, Entry>,
    /// Finalized ids, oldest first
    finalized: VecDeque<ExecutionId>,
}

/// Process-local store, used by the binaries and tests.
///
/// Records live only as long as the process. With a retention limit the
/// oldest finalized records are evicted once more than `limit` of them are
/// held; running records are never evicted.
#[derive(Clone, Default)]
pub struct InMemoryExecutionStore {
    entries: Arc<RwLock<Entries>>,
    retention: Option<usize>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` finalized records.
    pub fn with_retention(limit: usize) -> Self {
        Self {
            entries: Arc::default(),
            retention: Some(limit),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.by_id.is_empty()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if entries.by_id.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        tracing::debug!("Creating execution record {}", record.id);
        entries.by_id.insert(
            record.id,
            Entry {
                record,
                log: Vec::new(),
            },
        );
        Ok(())
    }

    async fn append(&self, id: ExecutionId, transition: Transition) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let entry = entries.by_id.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if let Err(e) = entry.record.apply(&transition) {
            tracing::warn!("Rejected transition for execution {}: {}", id, e);
            return Err(e);
        }
        entry.log.push(transition);

        if entry.record.is_finalized() {
            entries.finalized.push_back(id);
            if let Some(limit) = self.retention {
                while entries.finalized.len() > limit {
                    if let Some(evicted) = entries.finalized.pop_front() {
                        tracing::debug!("Evicting execution record {}", evicted);
                        entries.by_id.remove(&evicted);
                    }
                }
            }
        }
        Ok(())
    }

    async fn load(&self, id: ExecutionId) -> Result<ExecutionRecord, StoreError> {
        let entries = self.entries.read().await;
        entries
            .by_id
            .get(&id)
            .map(|entry| entry.record.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn transitions(&self, id: ExecutionId) -> Result<Vec<Transition>, StoreError> {
        let entries = self.entries.read().await;
        entries
            .by_id
            .get(&id)
            .map(|entry| entry.log.clone())
            .ok_or(StoreError::NotFound(id))
    }
}
