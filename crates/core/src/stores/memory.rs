use crate::error::BackendError;
use crate::models::{DistanceMetric, IngestionTask, SearchHit, VectorEntry};
use crate::traits::{TaskQueue, VectorStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Single-process FIFO queue for offline deployments and tests. Delivery is
/// at-least-once from the consumer's point of view: the host may re-run a
/// dequeued task after a failure.
#[derive(Default)]
pub struct InMemoryQueue {
    tasks: Mutex<VecDeque<IngestionTask>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dequeue(&self) -> Option<IngestionTask> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue(&self, task: &IngestionTask) -> Result<(), BackendError> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task.clone());
        Ok(())
    }
}

struct StoredEntry {
    entry: VectorEntry,
    expires_at: DateTime<Utc>,
}

/// Cosine-similarity vector store held in process memory. Mirrors the
/// contract of the HTTP-backed store, including per-entry expiration.
pub struct InMemoryVectorStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
    retention_days: i64,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::with_retention_days(super::qdrant::DEFAULT_RETENTION_DAYS)
    }

    pub fn with_retention_days(retention_days: i64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention_days,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (a, b) in left.iter().zip(right) {
        dot += f64::from(*a) * f64::from(*b);
        left_norm += f64::from(*a) * f64::from(*a);
        right_norm += f64::from(*b) * f64::from(*b);
    }

    let magnitude = left_norm.sqrt() * right_norm.sqrt();
    if magnitude == 0.0 {
        return 0.0;
    }
    dot / magnitude
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_index(
        &self,
        _dimension: usize,
        _metric: DistanceMetric,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn upsert(&self, entry: &VectorEntry) -> Result<(), BackendError> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            entry.document_id.clone(),
            StoredEntry {
                entry: entry.clone(),
                expires_at: Utc::now() + Duration::days(self.retention_days),
            },
        );
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, BackendError> {
        let now = Utc::now();
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut hits: Vec<SearchHit> = entries
            .values()
            .filter(|stored| stored.expires_at > now)
            .map(|stored| SearchHit {
                document_id: stored.entry.document_id.clone(),
                text: stored.entry.text.clone(),
                filename: stored.entry.filename.clone(),
                content_type: stored.entry.content_type.clone(),
                score: cosine_similarity(query_vector, &stored.entry.vector),
            })
            .collect();

        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get(&self, document_id: &str) -> Result<Option<VectorEntry>, BackendError> {
        let now = Utc::now();
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .get(document_id)
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.entry.clone()))
    }

    async fn delete(&self, document_id: &str) -> Result<bool, BackendError> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(entries.remove(document_id).is_some())
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, BackendError> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = entries
            .keys()
            .filter(|id| prefix.map_or(true, |wanted| id.starts_with(wanted)))
            .cloned()
            .collect();
        ids.sort_unstable();
        ids.truncate(limit);
        Ok(ids)
    }
}
