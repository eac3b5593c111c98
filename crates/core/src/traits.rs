use crate::error::BackendError;
use crate::models::{DistanceMetric, IngestionTask, SearchHit, SourceFile, VectorEntry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// The durable store holding raw uploaded documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<SourceFile>, BackendError>;

    async fn download(&self, name: &str) -> Result<Vec<u8>, BackendError>;

    async fn get_metadata(&self, name: &str) -> Result<HashMap<String, String>, BackendError>;

    /// Best-effort merge of metadata entries; callers must treat failures as
    /// non-fatal.
    async fn update_metadata(
        &self,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), BackendError>;
}

/// Hands a task to exactly one ingestion worker invocation, at-least-once.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &IngestionTask) -> Result<(), BackendError>;
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent index setup. Called once per deployment, not per document.
    async fn create_index(
        &self,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<(), BackendError>;

    /// Overwrite semantics: the same document id replaces the prior entry
    /// entirely and renews its expiration.
    async fn upsert(&self, entry: &VectorEntry) -> Result<(), BackendError>;

    /// Returns up to `top_k` hits ordered by decreasing similarity. The store
    /// applies no relevance threshold; callers filter the scores themselves.
    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, BackendError>;

    async fn get(&self, document_id: &str) -> Result<Option<VectorEntry>, BackendError>;

    async fn delete(&self, document_id: &str) -> Result<bool, BackendError>;

    async fn list(&self, prefix: Option<&str>, limit: usize)
        -> Result<Vec<String>, BackendError>;
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<SourceFile>, BackendError> {
        (**self).list(prefix).await
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>, BackendError> {
        (**self).download(name).await
    }

    async fn get_metadata(&self, name: &str) -> Result<HashMap<String, String>, BackendError> {
        (**self).get_metadata(name).await
    }

    async fn update_metadata(
        &self,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), BackendError> {
        (**self).update_metadata(name, metadata).await
    }
}

#[async_trait]
impl<T: TaskQueue + ?Sized> TaskQueue for Arc<T> {
    async fn enqueue(&self, task: &IngestionTask) -> Result<(), BackendError> {
        (**self).enqueue(task).await
    }
}

#[async_trait]
impl<T: VectorStore + ?Sized> VectorStore for Arc<T> {
    async fn create_index(
        &self,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<(), BackendError> {
        (**self).create_index(dimension, metric).await
    }

    async fn upsert(&self, entry: &VectorEntry) -> Result<(), BackendError> {
        (**self).upsert(entry).await
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, BackendError> {
        (**self).search(query_vector, top_k).await
    }

    async fn get(&self, document_id: &str) -> Result<Option<VectorEntry>, BackendError> {
        (**self).get(document_id).await
    }

    async fn delete(&self, document_id: &str) -> Result<bool, BackendError> {
        (**self).delete(document_id).await
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, BackendError> {
        (**self).list(prefix, limit).await
    }
}
