use crate::chunking::{chunk_text, clean_text};
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extract::ExtractorRegistry;
use crate::identity::{digest_bytes, generate_document_id};
use crate::models::{Chunk, ChunkingConfig, EmbeddingRecord, IngestionTask, VectorEntry};
use crate::traits::{DocumentStore, VectorStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Consumes one queued task end-to-end: download, extract, clean, chunk,
/// embed, store, mark-processed. Workers share no mutable state; duplicate
/// deliveries are safe because the content-derived document id makes the
/// final upsert an idempotent overwrite.
pub struct IngestionWorker<D, E, V> {
    documents: D,
    embedder: E,
    vectors: V,
    extractors: ExtractorRegistry,
    chunking: ChunkingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Indexed {
        document_id: String,
        chunks_embedded: usize,
        chunks_total: usize,
    },
    /// Clean terminal stop: nothing stored, no error raised. The file stays
    /// unprocessed when embeddings were expected but none succeeded.
    NothingToIndex { reason: String },
}

impl<D, E, V> IngestionWorker<D, E, V>
where
    D: DocumentStore,
    E: Embedder,
    V: VectorStore,
{
    pub fn new(
        documents: D,
        embedder: E,
        vectors: V,
        extractors: ExtractorRegistry,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            documents,
            embedder,
            vectors,
            extractors,
            chunking,
        }
    }

    /// Queue-trigger entry point: decodes the raw JSON payload, then runs the
    /// task. Decode failures propagate and trigger redelivery.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<TaskOutcome, IngestError> {
        let task: IngestionTask = serde_json::from_slice(payload)?;
        self.run(&task).await
    }

    pub async fn run(&self, task: &IngestionTask) -> Result<TaskOutcome, IngestError> {
        info!(file = %task.file_name, task_id = %task.task_id, "ingestion started");

        let bytes = self
            .documents
            .download(&task.file_name)
            .await
            .map_err(IngestError::Backend)?;

        // The scratch file is the only exclusively-owned local resource; RAII
        // removes it on every exit path, including errors.
        let scratch = write_scratch(&task.file_name, &bytes)?;

        let file_metadata = self
            .documents
            .get_metadata(&task.file_name)
            .await
            .map_err(IngestError::Backend)?;

        let digest = digest_bytes(&bytes);
        let document_id = generate_document_id(&task.file_name, &digest)?;

        let extracted = self
            .extractors
            .extract(scratch.path(), &task.file_name, &task.content_type)
            .await?;
        if extracted.trim().is_empty() {
            info!(file = %task.file_name, "no text extracted, nothing to index");
            return Ok(TaskOutcome::NothingToIndex {
                reason: "no text extracted".to_string(),
            });
        }

        let cleaned = clean_text(&extracted);
        let chunks = chunk_text(&cleaned, self.chunking)?;
        info!(
            file = %task.file_name,
            extracted_chars = extracted.chars().count(),
            chunk_count = chunks.len(),
            "text extracted and chunked"
        );

        let records = self.embed_chunks(&chunks).await;
        if records.is_empty() {
            warn!(
                file = %task.file_name,
                "no chunk produced an embedding, file left unprocessed for retry"
            );
            return Ok(TaskOutcome::NothingToIndex {
                reason: "no embeddings generated".to_string(),
            });
        }

        let entry = build_entry(task, &document_id, &records, &file_metadata);
        self.vectors
            .upsert(&entry)
            .await
            .map_err(IngestError::Backend)?;

        self.mark_processed(task, &document_id, records.len()).await;

        info!(
            document_id = %document_id,
            chunks_embedded = records.len(),
            "ingestion finished"
        );
        Ok(TaskOutcome::Indexed {
            document_id,
            chunks_embedded: records.len(),
            chunks_total: chunks.len(),
        })
    }

    /// A single chunk failing to embed is skipped and logged; the rest of the
    /// document continues.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Vec<EmbeddingRecord> {
        let mut records = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match self.embedder.embed(&chunk.text).await {
                Ok(vector) => records.push(EmbeddingRecord {
                    chunk_index: chunk.index,
                    text: chunk.text.clone(),
                    vector,
                }),
                Err(error) => {
                    warn!(chunk = chunk.index, %error, "embedding failed, chunk skipped");
                }
            }
        }
        records
    }

    /// Best-effort: a failed metadata write is logged only. The worst case is
    /// a re-queue on the next discovery run, which the content-derived id
    /// makes harmless.
    async fn mark_processed(&self, task: &IngestionTask, document_id: &str, chunks_count: usize) {
        let mut metadata = HashMap::new();
        metadata.insert("processed".to_string(), "true".to_string());
        metadata.insert("document_id".to_string(), document_id.to_string());
        metadata.insert("chunks_count".to_string(), chunks_count.to_string());
        metadata.insert("embeddings_generated".to_string(), "true".to_string());
        metadata.insert(
            "processed_timestamp".to_string(),
            Utc::now().to_rfc3339(),
        );

        if let Err(error) = self
            .documents
            .update_metadata(&task.file_name, metadata)
            .await
        {
            warn!(file = %task.file_name, %error, "failed to mark file processed");
        }
    }
}

fn build_entry(
    task: &IngestionTask,
    document_id: &str,
    records: &[EmbeddingRecord],
    file_metadata: &HashMap<String, String>,
) -> VectorEntry {
    let upload_date = file_metadata
        .get("upload_date")
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|value| value.with_timezone(&Utc));

    VectorEntry {
        document_id: document_id.to_string(),
        vector: average_vector(records),
        text: records
            .iter()
            .map(|record| record.text.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        filename: task.file_name.clone(),
        content_type: task.content_type.clone(),
        upload_date,
        file_size: task.size_bytes,
        chunks_count: records.len(),
        embeddings_generated: true,
    }
}

/// Element-wise mean over all successfully embedded chunk vectors.
pub fn average_vector(records: &[EmbeddingRecord]) -> Vec<f32> {
    let Some(first) = records.first() else {
        return Vec::new();
    };

    let mut sum = vec![0f32; first.vector.len()];
    for record in records {
        for (slot, value) in sum.iter_mut().zip(&record.vector) {
            *slot += value;
        }
    }

    let count = records.len() as f32;
    for slot in &mut sum {
        *slot /= count;
    }
    sum
}

fn write_scratch(original_name: &str, bytes: &[u8]) -> Result<NamedTempFile, IngestError> {
    let mut builder = tempfile::Builder::new();
    let suffix = Path::new(original_name)
        .extension()
        .map(|extension| format!(".{}", extension.to_string_lossy()));
    if let Some(suffix) = &suffix {
        builder.suffix(suffix.as_str());
    }

    let mut scratch = builder.tempfile()?;
    scratch.write_all(bytes)?;
    scratch.flush()?;
    Ok(scratch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::models::{DistanceMetric, SearchHit, SourceFile};
    use crate::stores::InMemoryVectorStore;
    use crate::traits::VectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    struct FakeDocumentStore {
        files: HashMap<String, Vec<u8>>,
        metadata_updates: Mutex<Vec<(String, HashMap<String, String>)>>,
        fail_metadata_update: bool,
    }

    impl FakeDocumentStore {
        fn with_file(name: &str, content: &[u8]) -> Self {
            let mut files = HashMap::new();
            files.insert(name.to_string(), content.to_vec());
            Self {
                files,
                metadata_updates: Mutex::new(Vec::new()),
                fail_metadata_update: false,
            }
        }

        fn updates(&self) -> Vec<(String, HashMap<String, String>)> {
            self.metadata_updates
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl DocumentStore for FakeDocumentStore {
        async fn list(&self, _prefix: Option<&str>) -> Result<Vec<SourceFile>, BackendError> {
            Ok(Vec::new())
        }

        async fn download(&self, name: &str) -> Result<Vec<u8>, BackendError> {
            self.files
                .get(name)
                .cloned()
                .ok_or_else(|| BackendError::Request(format!("no such file: {name}")))
        }

        async fn get_metadata(
            &self,
            _name: &str,
        ) -> Result<HashMap<String, String>, BackendError> {
            Ok(HashMap::new())
        }

        async fn update_metadata(
            &self,
            name: &str,
            metadata: HashMap<String, String>,
        ) -> Result<(), BackendError> {
            if self.fail_metadata_update {
                return Err(BackendError::Request("metadata write refused".to_string()));
            }
            self.metadata_updates
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((name.to_string(), metadata));
            Ok(())
        }
    }

    struct ScriptedEmbedder {
        vector: Vec<f32>,
        fail_on_calls: Vec<usize>,
        calls: AtomicUsize,
    }

    impl ScriptedEmbedder {
        fn constant(vector: Vec<f32>) -> Self {
            Self {
                vector,
                fail_on_calls: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing_on(vector: Vec<f32>, fail_on_calls: Vec<usize>) -> Self {
            Self {
                vector,
                fail_on_calls,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for ScriptedEmbedder {
        fn dimensions(&self) -> usize {
            self.vector.len()
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on_calls.contains(&call) {
                return Err(BackendError::Request(format!(
                    "embedding service refused call {call}"
                )));
            }
            Ok(self.vector.clone())
        }
    }

    struct RecordingVectorStore {
        upserts: Mutex<Vec<VectorEntry>>,
        fail_upsert: bool,
    }

    impl RecordingVectorStore {
        fn new() -> Self {
            Self {
                upserts: Mutex::new(Vec::new()),
                fail_upsert: false,
            }
        }

        fn failing() -> Self {
            Self {
                upserts: Mutex::new(Vec::new()),
                fail_upsert: true,
            }
        }

        fn upserts(&self) -> Vec<VectorEntry> {
            self.upserts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl VectorStore for RecordingVectorStore {
        async fn create_index(
            &self,
            _dimension: usize,
            _metric: DistanceMetric,
        ) -> Result<(), BackendError> {
            Ok(())
        }

        async fn upsert(&self, entry: &VectorEntry) -> Result<(), BackendError> {
            if self.fail_upsert {
                return Err(BackendError::NotReady("vector store offline".to_string()));
            }
            self.upserts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(entry.clone());
            Ok(())
        }

        async fn search(
            &self,
            _query_vector: &[f32],
            _top_k: usize,
        ) -> Result<Vec<SearchHit>, BackendError> {
            Ok(Vec::new())
        }

        async fn get(&self, _document_id: &str) -> Result<Option<VectorEntry>, BackendError> {
            Ok(None)
        }

        async fn delete(&self, _document_id: &str) -> Result<bool, BackendError> {
            Ok(false)
        }

        async fn list(
            &self,
            _prefix: Option<&str>,
            _limit: usize,
        ) -> Result<Vec<String>, BackendError> {
            Ok(Vec::new())
        }
    }

    fn task(name: &str, content_type: &str, size: u64) -> IngestionTask {
        IngestionTask {
            task_id: uuid::Uuid::new_v4(),
            file_name: name.to_string(),
            content_type: content_type.to_string(),
            size_bytes: size,
        }
    }

    fn worker_for(
        store: Arc<FakeDocumentStore>,
        embedder: Arc<ScriptedEmbedder>,
        vectors: Arc<RecordingVectorStore>,
    ) -> IngestionWorker<Arc<FakeDocumentStore>, Arc<ScriptedEmbedder>, Arc<RecordingVectorStore>>
    {
        IngestionWorker::new(
            store,
            embedder,
            vectors,
            ExtractorRegistry::standard(None),
            ChunkingConfig::default(),
        )
    }

    #[tokio::test]
    async fn text_document_is_chunked_embedded_and_stored() {
        let text = "abcdefghij".repeat(250);
        let store = Arc::new(FakeDocumentStore::with_file("guide.txt", text.as_bytes()));
        let embedder = Arc::new(ScriptedEmbedder::constant(vec![0.1, 0.2, 0.3, 0.4, 0.5]));
        let vectors = Arc::new(RecordingVectorStore::new());
        let worker = worker_for(store.clone(), embedder.clone(), vectors.clone());

        let outcome = worker
            .run(&task("guide.txt", "text/plain", text.len() as u64))
            .await
            .expect("ingestion should succeed");

        assert_eq!(
            outcome,
            TaskOutcome::Indexed {
                document_id: generate_document_id("guide.txt", &digest_bytes(text.as_bytes()))
                    .expect("id"),
                chunks_embedded: 3,
                chunks_total: 3,
            }
        );
        assert_eq!(embedder.call_count(), 3);

        let stored = vectors.upserts();
        assert_eq!(stored.len(), 1);
        let entry = &stored[0];
        assert_eq!(entry.chunks_count, 3);
        // All chunk vectors are identical, so so is their average.
        for (value, expected) in entry.vector.iter().zip([0.1f32, 0.2, 0.3, 0.4, 0.5]) {
            assert!((value - expected).abs() < 1e-6);
        }
        assert_eq!(entry.filename, "guide.txt");
        assert_eq!(entry.content_type, "text/plain");
        assert!(entry.embeddings_generated);

        let updates = store.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.get("processed"), Some(&"true".to_string()));
        assert_eq!(updates[0].1.get("chunks_count"), Some(&"3".to_string()));
    }

    #[tokio::test]
    async fn one_failed_chunk_is_skipped_and_the_rest_are_averaged() {
        let text = "abcdefghij".repeat(250);
        let store = Arc::new(FakeDocumentStore::with_file("guide.txt", text.as_bytes()));
        let embedder = Arc::new(ScriptedEmbedder::failing_on(
            vec![0.5, 0.5],
            vec![2],
        ));
        let vectors = Arc::new(RecordingVectorStore::new());
        let worker = worker_for(store, embedder.clone(), vectors.clone());

        let outcome = worker
            .run(&task("guide.txt", "text/plain", text.len() as u64))
            .await
            .expect("ingestion should succeed");

        match outcome {
            TaskOutcome::Indexed {
                chunks_embedded,
                chunks_total,
                ..
            } => {
                assert_eq!(chunks_embedded, 2);
                assert_eq!(chunks_total, 3);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let stored = vectors.upserts();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].chunks_count, 2);
        for value in &stored[0].vector {
            assert!((value - 0.5).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn unsupported_file_stops_without_embedding_or_storing() {
        let store = Arc::new(FakeDocumentStore::with_file("tool.exe", b"MZ\x90\x00"));
        let embedder = Arc::new(ScriptedEmbedder::constant(vec![1.0]));
        let vectors = Arc::new(RecordingVectorStore::new());
        let worker = worker_for(store.clone(), embedder.clone(), vectors.clone());

        let outcome = worker
            .run(&task("tool.exe", "application/octet-stream", 4))
            .await
            .expect("clean stop, not an error");

        assert!(matches!(outcome, TaskOutcome::NothingToIndex { .. }));
        assert_eq!(embedder.call_count(), 0);
        assert!(vectors.upserts().is_empty());
        // The file must stay unprocessed so nothing re-queues forever.
        assert!(store.updates().is_empty());
    }

    #[tokio::test]
    async fn all_chunks_failing_leaves_the_file_unprocessed() {
        let text = "abcdefghij".repeat(250);
        let store = Arc::new(FakeDocumentStore::with_file("guide.txt", text.as_bytes()));
        let embedder = Arc::new(ScriptedEmbedder::failing_on(vec![1.0], vec![1, 2, 3]));
        let vectors = Arc::new(RecordingVectorStore::new());
        let worker = worker_for(store.clone(), embedder, vectors.clone());

        let outcome = worker
            .run(&task("guide.txt", "text/plain", text.len() as u64))
            .await
            .expect("clean stop, not an error");

        assert!(matches!(outcome, TaskOutcome::NothingToIndex { .. }));
        assert!(vectors.upserts().is_empty());
        assert!(store.updates().is_empty());
    }

    #[tokio::test]
    async fn store_failure_propagates_for_redelivery() {
        let store = Arc::new(FakeDocumentStore::with_file("note.txt", b"short note"));
        let embedder = Arc::new(ScriptedEmbedder::constant(vec![1.0, 0.0]));
        let vectors = Arc::new(RecordingVectorStore::failing());
        let worker = worker_for(store.clone(), embedder, vectors);

        let result = worker.run(&task("note.txt", "text/plain", 10)).await;
        assert!(matches!(result, Err(IngestError::Backend(_))));
        assert!(store.updates().is_empty());
    }

    #[tokio::test]
    async fn metadata_failure_is_swallowed() {
        let mut store = FakeDocumentStore::with_file("note.txt", b"short note");
        store.fail_metadata_update = true;
        let store = Arc::new(store);
        let embedder = Arc::new(ScriptedEmbedder::constant(vec![1.0, 0.0]));
        let vectors = Arc::new(RecordingVectorStore::new());
        let worker = worker_for(store, embedder, vectors.clone());

        let outcome = worker
            .run(&task("note.txt", "text/plain", 10))
            .await
            .expect("mark failures are never fatal");
        assert!(matches!(outcome, TaskOutcome::Indexed { .. }));
        assert_eq!(vectors.upserts().len(), 1);
    }

    #[tokio::test]
    async fn reprocessing_identical_content_upserts_one_entry() {
        let store = Arc::new(FakeDocumentStore::with_file("note.txt", b"same bytes"));
        let embedder = Arc::new(ScriptedEmbedder::constant(vec![0.3, 0.4]));
        let vectors = Arc::new(InMemoryVectorStore::new());
        let worker = IngestionWorker::new(
            store,
            embedder,
            vectors.clone(),
            ExtractorRegistry::standard(None),
            ChunkingConfig::default(),
        );

        let queued = task("note.txt", "text/plain", 10);
        let first = worker.run(&queued).await.expect("first run");
        // Simulate at-least-once delivery of the same task.
        let second = worker.run(&queued).await.expect("second run");

        assert_eq!(first, second);
        assert_eq!(vectors.len(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_decode_error() {
        let store = Arc::new(FakeDocumentStore::with_file("note.txt", b"x"));
        let embedder = Arc::new(ScriptedEmbedder::constant(vec![1.0]));
        let vectors = Arc::new(RecordingVectorStore::new());
        let worker = worker_for(store, embedder, vectors);

        let result = worker.handle_payload(b"{not json").await;
        assert!(matches!(result, Err(IngestError::TaskDecode(_))));
    }

    #[test]
    fn average_of_no_records_is_empty() {
        assert!(average_vector(&[]).is_empty());
    }

    #[test]
    fn average_is_element_wise() {
        let records = vec![
            EmbeddingRecord {
                chunk_index: 0,
                text: "a".to_string(),
                vector: vec![1.0, 0.0],
            },
            EmbeddingRecord {
                chunk_index: 1,
                text: "b".to_string(),
                vector: vec![0.0, 1.0],
            },
        ];
        assert_eq!(average_vector(&records), vec![0.5, 0.5]);
    }
}
