use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A file in the document store, as returned by enumeration. The `processed`
/// metadata entry is the only field the pipeline ever writes back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SourceFile {
    pub const PROCESSED_KEY: &'static str = "processed";

    pub fn is_processed(&self) -> bool {
        self.metadata
            .get(Self::PROCESSED_KEY)
            .is_some_and(|value| value == "true")
    }
}

/// One queued unit of ingestion work. Queue-scoped lifetime; delivered
/// at-least-once, so execution must stay idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionTask {
    pub task_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

impl IngestionTask {
    pub fn for_file(file: &SourceFile) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            file_name: file.name.clone(),
            content_type: file.content_type.clone(),
            size_bytes: file.size_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub byte_len: usize,
}

impl Chunk {
    pub fn new(index: usize, text: String) -> Self {
        let byte_len = text.len();
        Self {
            index,
            text,
            byte_len,
        }
    }
}

/// One successfully embedded chunk.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub chunk_index: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

/// The persisted record for one document: the element-wise average of all
/// chunk vectors plus aggregate metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    pub document_id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub filename: String,
    pub content_type: String,
    pub upload_date: Option<DateTime<Utc>>,
    pub file_size: u64,
    pub chunks_count: usize,
    pub embeddings_generated: bool,
}

/// Transient per-query result. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: String,
    pub text: String,
    pub filename: String,
    pub content_type: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub status: String,
    pub total_files: usize,
    pub unprocessed_files: usize,
    pub queued_files: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            overlap: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
    Dot,
    Euclid,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "Cosine",
            Self::Dot => "Dot",
            Self::Euclid => "Euclid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_flag_requires_true_value() {
        let mut file = SourceFile {
            name: "notes.txt".to_string(),
            size_bytes: 12,
            content_type: "text/plain".to_string(),
            last_modified: None,
            metadata: HashMap::new(),
        };
        assert!(!file.is_processed());

        file.metadata
            .insert(SourceFile::PROCESSED_KEY.to_string(), "false".to_string());
        assert!(!file.is_processed());

        file.metadata
            .insert(SourceFile::PROCESSED_KEY.to_string(), "true".to_string());
        assert!(file.is_processed());
    }

    #[test]
    fn task_payload_round_trips_as_json() {
        let file = SourceFile {
            name: "reports/q3.pdf".to_string(),
            size_bytes: 2_048,
            content_type: "application/pdf".to_string(),
            last_modified: None,
            metadata: HashMap::new(),
        };

        let task = IngestionTask::for_file(&file);
        let payload = serde_json::to_vec(&task).expect("task should serialize");
        let decoded: IngestionTask =
            serde_json::from_slice(&payload).expect("task should deserialize");

        assert_eq!(decoded.file_name, "reports/q3.pdf");
        assert_eq!(decoded.content_type, "application/pdf");
        assert_eq!(decoded.size_bytes, 2_048);
        assert_eq!(decoded.task_id, task.task_id);
    }
}
