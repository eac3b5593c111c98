use crate::error::BackendError;
use crate::models::{DistanceMetric, SearchHit, VectorEntry};
use crate::traits::VectorStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Vector store backed by the Qdrant HTTP API. Entries carry an expiration
/// stamp renewed on every upsert; search filters expired entries out and
/// `purge_expired` removes them for good.
pub struct QdrantVectorStore {
    endpoint: String,
    collection: String,
    retention_days: i64,
    client: Client,
}

impl QdrantVectorStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        retention_days: i64,
    ) -> Result<Self, BackendError> {
        let parsed = Url::parse(endpoint)?;
        Ok(Self {
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
            collection: collection.into(),
            retention_days,
            client: Client::new(),
        })
    }

    /// Qdrant point ids must be integers or UUIDs; deriving a v5 UUID from
    /// the document id keeps upserts idempotent per document.
    fn point_id(document_id: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, document_id.as_bytes())
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, self.collection, suffix)
    }

    pub async fn purge_expired(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.collection_url("/points/delete?wait=true"))
            .json(&json!({
                "filter": {
                    "must": [
                        { "key": "expires_at_ts", "range": { "lt": Utc::now().timestamp() } }
                    ]
                }
            }))
            .send()
            .await?;

        ensure_success("qdrant", response.status())
    }
}

fn ensure_success(backend: &str, status: StatusCode) -> Result<(), BackendError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(BackendError::BackendResponse {
            backend: backend.to_string(),
            details: status.to_string(),
        })
    }
}

fn hit_from_value(value: &Value) -> SearchHit {
    SearchHit {
        document_id: value
            .pointer("/payload/document_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        text: value
            .pointer("/payload/text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        filename: value
            .pointer("/payload/filename")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        content_type: value
            .pointer("/payload/content_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        score: value.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
    }
}

fn entry_from_value(value: &Value) -> Option<VectorEntry> {
    let payload = value.pointer("/payload")?;
    let vector = value
        .pointer("/vector")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|component| component as f32)
                .collect()
        })
        .unwrap_or_default();

    Some(VectorEntry {
        document_id: payload
            .pointer("/document_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        vector,
        text: payload
            .pointer("/text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        filename: payload
            .pointer("/filename")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        content_type: payload
            .pointer("/content_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        upload_date: payload
            .pointer("/upload_date")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc)),
        file_size: payload
            .pointer("/file_size")
            .and_then(Value::as_u64)
            .unwrap_or_default(),
        chunks_count: payload
            .pointer("/chunks_count")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize,
        embeddings_generated: payload
            .pointer("/embeddings_generated")
            .and_then(Value::as_str)
            == Some("true"),
    })
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn create_index(
        &self,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<(), BackendError> {
        let existing = self
            .client
            .get(self.collection_url(""))
            .send()
            .await?;
        if existing.status() == StatusCode::OK {
            return Ok(());
        }

        let response = self
            .client
            .put(self.collection_url(""))
            .json(&json!({
                "vectors": {
                    "size": dimension,
                    "distance": metric.as_str(),
                }
            }))
            .send()
            .await?;

        ensure_success("qdrant", response.status())
    }

    async fn upsert(&self, entry: &VectorEntry) -> Result<(), BackendError> {
        let expires_at = Utc::now() + Duration::days(self.retention_days);
        let payload = json!({
            "document_id": entry.document_id,
            "text": entry.text,
            "filename": entry.filename,
            "content_type": entry.content_type,
            "upload_date": entry.upload_date.map(|stamp| stamp.to_rfc3339()),
            "file_size": entry.file_size,
            "chunks_count": entry.chunks_count,
            "embeddings_generated": if entry.embeddings_generated { "true" } else { "false" },
            "expires_at": expires_at.to_rfc3339(),
            "expires_at_ts": expires_at.timestamp(),
        });

        let response = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .json(&json!({
                "points": [{
                    "id": Self::point_id(&entry.document_id),
                    "vector": entry.vector,
                    "payload": payload,
                }]
            }))
            .send()
            .await?;

        ensure_success("qdrant", response.status())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, BackendError> {
        let response = self
            .client
            .post(self.collection_url("/points/search"))
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
                "filter": {
                    "must": [
                        { "key": "expires_at_ts", "range": { "gt": Utc::now().timestamp() } }
                    ]
                }
            }))
            .send()
            .await?;

        ensure_success("qdrant", response.status())?;

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .map(|values| values.iter().map(hit_from_value).collect())
            .unwrap_or_default();
        Ok(hits)
    }

    async fn get(&self, document_id: &str) -> Result<Option<VectorEntry>, BackendError> {
        let point = Self::point_id(document_id);
        let response = self
            .client
            .get(self.collection_url(&format!("/points/{point}")))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        ensure_success("qdrant", response.status())?;

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result")
            .and_then(entry_from_value))
    }

    async fn delete(&self, document_id: &str) -> Result<bool, BackendError> {
        if self.get(document_id).await?.is_none() {
            return Ok(false);
        }

        let response = self
            .client
            .post(self.collection_url("/points/delete?wait=true"))
            .json(&json!({ "points": [Self::point_id(document_id)] }))
            .send()
            .await?;

        ensure_success("qdrant", response.status())?;
        Ok(true)
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, BackendError> {
        let response = self
            .client
            .post(self.collection_url("/points/scroll"))
            .json(&json!({
                "limit": limit,
                "with_payload": true,
                "with_vector": false,
            }))
            .send()
            .await?;

        ensure_success("qdrant", response.status())?;

        let parsed: Value = response.json().await?;
        let mut ids: Vec<String> = parsed
            .pointer("/result/points")
            .and_then(Value::as_array)
            .map(|points| {
                points
                    .iter()
                    .filter_map(|point| {
                        point
                            .pointer("/payload/document_id")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .filter(|id| prefix.map_or(true, |wanted| id.starts_with(wanted)))
                    .collect()
            })
            .unwrap_or_default();

        ids.sort_unstable();
        ids.truncate(limit);
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_stable_per_document() {
        let first = QdrantVectorStore::point_id("guide_ab12cd34");
        let second = QdrantVectorStore::point_id("guide_ab12cd34");
        let other = QdrantVectorStore::point_id("guide_ffffffff");
        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn endpoint_must_be_a_valid_url() {
        assert!(QdrantVectorStore::new("not a url", "documents", 30).is_err());
        assert!(QdrantVectorStore::new("http://localhost:6333", "documents", 30).is_ok());
    }

    #[test]
    fn search_hits_are_read_from_payload_fields() {
        let value = json!({
            "id": "0c9f…",
            "score": 0.83,
            "payload": {
                "document_id": "guide_ab12cd34",
                "text": "stored text",
                "filename": "guide.pdf",
                "content_type": "application/pdf",
            }
        });

        let hit = hit_from_value(&value);
        assert_eq!(hit.document_id, "guide_ab12cd34");
        assert_eq!(hit.text, "stored text");
        assert_eq!(hit.filename, "guide.pdf");
        assert!((hit.score - 0.83).abs() < 1e-9);
    }

    #[test]
    fn entries_round_trip_from_point_values() {
        let value = json!({
            "vector": [0.25, 0.5],
            "payload": {
                "document_id": "guide_ab12cd34",
                "text": "stored text",
                "filename": "guide.pdf",
                "content_type": "application/pdf",
                "upload_date": "2024-05-01T10:00:00+00:00",
                "file_size": 2048,
                "chunks_count": 3,
                "embeddings_generated": "true",
            }
        });

        let entry = entry_from_value(&value).expect("entry should parse");
        assert_eq!(entry.vector, vec![0.25, 0.5]);
        assert_eq!(entry.chunks_count, 3);
        assert_eq!(entry.file_size, 2048);
        assert!(entry.embeddings_generated);
        assert!(entry.upload_date.is_some());
    }
}
