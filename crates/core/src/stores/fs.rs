use crate::error::BackendError;
use crate::models::SourceFile;
use crate::traits::DocumentStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SIDECAR_SUFFIX: &str = ".meta.json";

/// Document store over a local directory. Mutable metadata (the `processed`
/// flag among it) lives in `<name>.meta.json` sidecar files next to each
/// document; the documents themselves are never written by the pipeline.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn sidecar_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{SIDECAR_SUFFIX}"))
    }

    fn read_sidecar(&self, name: &str) -> HashMap<String, String> {
        std::fs::read_to_string(self.sidecar_path(name))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|relative| relative.to_string_lossy().replace('\\', "/"))
}

pub fn content_type_for(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extension.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "doc" => "application/msword",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<SourceFile>, BackendError> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|item| item.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(name) = relative_name(&self.root, entry.path()) else {
                continue;
            };
            if name.ends_with(SIDECAR_SUFFIX) {
                continue;
            }
            if let Some(wanted) = prefix {
                if !name.starts_with(wanted) {
                    continue;
                }
            }

            let file_meta = entry
                .metadata()
                .map_err(|error| BackendError::Request(format!("stat {name}: {error}")))?;
            let last_modified = file_meta
                .modified()
                .ok()
                .map(DateTime::<Utc>::from);

            files.push(SourceFile {
                content_type: content_type_for(&name).to_string(),
                metadata: self.read_sidecar(&name),
                size_bytes: file_meta.len(),
                last_modified,
                name,
            });
        }

        files.sort_unstable_by(|left, right| left.name.cmp(&right.name));
        Ok(files)
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>, BackendError> {
        std::fs::read(self.root.join(name))
            .map_err(|error| BackendError::Request(format!("read {name}: {error}")))
    }

    async fn get_metadata(&self, name: &str) -> Result<HashMap<String, String>, BackendError> {
        Ok(self.read_sidecar(name))
    }

    async fn update_metadata(
        &self,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), BackendError> {
        let mut merged = self.read_sidecar(name);
        merged.extend(metadata);

        let serialized = serde_json::to_string_pretty(&merged)?;
        let sidecar = self.sidecar_path(name);
        if let Some(parent) = sidecar.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|error| BackendError::Request(format!("mkdir for {name}: {error}")))?;
        }
        std::fs::write(&sidecar, serialized)
            .map_err(|error| BackendError::Request(format!("write metadata {name}: {error}")))
    }
}
