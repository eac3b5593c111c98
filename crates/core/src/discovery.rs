use crate::error::BackendError;
use crate::models::{DiscoveryReport, IngestionTask, SourceFile};
use crate::traits::{DocumentStore, TaskQueue};
use tracing::{info, warn};

/// Scans the document store for unprocessed files and emits one ingestion
/// task per file. Best-effort fan-out: a crash mid-run leaves some files
/// queued and others not, which self-heals on the next scheduled run.
pub struct BatchDiscovery<D, Q> {
    documents: D,
    queue: Q,
}

impl<D, Q> BatchDiscovery<D, Q>
where
    D: DocumentStore,
    Q: TaskQueue,
{
    pub fn new(documents: D, queue: Q) -> Self {
        Self { documents, queue }
    }

    /// Per-file enqueue failures are logged and skipped; only the enumeration
    /// call itself fails the job.
    pub async fn run(&self) -> Result<DiscoveryReport, BackendError> {
        let files = self.documents.list(None).await?;
        info!(total = files.len(), "document store enumerated");

        let unprocessed: Vec<&SourceFile> =
            files.iter().filter(|file| !file.is_processed()).collect();
        info!(unprocessed = unprocessed.len(), "unprocessed files found");

        let mut queued = 0usize;
        for file in &unprocessed {
            let task = IngestionTask::for_file(file);
            match self.queue.enqueue(&task).await {
                Ok(()) => {
                    queued += 1;
                    info!(file = %file.name, task_id = %task.task_id, "queued for ingestion");
                }
                Err(error) => {
                    warn!(file = %file.name, %error, "failed to queue file, skipping");
                }
            }
        }

        Ok(DiscoveryReport {
            status: "success".to_string(),
            total_files: files.len(),
            unprocessed_files: unprocessed.len(),
            queued_files: queued,
        })
    }
}
