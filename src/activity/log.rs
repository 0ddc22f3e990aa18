// Activity log sinks
//
// `MemoryActivityLog` keeps entries in a vector; `JsonlActivityLog` appends one
// JSON object per line to a file. Both return entries newest first.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use super::types::ActivityLogEntry;
use crate::store::StoreError;
use crate::workflow::WorkflowId;

/// Append-only audit sink
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn append(&self, entry: &ActivityLogEntry) -> Result<(), StoreError>;

    /// Entries for a workflow, newest first, at most `limit` if given
    async fn entries_for_workflow(
        &self,
        workflow_id: &WorkflowId,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityLogEntry>, StoreError>;
}

fn newest_first<'a, I>(entries: I, workflow_id: &WorkflowId, limit: Option<usize>) -> Vec<ActivityLogEntry>
where
    I: DoubleEndedIterator<Item = &'a ActivityLogEntry>,
{
    entries
        .rev()
        .filter(|e| e.workflow_id.as_ref() == Some(workflow_id))
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct MemoryActivityLog {
    entries: Arc<RwLock<Vec<ActivityLogEntry>>>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Every entry in append order
    pub async fn all_entries(&self) -> Vec<ActivityLogEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl ActivityLog for MemoryActivityLog {
    async fn append(&self, entry: &ActivityLogEntry) -> Result<(), StoreError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn entries_for_workflow(
        &self,
        workflow_id: &WorkflowId,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityLogEntry>, StoreError> {
        let entries = self.entries.read().await;
        Ok(newest_first(entries.iter(), workflow_id, limit))
    }
}

/// JSON-lines activity log file
#[derive(Debug)]
pub struct JsonlActivityLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlActivityLog {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<ActivityLogEntry>, StoreError> {
        if !fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let mut entries = Vec::new();

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ActivityLogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    "Skipping unreadable activity log line {} in {}: {}",
                    line_no + 1,
                    self.path.display(),
                    e
                ),
            }
        }

        Ok(entries)
    }
}

#[async_trait]
impl ActivityLog for JsonlActivityLog {
    async fn append(&self, entry: &ActivityLogEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn entries_for_workflow(
        &self,
        workflow_id: &WorkflowId,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityLogEntry>, StoreError> {
        let entries = self.read_all().await?;
        Ok(newest_first(entries.iter(), workflow_id, limit))
    }
}
