// JSON file-backed workflow store
//
// The whole state is written as one pretty-printed JSON snapshot after every
// mutation. Several processes may share one state file: each mutation takes an
// exclusive lock on a sidecar lock file, re-reads the snapshot from disk,
// applies its checks against that copy and writes through a temporary file
// that is renamed over the state file. Reads are served from the copy seen by
// the last load or mutation of this handle.

use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::state::{StoreSnapshot, StoreState};
use super::{StoreError, WorkflowStore};
use crate::workflow::{MilestoneId, StageId, WorkflowDetail, WorkflowId};

#[derive(Debug)]
pub struct JsonFileStore {
    state: RwLock<StoreState>,
    state_file: PathBuf,
}

impl JsonFileStore {
    /// Open the store, loading existing state if the file exists
    pub async fn open<P: AsRef<Path>>(state_file: P) -> Result<Self, StoreError> {
        let state_file = state_file.as_ref().to_path_buf();

        if let Some(parent) = state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path = state_file.clone();
        let state = run_blocking(move || read_state(&path)).await?;
        info!("Loaded workflow state: {} workflows from {}", state.len(), state_file.display());

        Ok(Self {
            state: RwLock::new(state),
            state_file,
        })
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Apply `mutation` to the state on disk under the exclusive file lock.
    ///
    /// The snapshot is only rewritten when `mutation` succeeds; either way
    /// this handle's view is replaced with what is now on disk.
    async fn transact<T, F>(&self, mutation: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreState) -> Result<T, StoreError> + Send + 'static,
    {
        let mut guard = self.state.write().await;
        let path = self.state_file.clone();
        let (state, result) = run_blocking(move || locked_transaction(&path, mutation)).await?;
        *guard = state;
        result
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| StoreError::Unavailable(format!("state file task failed: {}", e)))?
}

fn lock_file(state_file: &Path) -> PathBuf {
    state_file.with_extension("json.lock")
}

fn locked_transaction<T, F>(state_file: &Path, mutation: F) -> Result<(StoreState, Result<T, StoreError>), StoreError>
where
    F: FnOnce(&mut StoreState) -> Result<T, StoreError>,
{
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_file(state_file))?;
    FileExt::lock_exclusive(&lock)?;

    let current = read_state(state_file)?;
    let mut next = current.clone();
    let outcome = match mutation(&mut next) {
        Ok(value) => {
            write_state(state_file, &next)?;
            (next, Ok(value))
        }
        Err(e) => {
            debug!("Rejected change to {}: {}", state_file.display(), e);
            (current, Err(e))
        }
    };

    // Closing the handle also releases the lock
    FileExt::unlock(&lock)?;
    Ok(outcome)
}

fn read_state(state_file: &Path) -> Result<StoreState, StoreError> {
    if !state_file.exists() {
        debug!("State file does not exist: {}", state_file.display());
        return Ok(StoreState::default());
    }

    let json = fs::read_to_string(state_file)?;
    let snapshot: StoreSnapshot = serde_json::from_str(&json)?;
    Ok(StoreState::from_snapshot(snapshot))
}

fn write_state(state_file: &Path, state: &StoreState) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(&state.to_snapshot())?;

    let tmp_file = state_file.with_extension("json.tmp");
    fs::write(&tmp_file, json)?;
    fs::rename(&tmp_file, state_file)?;

    debug!("Saved workflow state to: {}", state_file.display());
    Ok(())
}

#[async_trait]
impl WorkflowStore for JsonFileStore {
    async fn insert_workflow(&self, detail: WorkflowDetail) -> Result<(), StoreError> {
        self.transact(move |state| state.insert(detail)).await
    }

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowDetail>, StoreError> {
        Ok(self.state.read().await.get(id).cloned())
    }

    async fn find_live_workflow(
        &self,
        project_id: &str,
        vendor_id: &str,
    ) -> Result<Option<WorkflowDetail>, StoreError> {
        Ok(self.state.read().await.find_live(project_id, vendor_id).cloned())
    }

    async fn list_project_workflows(&self, project_id: &str) -> Result<Vec<WorkflowDetail>, StoreError> {
        Ok(self.state.read().await.list_project(project_id))
    }

    async fn commit_workflow(&self, detail: WorkflowDetail, expected_version: u64) -> Result<u64, StoreError> {
        self.transact(move |state| state.commit(detail, expected_version)).await
    }

    async fn workflow_for_stage(&self, stage_id: &StageId) -> Result<Option<WorkflowId>, StoreError> {
        Ok(self.state.read().await.workflow_for_stage(stage_id))
    }

    async fn workflow_for_milestone(&self, milestone_id: &MilestoneId) -> Result<Option<WorkflowId>, StoreError> {
        Ok(self.state.read().await.workflow_for_milestone(milestone_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::state::tests::sample_detail;
    use crate::workflow::WorkflowStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data").join("workflows.json");

        let detail = sample_detail("p1", "acme");
        let id = detail.id();
        let stage_id = detail.stages[0].stage.id;

        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store.insert_workflow(detail.clone()).await.unwrap();

            let mut started = detail;
            started.workflow.status = WorkflowStatus::InProgress;
            assert_eq!(store.commit_workflow(started, 0).await.unwrap(), 1);
        }

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let loaded = reopened.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(loaded.workflow.status, WorkflowStatus::InProgress);
        assert_eq!(loaded.workflow.version, 1);
        assert_eq!(reopened.workflow_for_stage(&stage_id).await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_rejected_commit_leaves_file_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("workflows.json");
        let store = JsonFileStore::open(&path).await.unwrap();

        let detail = sample_detail("p1", "acme");
        store.insert_workflow(detail.clone()).await.unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        assert!(store.commit_workflow(detail, 7).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_corrupt_state_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("workflows.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = JsonFileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_handles_sharing_a_file_keep_each_others_workflows() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("workflows.json");
        let first = JsonFileStore::open(&path).await.unwrap();
        let second = JsonFileStore::open(&path).await.unwrap();

        let acme = sample_detail("p1", "acme");
        let globex = sample_detail("p1", "globex");
        first.insert_workflow(acme.clone()).await.unwrap();
        second.insert_workflow(globex.clone()).await.unwrap();

        // The second handle saw the first one's workflow while inserting
        assert!(second.get_workflow(&acme.id()).await.unwrap().is_some());

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert!(reopened.get_workflow(&acme.id()).await.unwrap().is_some());
        assert!(reopened.get_workflow(&globex.id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_live_pair_checked_against_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("workflows.json");
        let first = JsonFileStore::open(&path).await.unwrap();
        let second = JsonFileStore::open(&path).await.unwrap();

        let original = sample_detail("p1", "acme");
        first.insert_workflow(original.clone()).await.unwrap();

        // Not visible to the second handle until it touches the file
        assert!(second.find_live_workflow("p1", "acme").await.unwrap().is_none());
        let err = second.insert_workflow(sample_detail("p1", "acme")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateLive { existing, .. } if existing == original.id()));

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_project_workflows("p1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_commit_conflicts_and_refreshes_view() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("workflows.json");
        let first = JsonFileStore::open(&path).await.unwrap();

        let detail = sample_detail("p1", "acme");
        let id = detail.id();
        first.insert_workflow(detail.clone()).await.unwrap();
        let second = JsonFileStore::open(&path).await.unwrap();

        let mut started = detail.clone();
        started.workflow.status = WorkflowStatus::InProgress;
        assert_eq!(first.commit_workflow(started, 0).await.unwrap(), 1);

        let mut stale = second.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(stale.workflow.version, 0);
        stale.workflow.notes = Some("late edit".to_string());
        let err = second.commit_workflow(stale, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 0, found: 1, .. }));

        // The failed commit brought the second handle up to date
        let fresh = second.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(fresh.workflow.version, 1);
        assert_eq!(fresh.workflow.status, WorkflowStatus::InProgress);
    }
}
