// Persistence port for workflow aggregates
//
// The engine reads and commits a whole `WorkflowDetail` (workflow, stages and
// milestones) at a time. Commits carry the version the caller read, and the
// store rejects the write if someone else committed in between.

use async_trait::async_trait;
use thiserror::Error;

use crate::workflow::{MilestoneId, StageId, WorkflowDetail, WorkflowId};

pub mod file;
pub mod memory;
mod state;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Workflow already exists: {0}")]
    WorkflowExists(WorkflowId),

    #[error("Version conflict on workflow {workflow_id}: expected {expected}, found {found}")]
    VersionConflict {
        workflow_id: WorkflowId,
        expected: u64,
        found: u64,
    },

    #[error("Live workflow {existing} already exists for project '{project_id}' and vendor '{vendor_id}'")]
    DuplicateLive {
        project_id: String,
        vendor_id: String,
        existing: WorkflowId,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Storage for workflow aggregates
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert a new aggregate, enforcing one live workflow per (project, vendor)
    async fn insert_workflow(&self, detail: WorkflowDetail) -> Result<(), StoreError>;

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowDetail>, StoreError>;

    /// The non-cancelled workflow for a (project, vendor) pair, if any
    async fn find_live_workflow(
        &self,
        project_id: &str,
        vendor_id: &str,
    ) -> Result<Option<WorkflowDetail>, StoreError>;

    /// All workflows of a project, oldest first
    async fn list_project_workflows(&self, project_id: &str) -> Result<Vec<WorkflowDetail>, StoreError>;

    /// Replace an aggregate if its stored version still equals `expected_version`.
    ///
    /// Returns the new version.
    async fn commit_workflow(&self, detail: WorkflowDetail, expected_version: u64) -> Result<u64, StoreError>;

    async fn workflow_for_stage(&self, stage_id: &StageId) -> Result<Option<WorkflowId>, StoreError>;

    async fn workflow_for_milestone(&self, milestone_id: &MilestoneId) -> Result<Option<WorkflowId>, StoreError>;
}
