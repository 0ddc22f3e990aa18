// In-memory workflow store

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::state::StoreState;
use super::{StoreError, WorkflowStore};
use crate::workflow::{MilestoneId, StageId, WorkflowDetail, WorkflowId};

/// Volatile store for embedding and tests; clones share the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn insert_workflow(&self, detail: WorkflowDetail) -> Result<(), StoreError> {
        self.state.write().await.insert(detail)
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
        self.state.write().await.commit(detail, expected_version)
    }

    async fn workflow_for_stage(&self, stage_id: &StageId) -> Result<Option<WorkflowId>, StoreError> {
        Ok(self.state.read().await.workflow_for_stage(stage_id))
    }

    async fn workflow_for_milestone(&self, milestone_id: &MilestoneId) -> Result<Option<WorkflowId>, StoreError> {
        Ok(self.state.read().await.workflow_for_milestone(milestone_id))
    }
}
