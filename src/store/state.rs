// In-memory store state shared by the memory and file adapters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::StoreError;
use crate::workflow::{MilestoneId, StageId, WorkflowDetail, WorkflowId};

/// Workflow aggregates plus lookup indexes for stages and milestones
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    workflows: HashMap<WorkflowId, WorkflowDetail>,
    stage_index: HashMap<StageId, WorkflowId>,
    milestone_index: HashMap<MilestoneId, WorkflowId>,
}

/// Serializable form written to disk
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoreSnapshot {
    pub workflows: Vec<WorkflowDetail>,
    pub last_updated: DateTime<Utc>,
}

impl StoreState {
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut state = Self::default();
        for detail in snapshot.workflows {
            state.index(&detail);
            state.workflows.insert(detail.id(), detail);
        }
        state
    }

    pub fn to_snapshot(&self) -> StoreSnapshot {
        let mut workflows: Vec<WorkflowDetail> = self.workflows.values().cloned().collect();
        workflows.sort_by(|a, b| a.workflow.created_at.cmp(&b.workflow.created_at));

        StoreSnapshot {
            workflows,
            last_updated: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    fn index(&mut self, detail: &WorkflowDetail) {
        let workflow_id = detail.id();
        for stage in &detail.stages {
            self.stage_index.insert(stage.stage.id, workflow_id);
            for milestone in &stage.milestones {
                self.milestone_index.insert(milestone.id, workflow_id);
            }
        }
    }

    pub fn insert(&mut self, detail: WorkflowDetail) -> Result<(), StoreError> {
        if self.workflows.contains_key(&detail.id()) {
            return Err(StoreError::WorkflowExists(detail.id()));
        }

        if detail.workflow.is_live() {
            if let Some(existing) = self.find_live(&detail.workflow.project_id, &detail.workflow.vendor_id) {
                return Err(StoreError::DuplicateLive {
                    project_id: detail.workflow.project_id.clone(),
                    vendor_id: detail.workflow.vendor_id.clone(),
                    existing: existing.id(),
                });
            }
        }

        self.index(&detail);
        self.workflows.insert(detail.id(), detail);
        Ok(())
    }

    pub fn get(&self, id: &WorkflowId) -> Option<&WorkflowDetail> {
        self.workflows.get(id)
    }

    pub fn find_live(&self, project_id: &str, vendor_id: &str) -> Option<&WorkflowDetail> {
        self.workflows.values().find(|d| {
            d.workflow.is_live() && d.workflow.project_id == project_id && d.workflow.vendor_id == vendor_id
        })
    }

    pub fn list_project(&self, project_id: &str) -> Vec<WorkflowDetail> {
        let mut workflows: Vec<WorkflowDetail> = self
            .workflows
            .values()
            .filter(|d| d.workflow.project_id == project_id)
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.workflow.created_at.cmp(&b.workflow.created_at));
        workflows
    }

    pub fn commit(&mut self, mut detail: WorkflowDetail, expected_version: u64) -> Result<u64, StoreError> {
        let workflow_id = detail.id();
        let current = self
            .workflows
            .get(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        if current.workflow.version != expected_version {
            return Err(StoreError::VersionConflict {
                workflow_id,
                expected: expected_version,
                found: current.workflow.version,
            });
        }

        let version = expected_version + 1;
        detail.workflow.version = version;
        self.index(&detail);
        self.workflows.insert(workflow_id, detail);
        Ok(version)
    }

    pub fn workflow_for_stage(&self, stage_id: &StageId) -> Option<WorkflowId> {
        self.stage_index.get(stage_id).copied()
    }

    pub fn workflow_for_milestone(&self, milestone_id: &MilestoneId) -> Option<WorkflowId> {
        self.milestone_index.get(milestone_id).copied()
    }
}
