// Activity log entry types
//
// Entries are append-only. Each one names the performer, the subject
// (workflow, stage or milestone) and, for field edits, the old and new value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{Actor, MilestoneId, StageId, WorkflowId};

/// One variant per mutating engine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    WorkflowCreated,
    WorkflowStarted,
    WorkflowBlocked,
    WorkflowUnblocked,
    WorkflowCompleted,
    WorkflowCancelled,
    WorkflowOwnerChanged,
    WorkflowNotesUpdated,
    StageStarted,
    StageCompleted,
    StageSkipped,
    StageBlocked,
    StageUnblocked,
    StageOwnerChanged,
    MilestoneCompleted,
    MilestoneSkipped,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::WorkflowCreated => "workflow_created",
            ActivityType::WorkflowStarted => "workflow_started",
            ActivityType::WorkflowBlocked => "workflow_blocked",
            ActivityType::WorkflowUnblocked => "workflow_unblocked",
            ActivityType::WorkflowCompleted => "workflow_completed",
            ActivityType::WorkflowCancelled => "workflow_cancelled",
            ActivityType::WorkflowOwnerChanged => "workflow_owner_changed",
            ActivityType::WorkflowNotesUpdated => "workflow_notes_updated",
            ActivityType::StageStarted => "stage_started",
            ActivityType::StageCompleted => "stage_completed",
            ActivityType::StageSkipped => "stage_skipped",
            ActivityType::StageBlocked => "stage_blocked",
            ActivityType::StageUnblocked => "stage_unblocked",
            ActivityType::StageOwnerChanged => "stage_owner_changed",
            ActivityType::MilestoneCompleted => "milestone_completed",
            ActivityType::MilestoneSkipped => "milestone_skipped",
        }
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: Uuid,
    pub workflow_id: Option<WorkflowId>,
    pub stage_id: Option<StageId>,
    pub milestone_id: Option<MilestoneId>,
    pub activity_type: ActivityType,
    pub description: String,
    /// Name of the edited field, for field-level changes
    pub field: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub performed_by: Actor,
    pub created_at: DateTime<Utc>,
}

impl ActivityLogEntry {
    pub fn new(activity_type: ActivityType, performed_by: Actor, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: None,
            stage_id: None,
            milestone_id: None,
            activity_type,
            description: description.into(),
            field: None,
            old_value: None,
            new_value: None,
            performed_by,
            created_at: Utc::now(),
        }
    }

    pub fn for_workflow(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    pub fn for_stage(mut self, stage_id: StageId) -> Self {
        self.stage_id = Some(stage_id);
        self
    }

    pub fn for_milestone(mut self, milestone_id: MilestoneId) -> Self {
        self.milestone_id = Some(milestone_id);
        self
    }

    /// Record a field change as an (old, new) pair
    pub fn with_change(
        mut self,
        field: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        self.field = Some(field.into());
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Whether the audit entries of an operation reached the activity log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditStatus {
    Recorded,
    /// The transition was persisted but `pending` entries are still waiting
    /// in the backlog
    Degraded { pending: usize, error: String },
}

impl AuditStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, AuditStatus::Degraded { .. })
    }
}
