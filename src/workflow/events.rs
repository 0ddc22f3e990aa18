// Domain events published for the notification collaborator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Actor, ProjectId, StageId, VendorId, WorkflowId};

/// Events the engine publishes; delivery and preferences are decided downstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    WorkflowBlocked {
        workflow_id: WorkflowId,
        project_id: ProjectId,
        vendor_id: VendorId,
        reason: String,
        blocked_by: Actor,
        at: DateTime<Utc>,
    },
    StageBlocked {
        workflow_id: WorkflowId,
        stage_id: StageId,
        stage_name: String,
        reason: String,
        blocked_by: Actor,
        at: DateTime<Utc>,
    },
    WorkflowCompleted {
        workflow_id: WorkflowId,
        project_id: ProjectId,
        vendor_id: VendorId,
        at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn workflow_id(&self) -> WorkflowId {
        match self {
            DomainEvent::WorkflowBlocked { workflow_id, .. }
            | DomainEvent::StageBlocked { workflow_id, .. }
            | DomainEvent::WorkflowCompleted { workflow_id, .. } => *workflow_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::WorkflowBlocked { .. } => "workflow_blocked",
            DomainEvent::StageBlocked { .. } => "stage_blocked",
            DomainEvent::WorkflowCompleted { .. } => "workflow_completed",
        }
    }
}
