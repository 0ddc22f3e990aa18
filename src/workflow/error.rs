// Error taxonomy for workflow engine operations

use thiserror::Error;

use super::types::WorkflowId;
use crate::store::StoreError;

/// Kind of entity an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Template,
    Workflow,
    Stage,
    Milestone,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Template => write!(f, "template"),
            EntityKind::Workflow => write!(f, "workflow"),
            EntityKind::Stage => write!(f, "stage"),
            EntityKind::Milestone => write!(f, "milestone"),
        }
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(" ({})", d))
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Cannot {action} {entity} {id} in status '{status}'{}", detail_suffix(.detail))]
    InvalidTransition {
        entity: EntityKind,
        id: String,
        action: &'static str,
        status: String,
        detail: Option<String>,
    },

    #[error("A live workflow ({existing}) already exists for project '{project_id}' and vendor '{vendor_id}'")]
    DuplicateWorkflow {
        project_id: String,
        vendor_id: String,
        existing: WorkflowId,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Workflow {workflow_id} was modified concurrently; gave up after {attempts} attempt(s)")]
    ConcurrencyConflict { workflow_id: WorkflowId, attempts: u32 },

    #[error("Storage error: {0}")]
    Storage(#[source] StoreError),
}

impl WorkflowError {
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        WorkflowError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkflowError::NotFound { .. })
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, WorkflowError::InvalidTransition { .. })
    }
}

impl From<StoreError> for WorkflowError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::WorkflowNotFound(id) => WorkflowError::not_found(EntityKind::Workflow, id),
            StoreError::DuplicateLive {
                project_id,
                vendor_id,
                existing,
            } => WorkflowError::DuplicateWorkflow {
                project_id,
                vendor_id,
                existing,
            },
            StoreError::VersionConflict { workflow_id, .. } => WorkflowError::ConcurrencyConflict {
                workflow_id,
                attempts: 1,
            },
            other => WorkflowError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_invalid_transition_message() {
        let err = WorkflowError::InvalidTransition {
            entity: EntityKind::Stage,
            id: "s-1".to_string(),
            action: "complete",
            status: "completed".to_string(),
            detail: None,
        };
        assert_eq!(err.to_string(), "Cannot complete stage s-1 in status 'completed'");

        let err = WorkflowError::InvalidTransition {
            entity: EntityKind::Stage,
            id: "s-2".to_string(),
            action: "start",
            status: "pending".to_string(),
            detail: Some("stage 1 is still active".to_string()),
        };
        assert!(err.to_string().ends_with("(stage 1 is still active)"));
    }

    #[test]
    fn test_store_error_mapping() {
        let id = Uuid::new_v4();
        let err: WorkflowError = StoreError::VersionConflict {
            workflow_id: id,
            expected: 1,
            found: 2,
        }
        .into();
        assert!(matches!(err, WorkflowError::ConcurrencyConflict { workflow_id, .. } if workflow_id == id));

        let err: WorkflowError = StoreError::WorkflowNotFound(id).into();
        assert!(err.is_not_found());

        let err: WorkflowError = StoreError::Unavailable("disk offline".to_string()).into();
        assert!(matches!(err, WorkflowError::Storage(_)));
    }
}
