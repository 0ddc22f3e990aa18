// Parameter records for engine operations
//
// Each operation takes its own record. Unknown fields are rejected when a
// record is deserialized from an API payload.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::WorkflowError;
use super::types::{Actor, ProjectId, VendorId};
use crate::template::TemplateId;
use crate::utils::serde_helpers::non_blank;

/// Inline stage definition used by custom instantiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StagePlan {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Target duration in days; signed so negative input can be rejected
    #[serde(default)]
    pub target_days: Option<i64>,
    #[serde(default)]
    pub milestones: Vec<String>,
}

impl StagePlan {
    pub fn new(name: impl Into<String>, target_days: Option<i64>) -> Self {
        Self {
            name: name.into(),
            description: None,
            target_days,
            milestones: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_milestones<I, S>(mut self, milestones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.milestones = milestones.into_iter().map(Into::into).collect();
        self
    }
}

/// Validate a stage list and return the durations the scheduler consumes
pub fn validate_stage_plans(plans: &[StagePlan]) -> Result<Vec<Option<u32>>, WorkflowError> {
    if plans.is_empty() {
        return Err(WorkflowError::Validation(
            "a workflow needs at least one stage".to_string(),
        ));
    }

    plans
        .iter()
        .enumerate()
        .map(|(i, plan)| {
            let position = i + 1;
            if plan.name.trim().is_empty() {
                return Err(WorkflowError::Validation(format!(
                    "stage {} has an empty name",
                    position
                )));
            }

            if plan.milestones.iter().any(|m| m.trim().is_empty()) {
                return Err(WorkflowError::Validation(format!(
                    "stage '{}' has an empty milestone name",
                    plan.name
                )));
            }

            match plan.target_days {
                None => Ok(None),
                Some(days) if days < 0 => Err(WorkflowError::Validation(format!(
                    "stage '{}' has a negative duration ({} days)",
                    plan.name, days
                ))),
                Some(days) => u32::try_from(days).map(Some).map_err(|_| {
                    WorkflowError::Validation(format!(
                        "stage '{}' duration of {} days is out of range",
                        plan.name, days
                    ))
                }),
            }
        })
        .collect()
}

/// Instantiate a workflow from a catalogue template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateFromTemplate {
    pub project_id: ProjectId,
    pub vendor_id: VendorId,
    pub template_id: TemplateId,
    pub planned_start: NaiveDate,
    pub owner: Actor,
    /// Overrides the template name
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreateFromTemplate {
    pub fn new(
        project_id: impl Into<ProjectId>,
        vendor_id: impl Into<VendorId>,
        template_id: impl Into<TemplateId>,
        planned_start: NaiveDate,
        owner: Actor,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            vendor_id: vendor_id.into(),
            template_id: template_id.into(),
            planned_start,
            owner,
            name: None,
            description: None,
            notes: None,
        }
    }
}

/// Instantiate a workflow from an inline stage list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCustom {
    pub project_id: ProjectId,
    pub vendor_id: VendorId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub planned_start: NaiveDate,
    pub owner: Actor,
    #[serde(default)]
    pub notes: Option<String>,
    pub stages: Vec<StagePlan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockParams {
    pub reason: String,
}

impl BlockParams {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The trimmed reason; blank reasons are rejected
    pub fn validated_reason(&self) -> Result<String, WorkflowError> {
        non_blank(Some(self.reason.clone()))
            .ok_or_else(|| WorkflowError::Validation("a block reason is required".to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CancelParams {
    #[serde(default)]
    pub reason: Option<String>,
}

impl CancelParams {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompleteParams {
    #[serde(default)]
    pub notes: Option<String>,
}

impl CompleteParams {
    pub fn with_notes(notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkipParams {
    #[serde(default)]
    pub reason: Option<String>,
}

impl SkipParams {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReassignOwnerParams {
    pub owner: Actor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateNotesParams {
    /// New notes; `None` or blank clears them
    #[serde(default)]
    pub notes: Option<String>,
}
