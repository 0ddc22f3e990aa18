// Workflow instantiation
//
// Turns a validated stage list into a fresh `not_started` aggregate with
// scheduled stage windows and pending milestones.

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::error::WorkflowError;
use super::params::{validate_stage_plans, CreateCustom, CreateFromTemplate, StagePlan};
use super::schedule::{overall_end, schedule_stages};
use super::types::*;
use crate::template::{TemplateId, WorkflowTemplate};
use crate::utils::serde_helpers::non_blank;

/// Everything needed to build a new workflow aggregate
#[derive(Debug, Clone)]
pub struct WorkflowDraft {
    pub project_id: ProjectId,
    pub vendor_id: VendorId,
    pub template_id: Option<TemplateId>,
    pub name: String,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub planned_start: NaiveDate,
    pub owner: Actor,
    pub stages: Vec<StagePlan>,
}

impl WorkflowDraft {
    /// Draft copied from a template; the template itself is not referenced afterwards
    pub fn from_template(params: CreateFromTemplate, template: &WorkflowTemplate) -> Result<Self, WorkflowError> {
        Ok(Self {
            project_id: params.project_id,
            vendor_id: params.vendor_id,
            template_id: Some(template.id.clone()),
            name: params.name.unwrap_or_else(|| template.name.clone()),
            description: params.description.or_else(|| non_blank(Some(template.description.clone()))),
            notes: params.notes,
            planned_start: params.planned_start,
            owner: params.owner,
            stages: template.stage_plans()?,
        })
    }

    pub fn custom(params: CreateCustom) -> Self {
        Self {
            project_id: params.project_id,
            vendor_id: params.vendor_id,
            template_id: None,
            name: params.name,
            description: params.description,
            notes: params.notes,
            planned_start: params.planned_start,
            owner: params.owner,
            stages: params.stages,
        }
    }

    /// Validate the draft and build the aggregate
    pub fn build(self, now: DateTime<Utc>) -> Result<WorkflowDetail, WorkflowError> {
        let project_id = required("project_id", &self.project_id)?;
        let vendor_id = required("vendor_id", &self.vendor_id)?;
        let name = required("name", &self.name)?;

        let durations = validate_stage_plans(&self.stages)?;
        let windows = schedule_stages(self.planned_start, &durations)?;
        let workflow_id = Uuid::new_v4();

        let stages = self
            .stages
            .into_iter()
            .zip(durations)
            .zip(windows.iter())
            .enumerate()
            .map(|(i, ((plan, target_days), window))| {
                let stage_id = Uuid::new_v4();
                let milestones = plan
                    .milestones
                    .iter()
                    .enumerate()
                    .map(|(j, milestone)| Milestone {
                        id: Uuid::new_v4(),
                        stage_id,
                        name: milestone.trim().to_string(),
                        order: j as u32 + 1,
                        status: MilestoneStatus::Pending,
                        completed_at: None,
                        completed_by: None,
                        completion_notes: None,
                    })
                    .collect();

                StageDetail {
                    stage: Stage {
                        id: stage_id,
                        workflow_id,
                        name: plan.name.trim().to_string(),
                        description: non_blank(plan.description),
                        order: i as u32 + 1,
                        target_days,
                        planned_start_date: Some(window.start),
                        planned_end_date: window.end,
                        actual_start_date: None,
                        actual_end_date: None,
                        status: StageStatus::Pending,
                        owner: None,
                        blocked_reason: None,
                        blocked_since: None,
                        completion_notes: None,
                    },
                    milestones,
                }
            })
            .collect();

        Ok(WorkflowDetail {
            workflow: Workflow {
                id: workflow_id,
                project_id,
                vendor_id,
                template_id: self.template_id,
                name,
                description: non_blank(self.description),
                status: WorkflowStatus::NotStarted,
                planned_start_date: Some(self.planned_start),
                planned_end_date: overall_end(&windows),
                actual_start_date: None,
                actual_end_date: None,
                owner: Some(self.owner),
                notes: non_blank(self.notes),
                blocked_reason: None,
                blocked_since: None,
                created_at: now,
                updated_at: now,
                version: 0,
            },
            stages,
        })
    }
}

fn required(field: &str, value: &str) -> Result<String, WorkflowError> {
    non_blank(Some(value.to_string()))
        .ok_or_else(|| WorkflowError::Validation(format!("{} cannot be empty", field)))
}
