// Core workflow types and data structures for the procurement engine
//
// This module defines the entities owned by the workflow engine: workflows,
// their ordered stages and the milestone checklists inside each stage.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::template::TemplateId;

/// Unique identifier for a workflow instance
pub type WorkflowId = Uuid;

/// Unique identifier for a stage
pub type StageId = Uuid;

/// Unique identifier for a milestone
pub type MilestoneId = Uuid;

/// Reference to the owning evaluation project
pub type ProjectId = String;

/// Reference to the vendor being onboarded
pub type VendorId = String;

/// A person acting on a workflow, either as its owner or as the performer of a change
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Actor {
    /// Stable user identifier
    pub id: String,
    /// Display name shown in the activity log
    pub name: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Lifecycle status of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    NotStarted,
    InProgress,
    Blocked,
    Completed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn all() -> &'static [WorkflowStatus] {
        &[
            WorkflowStatus::NotStarted,
            WorkflowStatus::InProgress,
            WorkflowStatus::Blocked,
            WorkflowStatus::Completed,
            WorkflowStatus::Cancelled,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::NotStarted => "not_started",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Blocked => "blocked",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Cancelled)
    }
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        WorkflowStatus::NotStarted
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Blocked,
    Completed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Blocked => "blocked",
            StageStatus::Completed => "completed",
            StageStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Skipped)
    }

    /// The stage currently holding the workflow's single active slot
    pub fn is_active(&self) -> bool {
        matches!(self, StageStatus::InProgress | StageStatus::Blocked)
    }
}

impl Default for StageStatus {
    fn default() -> Self {
        StageStatus::Pending
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Milestone status; milestones are never blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
}

impl MilestoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneStatus::Pending => "pending",
            MilestoneStatus::InProgress => "in_progress",
            MilestoneStatus::Completed => "completed",
            MilestoneStatus::Skipped => "skipped",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, MilestoneStatus::Pending | MilestoneStatus::InProgress)
    }
}

impl Default for MilestoneStatus {
    fn default() -> Self {
        MilestoneStatus::Pending
    }
}

impl std::fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One vendor's procurement workflow for one evaluation project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub project_id: ProjectId,
    pub vendor_id: VendorId,
    /// Template the workflow was copied from, if any
    pub template_id: Option<TemplateId>,
    pub name: String,
    pub description: Option<String>,
    pub status: WorkflowStatus,
    pub planned_start_date: Option<NaiveDate>,
    pub planned_end_date: Option<NaiveDate>,
    pub actual_start_date: Option<DateTime<Utc>>,
    pub actual_end_date: Option<DateTime<Utc>>,
    pub owner: Option<Actor>,
    pub notes: Option<String>,
    pub blocked_reason: Option<String>,
    pub blocked_since: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped on every committed mutation
    #[serde(default)]
    pub version: u64,
}

impl Workflow {
    /// A live workflow occupies its (project, vendor) slot
    pub fn is_live(&self) -> bool {
        self.status != WorkflowStatus::Cancelled
    }
}

/// An ordered phase of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub workflow_id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    /// 1-based position, contiguous within the workflow
    pub order: u32,
    pub target_days: Option<u32>,
    pub planned_start_date: Option<NaiveDate>,
    pub planned_end_date: Option<NaiveDate>,
    pub actual_start_date: Option<DateTime<Utc>>,
    pub actual_end_date: Option<DateTime<Utc>>,
    pub status: StageStatus,
    pub owner: Option<Actor>,
    pub blocked_reason: Option<String>,
    pub blocked_since: Option<DateTime<Utc>>,
    pub completion_notes: Option<String>,
}

/// A checklist item within a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: MilestoneId,
    pub stage_id: StageId,
    pub name: String,
    pub order: u32,
    pub status: MilestoneStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<Actor>,
    pub completion_notes: Option<String>,
}

/// A stage together with its milestones, ordered by `order`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDetail {
    pub stage: Stage,
    pub milestones: Vec<Milestone>,
}

impl StageDetail {
    pub fn open_milestones(&self) -> impl Iterator<Item = &Milestone> {
        self.milestones.iter().filter(|m| m.status.is_open())
    }
}

/// The workflow aggregate: the unit the store reads and commits atomically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDetail {
    pub workflow: Workflow,
    pub stages: Vec<StageDetail>,
}

impl WorkflowDetail {
    pub fn id(&self) -> WorkflowId {
        self.workflow.id
    }

    /// Fraction of stages completed (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.stages.is_empty() {
            return 0.0;
        }

        let completed = self
            .stages
            .iter()
            .filter(|s| s.stage.status == StageStatus::Completed)
            .count();

        completed as f64 / self.stages.len() as f64
    }

    /// The stage currently in progress or blocked, if any
    pub fn current_stage(&self) -> Option<&StageDetail> {
        self.stages.iter().find(|s| s.stage.status.is_active())
    }

    pub fn stage_index(&self, stage_id: &StageId) -> Option<usize> {
        self.stages.iter().position(|s| &s.stage.id == stage_id)
    }

    /// Locate a milestone as (stage index, milestone index)
    pub fn milestone_position(&self, milestone_id: &MilestoneId) -> Option<(usize, usize)> {
        self.stages.iter().enumerate().find_map(|(si, stage)| {
            stage
                .milestones
                .iter()
                .position(|m| &m.id == milestone_id)
                .map(|mi| (si, mi))
        })
    }

    pub fn stage_statuses(&self) -> Vec<StageStatus> {
        self.stages.iter().map(|s| s.stage.status).collect()
    }

    pub fn active_stage_count(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.stage.status.is_active())
            .count()
    }

    /// Stage orders form the contiguous sequence 1..=N
    pub fn has_contiguous_orders(&self) -> bool {
        self.stages
            .iter()
            .enumerate()
            .all(|(i, s)| s.stage.order as usize == i + 1)
    }
}
