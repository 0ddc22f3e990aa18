// Dashboard statistics types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::{MilestoneId, MilestoneStatus, StageId, VendorId, WorkflowId, WorkflowStatus};

/// Workflow counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub not_started: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn increment(&mut self, status: WorkflowStatus) {
        *self.slot(status) += 1;
    }

    pub fn get(&self, status: WorkflowStatus) -> usize {
        match status {
            WorkflowStatus::NotStarted => self.not_started,
            WorkflowStatus::InProgress => self.in_progress,
            WorkflowStatus::Blocked => self.blocked,
            WorkflowStatus::Completed => self.completed,
            WorkflowStatus::Cancelled => self.cancelled,
        }
    }

    fn slot(&mut self, status: WorkflowStatus) -> &mut usize {
        match status {
            WorkflowStatus::NotStarted => &mut self.not_started,
            WorkflowStatus::InProgress => &mut self.in_progress,
            WorkflowStatus::Blocked => &mut self.blocked,
            WorkflowStatus::Completed => &mut self.completed,
            WorkflowStatus::Cancelled => &mut self.cancelled,
        }
    }
}

/// An open milestone of a workflow's in-progress stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcomingMilestone {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub vendor_id: VendorId,
    pub stage_id: StageId,
    pub stage_name: String,
    pub milestone_id: MilestoneId,
    pub milestone_name: String,
    pub status: MilestoneStatus,
    pub order: u32,
    /// Planned end of the owning stage
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub project_id: Option<String>,
    pub total: usize,
    pub by_status: StatusCounts,
    pub overdue: usize,
    pub at_risk: usize,
    pub completed_this_week: usize,
    pub upcoming_milestones: Vec<UpcomingMilestone>,
    pub generated_at: DateTime<Utc>,
}

impl DashboardStats {
    /// Zeroed statistics
    pub fn empty(generated_at: DateTime<Utc>) -> Self {
        Self {
            project_id: None,
            total: 0,
            by_status: StatusCounts::default(),
            overdue: 0,
            at_risk: 0,
            completed_this_week: 0,
            upcoming_milestones: Vec::new(),
            generated_at,
        }
    }
}
