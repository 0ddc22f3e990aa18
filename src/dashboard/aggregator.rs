// Dashboard aggregation over a set of workflow aggregates
//
// Pure function of its inputs: the caller passes "now", so the result is
// deterministic and never touches the store.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::cmp::Ordering;

use super::types::{DashboardStats, UpcomingMilestone};
use crate::config::DashboardConfig;
use crate::workflow::{StageStatus, WorkflowDetail, WorkflowStatus};

pub fn summarize(workflows: &[WorkflowDetail], now: DateTime<Utc>, config: &DashboardConfig) -> DashboardStats {
    let mut stats = DashboardStats::empty(now);
    let today = now.date_naive();
    // Out-of-range windows saturate at the ends of the calendar
    let risk_horizon = Duration::try_days(config.at_risk_window_days)
        .and_then(|window| today.checked_add_signed(window))
        .unwrap_or(NaiveDate::MAX);
    let recent_cutoff = Duration::try_days(config.recent_completion_days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    for detail in workflows {
        let workflow = &detail.workflow;
        stats.total += 1;
        stats.by_status.increment(workflow.status);

        if !workflow.status.is_terminal() {
            if let Some(planned_end) = workflow.planned_end_date {
                if planned_end < today {
                    stats.overdue += 1;
                } else if planned_end <= risk_horizon
                    && detail.progress() < config.at_risk_progress_threshold
                {
                    stats.at_risk += 1;
                }
            }

            collect_upcoming(detail, &mut stats.upcoming_milestones);
        }

        if workflow.status == WorkflowStatus::Completed {
            if let Some(actual_end) = workflow.actual_end_date {
                if actual_end >= recent_cutoff && actual_end <= now {
                    stats.completed_this_week += 1;
                }
            }
        }
    }

    stats.upcoming_milestones.sort_by(compare_upcoming);
    stats.upcoming_milestones.truncate(config.upcoming_milestone_limit);
    stats
}

fn collect_upcoming(detail: &WorkflowDetail, out: &mut Vec<UpcomingMilestone>) {
    let Some(stage) = detail
        .stages
        .iter()
        .find(|s| s.stage.status == StageStatus::InProgress)
    else {
        return;
    };

    out.extend(stage.open_milestones().map(|m| UpcomingMilestone {
        workflow_id: detail.workflow.id,
        workflow_name: detail.workflow.name.clone(),
        vendor_id: detail.workflow.vendor_id.clone(),
        stage_id: stage.stage.id,
        stage_name: stage.stage.name.clone(),
        milestone_id: m.id,
        milestone_name: m.name.clone(),
        status: m.status,
        order: m.order,
        due_date: stage.stage.planned_end_date,
    }));
}

/// Earliest due date first, undated last, then by workflow and milestone order
fn compare_upcoming(a: &UpcomingMilestone, b: &UpcomingMilestone) -> Ordering {
    let by_due = match (a.due_date, b.due_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_due
        .then_with(|| a.workflow_name.cmp(&b.workflow_name))
        .then_with(|| a.order.cmp(&b.order))
}
