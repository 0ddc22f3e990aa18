// State transition tables for workflows, stages and milestones
//
// Every legal move is a row: (current status, action) -> next status plus the
// effects the engine applies alongside it. Nothing in this module touches
// persistence, so the cascade can be exercised on plain status slices.

use super::types::{MilestoneStatus, StageStatus, WorkflowStatus};

/// Caller-facing actions on a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowAction {
    Start,
    Block,
    Unblock,
    Complete,
    Cancel,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowAction::Start => "start",
            WorkflowAction::Block => "block",
            WorkflowAction::Unblock => "unblock",
            WorkflowAction::Complete => "complete",
            WorkflowAction::Cancel => "cancel",
        }
    }
}

/// Actions on a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageAction {
    Start,
    Complete,
    Skip,
    Block,
    Unblock,
}

impl StageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageAction::Start => "start",
            StageAction::Complete => "complete",
            StageAction::Skip => "skip",
            StageAction::Block => "block",
            StageAction::Unblock => "unblock",
        }
    }
}

/// Actions on a milestone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneAction {
    Complete,
    Skip,
}

impl MilestoneAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneAction::Complete => "complete",
            MilestoneAction::Skip => "skip",
        }
    }
}

/// Side effects attached to a transition row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Stamp `actual_start_date`
    StampStart,
    /// Stamp `actual_end_date`
    StampEnd,
    /// Record `blocked_reason` and `blocked_since`
    RecordBlock,
    /// Clear `blocked_reason` and `blocked_since`
    ClearBlock,
    /// Start the first pending stage of the workflow
    StartFirstStage,
    /// Run the cascade past the stage that just finished
    Advance,
    /// Complete the workflow if all stages finished while it was blocked
    ResumeDeferredCompletion,
    /// Publish a domain event for the notification collaborator
    Notify,
}

/// Resolved row of a transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step<S> {
    pub next: S,
    pub effects: &'static [Effect],
}

impl<S> Step<S> {
    pub fn has(&self, effect: Effect) -> bool {
        self.effects.contains(&effect)
    }
}

/// Workflow transition table
pub fn workflow_step(from: WorkflowStatus, action: WorkflowAction) -> Option<Step<WorkflowStatus>> {
    use WorkflowAction as A;
    use WorkflowStatus as S;

    let step = match (from, action) {
        (S::NotStarted, A::Start) => Step {
            next: S::InProgress,
            effects: &[Effect::StampStart, Effect::StartFirstStage],
        },
        (S::InProgress, A::Block) => Step {
            next: S::Blocked,
            effects: &[Effect::RecordBlock, Effect::Notify],
        },
        (S::Blocked, A::Unblock) => Step {
            next: S::InProgress,
            effects: &[Effect::ClearBlock, Effect::ResumeDeferredCompletion],
        },
        (S::InProgress, A::Complete) => Step {
            next: S::Completed,
            effects: &[Effect::StampEnd, Effect::Notify],
        },
        (S::NotStarted | S::InProgress | S::Blocked, A::Cancel) => Step {
            next: S::Cancelled,
            effects: &[Effect::ClearBlock],
        },
        _ => return None,
    };

    Some(step)
}

/// Stage transition table
pub fn stage_step(from: StageStatus, action: StageAction) -> Option<Step<StageStatus>> {
    use StageAction as A;
    use StageStatus as S;

    let step = match (from, action) {
        (S::Pending, A::Start) => Step {
            next: S::InProgress,
            effects: &[Effect::StampStart],
        },
        (S::InProgress, A::Complete) => Step {
            next: S::Completed,
            effects: &[Effect::StampEnd, Effect::Advance],
        },
        (S::InProgress, A::Skip) => Step {
            next: S::Skipped,
            effects: &[Effect::StampEnd, Effect::Advance],
        },
        (S::Pending, A::Skip) => Step {
            next: S::Skipped,
            effects: &[Effect::Advance],
        },
        (S::InProgress, A::Block) => Step {
            next: S::Blocked,
            effects: &[Effect::RecordBlock, Effect::Notify],
        },
        (S::Blocked, A::Unblock) => Step {
            next: S::InProgress,
            effects: &[Effect::ClearBlock],
        },
        _ => return None,
    };

    Some(step)
}

/// Milestone transition table
pub fn milestone_step(from: MilestoneStatus, action: MilestoneAction) -> Option<MilestoneStatus> {
    match (from, action) {
        (MilestoneStatus::Pending | MilestoneStatus::InProgress, MilestoneAction::Complete) => {
            Some(MilestoneStatus::Completed)
        }
        (MilestoneStatus::Pending | MilestoneStatus::InProgress, MilestoneAction::Skip) => {
            Some(MilestoneStatus::Skipped)
        }
        _ => None,
    }
}

/// Outcome of the cascade once a stage has reached a terminal status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Start the stage at this index
    StartStage(usize),
    /// Every stage is terminal and the workflow is in progress
    CompleteWorkflow,
    /// Every stage is terminal but the workflow is blocked; completes on unblock
    DeferCompletion,
    /// Another stage still holds the active slot, or earlier stages remain open
    Hold,
}

/// Plan the cascade after the stage at `finished` became terminal.
///
/// `stages` must already reflect the finished stage's new status.
pub fn plan_advance(stages: &[StageStatus], finished: usize, workflow: WorkflowStatus) -> Advance {
    if stages.iter().any(|s| s.is_active()) {
        return Advance::Hold;
    }

    let next = stages
        .iter()
        .enumerate()
        .skip(finished + 1)
        .find(|(_, s)| **s == StageStatus::Pending)
        .map(|(i, _)| i);

    if let Some(index) = next {
        return Advance::StartStage(index);
    }

    if stages.iter().all(|s| s.is_terminal()) {
        return match workflow {
            WorkflowStatus::InProgress => Advance::CompleteWorkflow,
            _ => Advance::DeferCompletion,
        };
    }

    Advance::Hold
}

/// Index of the first stage a workflow start should activate
pub fn first_pending(stages: &[StageStatus]) -> Option<usize> {
    stages.iter().position(|s| *s == StageStatus::Pending)
}
