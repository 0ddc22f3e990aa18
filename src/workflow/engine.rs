// Workflow engine for procurement workflows
//
// Owns every workflow, stage and milestone transition. Each mutation runs
// under a per-workflow lock as a read-modify-commit cycle against the store;
// the commit is guarded by the aggregate version and retried on conflict.
// Audit entries and domain events are emitted only after a successful commit.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::error::{EntityKind, WorkflowError};
use super::events::DomainEvent;
use super::instantiate::WorkflowDraft;
use super::params::*;
use super::transition::*;
use super::types::*;
use crate::activity::{ActivityLog, ActivityLogEntry, ActivityType, AuditRecorder, AuditStatus};
use crate::config::{DashboardConfig, EngineConfig, RetryPolicy};
use crate::dashboard::{summarize, DashboardStats};
use crate::store::{StoreError, WorkflowStore};
use crate::template::{TemplateStore, WorkflowTemplate};
use crate::utils::serde_helpers::non_blank;

/// Result of a successful engine operation
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// The aggregate as committed
    pub workflow: WorkflowDetail,
    /// Whether the audit entries reached the activity log
    pub audit: AuditStatus,
    /// Soft policy warnings (the operation still succeeded)
    pub warnings: Vec<String>,
}

/// Side products of one mutation, released after the commit
#[derive(Debug, Default)]
struct Change {
    entries: Vec<ActivityLogEntry>,
    events: Vec<DomainEvent>,
    warnings: Vec<String>,
}

impl Change {
    fn entry(mut self, entry: ActivityLogEntry) -> Self {
        self.entries.push(entry);
        self
    }
}

/// What the cascade did after a stage became terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cascade {
    StartedStage(usize),
    CompletedWorkflow,
    Deferred,
    Held,
}

pub struct WorkflowEngine {
    templates: Arc<dyn TemplateStore>,
    store: Arc<dyn WorkflowStore>,
    audit: AuditRecorder,
    conflict_retry: RetryPolicy,
    dashboard: DashboardConfig,
    /// One async mutex per workflow with in-flight mutations
    locks: Mutex<HashMap<WorkflowId, Arc<Mutex<()>>>>,
    /// Serializes the live-pair check and insert of new workflows
    creation_lock: Mutex<()>,
    event_sender: Option<mpsc::UnboundedSender<DomainEvent>>,
}

impl WorkflowEngine {
    /// Create an engine over the given template store, workflow store and activity log
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        store: Arc<dyn WorkflowStore>,
        activity_log: Arc<dyn ActivityLog>,
    ) -> Self {
        debug!("Initializing workflow engine");

        Self {
            templates,
            store,
            audit: AuditRecorder::new(activity_log, RetryPolicy::default()),
            conflict_retry: RetryPolicy::default(),
            dashboard: DashboardConfig::default(),
            locks: Mutex::new(HashMap::new()),
            creation_lock: Mutex::new(()),
            event_sender: None,
        }
    }

    /// Apply retry policies and dashboard thresholds from the configuration
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.conflict_retry = config.conflict_retry.clone();
        self.audit.set_retry(config.audit_retry.clone());
        self.dashboard = config.dashboard.clone();
        self
    }

    /// Publish domain events on a channel
    pub fn with_event_channel(mut self) -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.event_sender = Some(sender);
        (self, receiver)
    }

    // ----- instantiation -------------------------------------------------

    /// Instantiate a `not_started` workflow from a catalogue template
    pub async fn create_from_template(
        &self,
        params: CreateFromTemplate,
        actor: &Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let template = self
            .templates
            .get_template(&params.template_id)
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Template, &params.template_id))?;

        let description = format!("created from template '{}'", template.id);
        let draft = WorkflowDraft::from_template(params, &template)?;
        self.instantiate(draft, actor, description).await
    }

    /// Instantiate a `not_started` workflow from an inline stage list
    pub async fn create_custom(&self, params: CreateCustom, actor: &Actor) -> Result<TransitionOutcome, WorkflowError> {
        self.instantiate(WorkflowDraft::custom(params), actor, "created with a custom stage list".to_string())
            .await
    }

    async fn instantiate(
        &self,
        draft: WorkflowDraft,
        actor: &Actor,
        origin: String,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let detail = draft.build(Utc::now())?;

        {
            let _guard = self.creation_lock.lock().await;
            let workflow = &detail.workflow;

            if let Some(existing) = self
                .store
                .find_live_workflow(&workflow.project_id, &workflow.vendor_id)
                .await?
            {
                return Err(WorkflowError::DuplicateWorkflow {
                    project_id: workflow.project_id.clone(),
                    vendor_id: workflow.vendor_id.clone(),
                    existing: existing.id(),
                });
            }

            self.store.insert_workflow(detail.clone()).await?;
        }

        info!(
            "Created workflow {} for project '{}' and vendor '{}' ({} stages)",
            detail.workflow.id,
            detail.workflow.project_id,
            detail.workflow.vendor_id,
            detail.stages.len()
        );

        let entry = ActivityLogEntry::new(
            ActivityType::WorkflowCreated,
            actor.clone(),
            format!(
                "Workflow '{}' {} with {} stages",
                detail.workflow.name,
                origin,
                detail.stages.len()
            ),
        )
        .for_workflow(detail.workflow.id)
        .at(detail.workflow.created_at);

        let audit = self.audit.record(vec![entry]).await;
        Ok(TransitionOutcome {
            workflow: detail,
            audit,
            warnings: Vec::new(),
        })
    }

    // ----- workflow transitions ------------------------------------------

    /// Start a workflow and its first pending stage
    pub async fn start_workflow(&self, workflow_id: WorkflowId, actor: &Actor) -> Result<TransitionOutcome, WorkflowError> {
        self.mutate(workflow_id, |detail, now| {
            let step = workflow_transition(detail, WorkflowAction::Start)?;
            if detail.stages.is_empty() {
                return Err(invalid_workflow(detail, WorkflowAction::Start, Some("workflow has no stages")));
            }

            apply_workflow_step(&mut detail.workflow, &step, now, None);

            let mut description = "Workflow started".to_string();
            if step.has(Effect::StartFirstStage) {
                if let Some(index) = first_pending(&detail.stage_statuses()) {
                    start_stage_at(detail, index, now);
                    description.push_str(&format!("; stage '{}' started", detail.stages[index].stage.name));
                }
            }

            Ok(Change::default().entry(
                ActivityLogEntry::new(ActivityType::WorkflowStarted, actor.clone(), description)
                    .for_workflow(detail.workflow.id)
                    .with_change("status", Some(WorkflowStatus::NotStarted.to_string()), Some(step.next.to_string()))
                    .at(now),
            ))
        })
        .await
    }

    /// Explicitly complete an in-progress workflow; unfinished stages are left as they are
    pub async fn complete_workflow(
        &self,
        workflow_id: WorkflowId,
        params: CompleteParams,
        actor: &Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let notes = non_blank(params.notes);

        self.mutate(workflow_id, |detail, now| {
            let step = workflow_transition(detail, WorkflowAction::Complete)?;
            apply_workflow_step(&mut detail.workflow, &step, now, None);

            let mut change = Change::default();
            let unfinished = detail.stages.iter().filter(|s| !s.stage.status.is_terminal()).count();
            if unfinished > 0 {
                change.warnings.push(format!(
                    "workflow completed with {} unfinished stage(s)",
                    unfinished
                ));
            }

            let mut description = "Workflow completed".to_string();
            if let Some(notes) = &notes {
                description.push_str(&format!(": {}", notes));
            }

            change.events.push(completed_event(&detail.workflow, now));
            Ok(change.entry(
                ActivityLogEntry::new(ActivityType::WorkflowCompleted, actor.clone(), description)
                    .for_workflow(detail.workflow.id)
                    .at(now),
            ))
        })
        .await
    }

    /// Block an in-progress workflow; a non-blank reason is required
    pub async fn block_workflow(
        &self,
        workflow_id: WorkflowId,
        params: BlockParams,
        actor: &Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let reason = params.validated_reason()?;

        self.mutate(workflow_id, |detail, now| {
            let step = workflow_transition(detail, WorkflowAction::Block)?;
            apply_workflow_step(&mut detail.workflow, &step, now, Some(&reason));

            let mut change = Change::default();
            if step.has(Effect::Notify) {
                change.events.push(DomainEvent::WorkflowBlocked {
                    workflow_id: detail.workflow.id,
                    project_id: detail.workflow.project_id.clone(),
                    vendor_id: detail.workflow.vendor_id.clone(),
                    reason: reason.clone(),
                    blocked_by: actor.clone(),
                    at: now,
                });
            }

            Ok(change.entry(
                ActivityLogEntry::new(
                    ActivityType::WorkflowBlocked,
                    actor.clone(),
                    format!("Workflow blocked: {}", reason),
                )
                .for_workflow(detail.workflow.id)
                .with_change("blocked_reason", None, Some(reason.clone()))
                .at(now),
            ))
        })
        .await
    }

    /// Unblock a workflow, completing it if every stage finished while it was blocked
    pub async fn unblock_workflow(&self, workflow_id: WorkflowId, actor: &Actor) -> Result<TransitionOutcome, WorkflowError> {
        self.mutate(workflow_id, |detail, now| {
            let step = workflow_transition(detail, WorkflowAction::Unblock)?;
            let previous_reason = detail.workflow.blocked_reason.clone();
            apply_workflow_step(&mut detail.workflow, &step, now, None);

            let mut change = Change::default().entry(
                ActivityLogEntry::new(ActivityType::WorkflowUnblocked, actor.clone(), "Workflow unblocked")
                    .for_workflow(detail.workflow.id)
                    .with_change("blocked_reason", previous_reason, None)
                    .at(now),
            );

            let all_finished = !detail.stages.is_empty() && detail.stages.iter().all(|s| s.stage.status.is_terminal());
            if step.has(Effect::ResumeDeferredCompletion) && all_finished {
                complete_in_place(detail, now);
                change.events.push(completed_event(&detail.workflow, now));
                change = change.entry(
                    ActivityLogEntry::new(
                        ActivityType::WorkflowCompleted,
                        actor.clone(),
                        "Workflow completed after unblock; all stages were already finished",
                    )
                    .for_workflow(detail.workflow.id)
                    .at(now),
                );
            }

            Ok(change)
        })
        .await
    }

    /// Cancel a workflow that has not finished
    pub async fn cancel_workflow(
        &self,
        workflow_id: WorkflowId,
        params: CancelParams,
        actor: &Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let reason = non_blank(params.reason);

        self.mutate(workflow_id, |detail, now| {
            let previous = detail.workflow.status;
            let step = workflow_transition(detail, WorkflowAction::Cancel)?;
            apply_workflow_step(&mut detail.workflow, &step, now, None);

            let description = match &reason {
                Some(reason) => format!("Workflow cancelled: {}", reason),
                None => "Workflow cancelled".to_string(),
            };

            Ok(Change::default().entry(
                ActivityLogEntry::new(ActivityType::WorkflowCancelled, actor.clone(), description)
                    .for_workflow(detail.workflow.id)
                    .with_change("status", Some(previous.to_string()), Some(step.next.to_string()))
                    .at(now),
            ))
        })
        .await
    }

    /// Hand the workflow to a new owner
    pub async fn reassign_owner(
        &self,
        workflow_id: WorkflowId,
        params: ReassignOwnerParams,
        actor: &Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.mutate(workflow_id, |detail, now| {
            let previous = detail.workflow.owner.replace(params.owner.clone());

            Ok(Change::default().entry(
                ActivityLogEntry::new(
                    ActivityType::WorkflowOwnerChanged,
                    actor.clone(),
                    format!("Workflow owner changed to {}", params.owner.name),
                )
                .for_workflow(detail.workflow.id)
                .with_change("owner", previous.map(|o| o.name), Some(params.owner.name.clone()))
                .at(now),
            ))
        })
        .await
    }

    /// Replace the workflow notes; blank notes clear them
    pub async fn update_notes(
        &self,
        workflow_id: WorkflowId,
        params: UpdateNotesParams,
        actor: &Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let notes = non_blank(params.notes);

        self.mutate(workflow_id, |detail, now| {
            let previous = std::mem::replace(&mut detail.workflow.notes, notes.clone());

            Ok(Change::default().entry(
                ActivityLogEntry::new(ActivityType::WorkflowNotesUpdated, actor.clone(), "Workflow notes updated")
                    .for_workflow(detail.workflow.id)
                    .with_change("notes", previous, notes.clone())
                    .at(now),
            ))
        })
        .await
    }

    // ----- stage transitions ---------------------------------------------

    /// Manually start a pending stage; only allowed when no other stage is
    /// active and every earlier stage is finished
    pub async fn start_stage(&self, stage_id: StageId, actor: &Actor) -> Result<TransitionOutcome, WorkflowError> {
        let workflow_id = self.workflow_for_stage(&stage_id).await?;

        self.mutate(workflow_id, |detail, now| {
            let index = locate_stage(detail, &stage_id)?;
            let step = stage_transition(detail, index, StageAction::Start)?;

            if let Some(active) = detail.current_stage() {
                let reason = format!("stage '{}' is still active", active.stage.name);
                return Err(invalid_stage(detail, index, StageAction::Start, Some(reason)));
            }
            if detail.stages[..index].iter().any(|s| !s.stage.status.is_terminal()) {
                let reason = "earlier stages are not finished".to_string();
                return Err(invalid_stage(detail, index, StageAction::Start, Some(reason)));
            }

            apply_stage_step(&mut detail.stages[index].stage, &step, now, None);

            let stage = &detail.stages[index].stage;
            Ok(Change::default().entry(
                ActivityLogEntry::new(
                    ActivityType::StageStarted,
                    actor.clone(),
                    format!("Stage '{}' started", stage.name),
                )
                .for_workflow(detail.workflow.id)
                .for_stage(stage.id)
                .at(now),
            ))
        })
        .await
    }

    /// Complete an in-progress stage and run the cascade
    pub async fn complete_stage(
        &self,
        stage_id: StageId,
        params: CompleteParams,
        actor: &Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let notes = non_blank(params.notes);
        self.finish_stage(stage_id, StageAction::Complete, notes, actor).await
    }

    /// Skip a pending or in-progress stage; the cascade still advances
    pub async fn skip_stage(
        &self,
        stage_id: StageId,
        params: SkipParams,
        actor: &Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let reason = non_blank(params.reason);
        self.finish_stage(stage_id, StageAction::Skip, reason, actor).await
    }

    async fn finish_stage(
        &self,
        stage_id: StageId,
        action: StageAction,
        notes: Option<String>,
        actor: &Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let workflow_id = self.workflow_for_stage(&stage_id).await?;

        self.mutate(workflow_id, |detail, now| {
            let index = locate_stage(detail, &stage_id)?;
            let step = stage_transition(detail, index, action)?;

            let mut change = Change::default();
            let open = detail.stages[index].open_milestones().count();
            if action == StageAction::Complete && open > 0 {
                change.warnings.push(format!(
                    "stage '{}' completed with {} open milestone(s)",
                    detail.stages[index].stage.name, open
                ));
            }

            apply_stage_step(&mut detail.stages[index].stage, &step, now, None);
            detail.stages[index].stage.completion_notes = notes.clone();

            let finished_name = detail.stages[index].stage.name.clone();
            let (activity_type, verb) = match action {
                StageAction::Skip => (ActivityType::StageSkipped, "skipped"),
                _ => (ActivityType::StageCompleted, "completed"),
            };
            let mut description = format!("Stage '{}' {}", finished_name, verb);
            if let Some(notes) = &notes {
                description.push_str(&format!(": {}", notes));
            }

            let cascade = if step.has(Effect::Advance) {
                run_cascade(detail, index, now)
            } else {
                Cascade::Held
            };

            match cascade {
                Cascade::StartedStage(next) => {
                    description.push_str(&format!("; stage '{}' started", detail.stages[next].stage.name));
                }
                Cascade::Deferred => {
                    change.warnings.push(
                        "all stages finished while the workflow is blocked; completion deferred until unblock"
                            .to_string(),
                    );
                }
                Cascade::CompletedWorkflow | Cascade::Held => {}
            }

            change = change.entry(
                ActivityLogEntry::new(activity_type, actor.clone(), description)
                    .for_workflow(detail.workflow.id)
                    .for_stage(stage_id)
                    .at(now),
            );

            if cascade == Cascade::CompletedWorkflow {
                change.events.push(completed_event(&detail.workflow, now));
                change = change.entry(
                    ActivityLogEntry::new(
                        ActivityType::WorkflowCompleted,
                        actor.clone(),
                        format!("Workflow completed after final stage '{}'", finished_name),
                    )
                    .for_workflow(detail.workflow.id)
                    .at(now),
                );
            }

            Ok(change)
        })
        .await
    }

    /// Block an in-progress stage independently of the workflow
    pub async fn block_stage(
        &self,
        stage_id: StageId,
        params: BlockParams,
        actor: &Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let reason = params.validated_reason()?;
        let workflow_id = self.workflow_for_stage(&stage_id).await?;

        self.mutate(workflow_id, |detail, now| {
            let index = locate_stage(detail, &stage_id)?;
            let step = stage_transition(detail, index, StageAction::Block)?;
            apply_stage_step(&mut detail.stages[index].stage, &step, now, Some(&reason));

            let stage = &detail.stages[index].stage;
            let mut change = Change::default();
            if step.has(Effect::Notify) {
                change.events.push(DomainEvent::StageBlocked {
                    workflow_id: detail.workflow.id,
                    stage_id,
                    stage_name: stage.name.clone(),
                    reason: reason.clone(),
                    blocked_by: actor.clone(),
                    at: now,
                });
            }

            Ok(change.entry(
                ActivityLogEntry::new(
                    ActivityType::StageBlocked,
                    actor.clone(),
                    format!("Stage '{}' blocked: {}", stage.name, reason),
                )
                .for_workflow(detail.workflow.id)
                .for_stage(stage_id)
                .with_change("blocked_reason", None, Some(reason.clone()))
                .at(now),
            ))
        })
        .await
    }

    /// Return a blocked stage to in-progress
    pub async fn unblock_stage(&self, stage_id: StageId, actor: &Actor) -> Result<TransitionOutcome, WorkflowError> {
        let workflow_id = self.workflow_for_stage(&stage_id).await?;

        self.mutate(workflow_id, |detail, now| {
            let index = locate_stage(detail, &stage_id)?;
            let step = stage_transition(detail, index, StageAction::Unblock)?;
            let previous_reason = detail.stages[index].stage.blocked_reason.clone();
            apply_stage_step(&mut detail.stages[index].stage, &step, now, None);

            Ok(Change::default().entry(
                ActivityLogEntry::new(
                    ActivityType::StageUnblocked,
                    actor.clone(),
                    format!("Stage '{}' unblocked", detail.stages[index].stage.name),
                )
                .for_workflow(detail.workflow.id)
                .for_stage(stage_id)
                .with_change("blocked_reason", previous_reason, None)
                .at(now),
            ))
        })
        .await
    }

    /// Hand a stage to a new owner
    pub async fn reassign_stage_owner(
        &self,
        stage_id: StageId,
        params: ReassignOwnerParams,
        actor: &Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let workflow_id = self.workflow_for_stage(&stage_id).await?;

        self.mutate(workflow_id, |detail, now| {
            let index = locate_stage(detail, &stage_id)?;
            let stage = &mut detail.stages[index].stage;
            let previous = stage.owner.replace(params.owner.clone());

            let entry = ActivityLogEntry::new(
                ActivityType::StageOwnerChanged,
                actor.clone(),
                format!("Stage '{}' owner changed to {}", stage.name, params.owner.name),
            )
            .for_workflow(detail.workflow.id)
            .for_stage(stage_id)
            .with_change("owner", previous.map(|o| o.name), Some(params.owner.name.clone()))
            .at(now);

            Ok(Change::default().entry(entry))
        })
        .await
    }

    // ----- milestones ----------------------------------------------------

    /// Mark a milestone completed
    pub async fn complete_milestone(
        &self,
        milestone_id: MilestoneId,
        params: CompleteParams,
        actor: &Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let notes = non_blank(params.notes);
        self.close_milestone(milestone_id, MilestoneAction::Complete, notes, actor).await
    }

    /// Mark a milestone skipped; the reason is kept as its notes
    pub async fn skip_milestone(
        &self,
        milestone_id: MilestoneId,
        params: SkipParams,
        actor: &Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let reason = non_blank(params.reason);
        self.close_milestone(milestone_id, MilestoneAction::Skip, reason, actor).await
    }

    async fn close_milestone(
        &self,
        milestone_id: MilestoneId,
        action: MilestoneAction,
        notes: Option<String>,
        actor: &Actor,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let workflow_id = self
            .store
            .workflow_for_milestone(&milestone_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Milestone, milestone_id))?;

        self.mutate(workflow_id, |detail, now| {
            let (si, mi) = detail
                .milestone_position(&milestone_id)
                .ok_or_else(|| WorkflowError::not_found(EntityKind::Milestone, milestone_id))?;

            let workflow_status = detail.workflow.status;
            let stage_id = detail.stages[si].stage.id;
            let milestone = &mut detail.stages[si].milestones[mi];

            let invalid = |reason: Option<String>| WorkflowError::InvalidTransition {
                entity: EntityKind::Milestone,
                id: milestone_id.to_string(),
                action: action.as_str(),
                status: milestone.status.to_string(),
                detail: reason,
            };

            if workflow_status == WorkflowStatus::Cancelled {
                return Err(invalid(Some("workflow is cancelled".to_string())));
            }
            let next = milestone_step(milestone.status, action).ok_or_else(|| invalid(None))?;

            milestone.status = next;
            milestone.completed_at = Some(now);
            milestone.completed_by = Some(actor.clone());
            milestone.completion_notes = notes.clone();

            let (activity_type, verb) = match action {
                MilestoneAction::Complete => (ActivityType::MilestoneCompleted, "completed"),
                MilestoneAction::Skip => (ActivityType::MilestoneSkipped, "skipped"),
            };
            let mut description = format!("Milestone '{}' {}", milestone.name, verb);
            if let Some(notes) = &notes {
                description.push_str(&format!(": {}", notes));
            }

            Ok(Change::default().entry(
                ActivityLogEntry::new(activity_type, actor.clone(), description)
                    .for_workflow(detail.workflow.id)
                    .for_stage(stage_id)
                    .for_milestone(milestone_id)
                    .at(now),
            ))
        })
        .await
    }

    // ----- queries -------------------------------------------------------

    /// Load a workflow with its stages and milestones
    pub async fn get_workflow(&self, workflow_id: WorkflowId) -> Result<WorkflowDetail, WorkflowError> {
        self.store
            .get_workflow(&workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Workflow, workflow_id))
    }

    /// All workflows of a project, oldest first
    pub async fn get_workflows_for_project(&self, project_id: &str) -> Result<Vec<WorkflowDetail>, WorkflowError> {
        Ok(self.store.list_project_workflows(project_id).await?)
    }

    /// Dashboard statistics for a project as of now
    pub async fn get_dashboard(&self, project_id: &str) -> Result<DashboardStats, WorkflowError> {
        let workflows = self.store.list_project_workflows(project_id).await?;
        let mut stats = summarize(&workflows, Utc::now(), &self.dashboard);
        stats.project_id = Some(project_id.to_string());
        Ok(stats)
    }

    /// Activity for a workflow, newest first
    pub async fn get_activity_log(
        &self,
        workflow_id: WorkflowId,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityLogEntry>, WorkflowError> {
        self.get_workflow(workflow_id).await?;
        Ok(self.audit.log().entries_for_workflow(&workflow_id, limit).await?)
    }

    /// Templates available for instantiation, sorted by name
    pub fn list_templates(&self) -> Vec<WorkflowTemplate> {
        self.templates.list_templates()
    }

    /// Retry audit entries that could not be written earlier
    pub async fn flush_audit_backlog(&self) -> AuditStatus {
        self.audit.flush().await
    }

    /// Number of audit entries waiting in the backlog
    pub async fn pending_audit_entries(&self) -> usize {
        self.audit.pending().await
    }

    // ----- internals -----------------------------------------------------

    async fn workflow_for_stage(&self, stage_id: &StageId) -> Result<WorkflowId, WorkflowError> {
        self.store
            .workflow_for_stage(stage_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found(EntityKind::Stage, stage_id))
    }

    async fn workflow_lock(&self, workflow_id: WorkflowId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Entries only referenced by the map have no holders or waiters
        locks.retain(|id, lock| *id == workflow_id || Arc::strong_count(lock) > 1);
        locks.entry(workflow_id).or_default().clone()
    }

    /// Read-modify-commit under the workflow's lock, retrying version conflicts
    async fn mutate<F>(&self, workflow_id: WorkflowId, apply: F) -> Result<TransitionOutcome, WorkflowError>
    where
        F: Fn(&mut WorkflowDetail, DateTime<Utc>) -> Result<Change, WorkflowError> + Send,
    {
        let lock = self.workflow_lock(workflow_id).await;
        let _guard = lock.lock().await;

        let max_attempts = self.conflict_retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let mut detail = self.get_workflow(workflow_id).await?;
            let expected = detail.workflow.version;
            let now = Utc::now();

            let change = apply(&mut detail, now)?;
            detail.workflow.updated_at = now;

            match self.store.commit_workflow(detail.clone(), expected).await {
                Ok(version) => {
                    detail.workflow.version = version;
                    return Ok(self.publish(detail, change).await);
                }
                Err(StoreError::VersionConflict { found, .. }) if attempt < max_attempts => {
                    let delay = self.conflict_retry.delay_for(attempt);
                    warn!(
                        "Version conflict on workflow {} (expected {}, found {}); retry {}/{} in {:?}",
                        workflow_id, expected, found, attempt, max_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(StoreError::VersionConflict { .. }) => {
                    return Err(WorkflowError::ConcurrencyConflict {
                        workflow_id,
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Release events and audit entries for a committed change
    async fn publish(&self, detail: WorkflowDetail, change: Change) -> TransitionOutcome {
        for entry in &change.entries {
            info!("Workflow {}: {}", detail.workflow.id, entry.description);
        }
        for warning in &change.warnings {
            warn!("Workflow {}: {}", detail.workflow.id, warning);
        }

        if let Some(sender) = &self.event_sender {
            for event in change.events {
                debug!("Publishing {} for workflow {}", event.name(), event.workflow_id());
                if sender.send(event).is_err() {
                    debug!("Event receiver dropped");
                }
            }
        }

        let audit = self.audit.record(change.entries).await;

        TransitionOutcome {
            workflow: detail,
            audit,
            warnings: change.warnings,
        }
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("audit", &self.audit)
            .field("conflict_retry", &self.conflict_retry)
            .field("dashboard", &self.dashboard)
            .finish_non_exhaustive()
    }
}

fn workflow_transition(detail: &WorkflowDetail, action: WorkflowAction) -> Result<Step<WorkflowStatus>, WorkflowError> {
    workflow_step(detail.workflow.status, action).ok_or_else(|| invalid_workflow(detail, action, None))
}

fn invalid_workflow(detail: &WorkflowDetail, action: WorkflowAction, reason: Option<&str>) -> WorkflowError {
    WorkflowError::InvalidTransition {
        entity: EntityKind::Workflow,
        id: detail.workflow.id.to_string(),
        action: action.as_str(),
        status: detail.workflow.status.to_string(),
        detail: reason.map(str::to_string),
    }
}

/// Look up the stage row, rejecting stage work on workflows that are not running
fn stage_transition(
    detail: &WorkflowDetail,
    index: usize,
    action: StageAction,
) -> Result<Step<StageStatus>, WorkflowError> {
    let status = detail.workflow.status;
    if !matches!(status, WorkflowStatus::InProgress | WorkflowStatus::Blocked) {
        return Err(invalid_stage(detail, index, action, Some(format!("workflow is {}", status))));
    }

    stage_step(detail.stages[index].stage.status, action).ok_or_else(|| invalid_stage(detail, index, action, None))
}

fn invalid_stage(detail: &WorkflowDetail, index: usize, action: StageAction, reason: Option<String>) -> WorkflowError {
    let stage = &detail.stages[index].stage;
    WorkflowError::InvalidTransition {
        entity: EntityKind::Stage,
        id: stage.id.to_string(),
        action: action.as_str(),
        status: stage.status.to_string(),
        detail: reason,
    }
}

fn locate_stage(detail: &WorkflowDetail, stage_id: &StageId) -> Result<usize, WorkflowError> {
    detail
        .stage_index(stage_id)
        .ok_or_else(|| WorkflowError::not_found(EntityKind::Stage, stage_id))
}

fn apply_workflow_step(workflow: &mut Workflow, step: &Step<WorkflowStatus>, now: DateTime<Utc>, reason: Option<&str>) {
    workflow.status = step.next;
    for effect in step.effects {
        match effect {
            Effect::StampStart => workflow.actual_start_date = Some(now),
            Effect::StampEnd => workflow.actual_end_date = Some(now),
            Effect::RecordBlock => {
                workflow.blocked_reason = reason.map(str::to_string);
                workflow.blocked_since = Some(now);
            }
            Effect::ClearBlock => {
                workflow.blocked_reason = None;
                workflow.blocked_since = None;
            }
            // Handled by the caller
            Effect::StartFirstStage | Effect::Advance | Effect::ResumeDeferredCompletion | Effect::Notify => {}
        }
    }
}

fn apply_stage_step(stage: &mut Stage, step: &Step<StageStatus>, now: DateTime<Utc>, reason: Option<&str>) {
    stage.status = step.next;
    for effect in step.effects {
        match effect {
            Effect::StampStart => stage.actual_start_date = Some(now),
            Effect::StampEnd => stage.actual_end_date = Some(now),
            Effect::RecordBlock => {
                stage.blocked_reason = reason.map(str::to_string);
                stage.blocked_since = Some(now);
            }
            Effect::ClearBlock => {
                stage.blocked_reason = None;
                stage.blocked_since = None;
            }
            Effect::StartFirstStage | Effect::Advance | Effect::ResumeDeferredCompletion | Effect::Notify => {}
        }
    }
}

fn start_stage_at(detail: &mut WorkflowDetail, index: usize, now: DateTime<Utc>) {
    let stage = &mut detail.stages[index].stage;
    if let Some(step) = stage_step(stage.status, StageAction::Start) {
        apply_stage_step(stage, &step, now, None);
    }
}

fn complete_in_place(detail: &mut WorkflowDetail, now: DateTime<Utc>) {
    if let Some(step) = workflow_step(detail.workflow.status, WorkflowAction::Complete) {
        apply_workflow_step(&mut detail.workflow, &step, now, None);
    }
}

fn run_cascade(detail: &mut WorkflowDetail, finished: usize, now: DateTime<Utc>) -> Cascade {
    match plan_advance(&detail.stage_statuses(), finished, detail.workflow.status) {
        Advance::StartStage(next) => {
            start_stage_at(detail, next, now);
            Cascade::StartedStage(next)
        }
        Advance::CompleteWorkflow => {
            complete_in_place(detail, now);
            Cascade::CompletedWorkflow
        }
        Advance::DeferCompletion => Cascade::Deferred,
        Advance::Hold => Cascade::Held,
    }
}

fn completed_event(workflow: &Workflow, now: DateTime<Utc>) -> DomainEvent {
    DomainEvent::WorkflowCompleted {
        workflow_id: workflow.id,
        project_id: workflow.project_id.clone(),
        vendor_id: workflow.vendor_id.clone(),
        at: now,
    }
}
