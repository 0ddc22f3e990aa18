// Integration tests for the procurement workflow engine

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use procure_flow::activity::{
    ActivityLog, ActivityLogEntry, ActivityType, AuditStatus, JsonlActivityLog, MemoryActivityLog,
};
use procure_flow::config::{EngineConfig, RetryPolicy};
use procure_flow::store::{JsonFileStore, MemoryStore, StoreError, WorkflowStore};
use procure_flow::template::{TemplateCatalog, TemplateStage, TemplateStore, WorkflowTemplate};
use procure_flow::workflow::{
    Actor, CompleteParams, CreateCustom, CreateFromTemplate, MilestoneId, StageId, StagePlan, StageStatus,
    WorkflowDetail, WorkflowEngine, WorkflowError, WorkflowId, WorkflowStatus,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn buyer() -> Actor {
    Actor::new("u-buyer", "Priya Buyer")
}

fn three_stage_template() -> WorkflowTemplate {
    let stage = |order: u32, name: &str, days: i64| TemplateStage {
        name: name.to_string(),
        description: None,
        order,
        target_days: Some(days),
        milestones: vec![format!("{} approved", name)],
    };

    WorkflowTemplate {
        id: "selection-to-onboarding".to_string(),
        name: "Selection to onboarding".to_string(),
        description: "Three stage vendor process".to_string(),
        procurement_type: Some("general".to_string()),
        stages: vec![
            stage(1, "Selection", 5),
            stage(2, "Contracting", 3),
            stage(3, "Onboarding", 2),
        ],
    }
}

fn catalog() -> Arc<TemplateCatalog> {
    Arc::new(TemplateCatalog::from_templates([three_stage_template()]).unwrap())
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        conflict_retry: RetryPolicy::new(3, Duration::from_millis(1)),
        audit_retry: RetryPolicy::new(2, Duration::from_millis(1)),
        ..EngineConfig::default()
    }
}

fn memory_engine() -> (WorkflowEngine, Arc<MemoryActivityLog>) {
    let log = Arc::new(MemoryActivityLog::new());
    let engine = WorkflowEngine::new(catalog(), Arc::new(MemoryStore::new()), log.clone()).with_config(&fast_config());
    (engine, log)
}

fn create_params(vendor: &str) -> CreateFromTemplate {
    CreateFromTemplate::new("P", vendor, "selection-to-onboarding", date(2026, 1, 1), buyer())
}

fn assert_invariants(detail: &WorkflowDetail) {
    assert!(detail.active_stage_count() <= 1, "more than one active stage");
    assert!(detail.has_contiguous_orders(), "stage orders are not contiguous");
}

#[tokio::test]
async fn test_end_to_end_scenario() -> Result<()> {
    let (engine, log) = memory_engine();

    let created = engine.create_from_template(create_params("V"), &buyer()).await?;
    let detail = created.workflow;
    assert_eq!(detail.workflow.status, WorkflowStatus::NotStarted);
    assert_eq!(detail.stages[0].stage.planned_start_date, Some(date(2026, 1, 1)));
    assert_eq!(detail.stages[0].stage.planned_end_date, Some(date(2026, 1, 6)));
    assert_eq!(detail.stages[1].stage.planned_start_date, Some(date(2026, 1, 7)));
    assert_eq!(detail.stages[2].stage.planned_end_date, Some(date(2026, 1, 13)));

    let id = detail.id();
    let stage_ids: Vec<StageId> = detail.stages.iter().map(|s| s.stage.id).collect();

    let started = engine.start_workflow(id, &buyer()).await?.workflow;
    assert_eq!(started.workflow.status, WorkflowStatus::InProgress);
    assert_eq!(started.stages[0].stage.status, StageStatus::InProgress);
    assert_invariants(&started);

    let after_first = engine
        .complete_stage(stage_ids[0], CompleteParams::default(), &buyer())
        .await?
        .workflow;
    assert_eq!(after_first.stages[0].stage.status, StageStatus::Completed);
    assert_eq!(after_first.stages[1].stage.status, StageStatus::InProgress);
    assert!(after_first.stages[1].stage.actual_start_date.is_some());
    assert_invariants(&after_first);

    engine
        .complete_stage(stage_ids[1], CompleteParams::default(), &buyer())
        .await?;
    let outcome = engine
        .complete_stage(stage_ids[2], CompleteParams::with_notes("vendor live"), &buyer())
        .await?;
    assert_eq!(outcome.audit, AuditStatus::Recorded);

    let finished = outcome.workflow;
    assert_eq!(finished.workflow.status, WorkflowStatus::Completed);
    assert!(finished.workflow.actual_end_date.is_some());
    assert_eq!(finished.progress(), 1.0);
    assert_invariants(&finished);

    let entries = engine.get_activity_log(id, None).await?;
    let types: Vec<ActivityType> = entries.iter().rev().map(|e| e.activity_type).collect();
    assert_eq!(
        types,
        vec![
            ActivityType::WorkflowCreated,
            ActivityType::WorkflowStarted,
            ActivityType::StageCompleted,
            ActivityType::StageCompleted,
            ActivityType::StageCompleted,
            ActivityType::WorkflowCompleted,
        ]
    );
    assert_eq!(log.len().await, 6);

    // The cascade outcome is part of the stage completion record
    assert!(entries[2].description.contains("stage 'Onboarding' started"));

    Ok(())
}

#[tokio::test]
async fn test_concurrent_stage_completion_succeeds_once() -> Result<()> {
    let (engine, log) = memory_engine();
    let engine = Arc::new(engine);

    let detail = engine.create_from_template(create_params("V"), &buyer()).await?.workflow;
    engine.start_workflow(detail.id(), &buyer()).await?;
    let first = detail.stages[0].stage.id;
    let entries_before = log.len().await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.complete_stage(first, CompleteParams::default(), &buyer()).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => successes += 1,
            Err(e) => assert!(e.is_invalid_transition(), "unexpected error: {}", e),
        }
    }
    assert_eq!(successes, 1);

    let after = engine.get_workflow(detail.id()).await?;
    assert_invariants(&after);
    assert_eq!(after.stages[1].stage.status, StageStatus::InProgress);
    assert_eq!(after.stages[2].stage.status, StageStatus::Pending);
    assert_eq!(log.len().await, entries_before + 1);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_creation_allows_one_live_workflow() -> Result<()> {
    let (engine, _) = memory_engine();
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for _ in 0..6 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.create_from_template(create_params("V"), &buyer()).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => created += 1,
            Err(e) => assert!(matches!(e, WorkflowError::DuplicateWorkflow { .. })),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(engine.get_workflows_for_project("P").await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_invalid_custom_workflows_rejected() {
    let (engine, log) = memory_engine();
    let params = |stages: Vec<StagePlan>| CreateCustom {
        project_id: "P".to_string(),
        vendor_id: "V".to_string(),
        name: "Custom".to_string(),
        description: None,
        planned_start: date(2026, 1, 1),
        owner: buyer(),
        notes: None,
        stages,
    };

    let err = assert_err!(engine.create_custom(params(vec![]), &buyer()).await);
    assert!(matches!(err, WorkflowError::Validation(_)));

    let err = assert_err!(
        engine
            .create_custom(params(vec![StagePlan::new("Contracting", Some(-3))]), &buyer())
            .await
    );
    assert!(matches!(err, WorkflowError::Validation(_)));

    let err = assert_err!(
        engine
            .create_custom(params(vec![StagePlan::new("Contracting", Some(200_000_000))]), &buyer())
            .await
    );
    assert!(matches!(err, WorkflowError::Validation(ref msg) if msg.contains("out of range")));
    assert_eq!(log.len().await, 0);

    let outcome = assert_ok!(
        engine
            .create_custom(
                params(vec![
                    StagePlan::new("Contracting", Some(4)).with_milestones(["MSA", "DPA"]),
                    StagePlan::new("Onboarding", None),
                ]),
                &buyer(),
            )
            .await
    );
    assert!(outcome.workflow.workflow.template_id.is_none());
    assert_eq!(outcome.workflow.stages[1].stage.planned_start_date, Some(date(2026, 1, 6)));
    assert_eq!(outcome.workflow.stages[1].stage.planned_end_date, None);
}

/// Activity log that fails while `failing` is set
#[derive(Default)]
struct FlakyLog {
    failing: AtomicBool,
    inner: MemoryActivityLog,
}

#[async_trait]
impl ActivityLog for FlakyLog {
    async fn append(&self, entry: &ActivityLogEntry) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit database offline".to_string()));
        }
        self.inner.append(entry).await
    }

    async fn entries_for_workflow(
        &self,
        workflow_id: &WorkflowId,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityLogEntry>, StoreError> {
        self.inner.entries_for_workflow(workflow_id, limit).await
    }
}

#[tokio::test]
async fn test_audit_failure_never_rolls_back_transition() -> Result<()> {
    let log = Arc::new(FlakyLog::default());
    let engine = WorkflowEngine::new(catalog(), Arc::new(MemoryStore::new()), log.clone()).with_config(&fast_config());

    let detail = engine.create_from_template(create_params("V"), &buyer()).await?.workflow;

    log.failing.store(true, Ordering::SeqCst);
    let outcome = engine.start_workflow(detail.id(), &buyer()).await?;
    assert!(matches!(outcome.audit, AuditStatus::Degraded { pending: 1, .. }));
    assert_eq!(outcome.workflow.workflow.status, WorkflowStatus::InProgress);

    // The transition is persisted even though the log write failed
    let stored = engine.get_workflow(detail.id()).await?;
    assert_eq!(stored.workflow.status, WorkflowStatus::InProgress);
    assert_eq!(engine.pending_audit_entries().await, 1);

    log.failing.store(false, Ordering::SeqCst);
    assert_eq!(engine.flush_audit_backlog().await, AuditStatus::Recorded);

    let entries = engine.get_activity_log(detail.id(), None).await?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].activity_type, ActivityType::WorkflowStarted);

    Ok(())
}

/// Store that reports a version conflict on the next `conflicts` commits
struct ContendedStore {
    inner: MemoryStore,
    conflicts: AtomicU32,
}

#[async_trait]
impl WorkflowStore for ContendedStore {
    async fn insert_workflow(&self, detail: WorkflowDetail) -> Result<(), StoreError> {
        self.inner.insert_workflow(detail).await
    }

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowDetail>, StoreError> {
        self.inner.get_workflow(id).await
    }

    async fn find_live_workflow(
        &self,
        project_id: &str,
        vendor_id: &str,
    ) -> Result<Option<WorkflowDetail>, StoreError> {
        self.inner.find_live_workflow(project_id, vendor_id).await
    }

    async fn list_project_workflows(&self, project_id: &str) -> Result<Vec<WorkflowDetail>, StoreError> {
        self.inner.list_project_workflows(project_id).await
    }

    async fn commit_workflow(&self, detail: WorkflowDetail, expected_version: u64) -> Result<u64, StoreError> {
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::VersionConflict {
                workflow_id: detail.id(),
                expected: expected_version,
                found: expected_version + 1,
            });
        }
        self.inner.commit_workflow(detail, expected_version).await
    }

    async fn workflow_for_stage(&self, stage_id: &StageId) -> Result<Option<WorkflowId>, StoreError> {
        self.inner.workflow_for_stage(stage_id).await
    }

    async fn workflow_for_milestone(&self, milestone_id: &MilestoneId) -> Result<Option<WorkflowId>, StoreError> {
        self.inner.workflow_for_milestone(milestone_id).await
    }
}

#[tokio::test]
async fn test_version_conflicts_are_retried_then_surfaced() -> Result<()> {
    let store = Arc::new(ContendedStore {
        inner: MemoryStore::new(),
        conflicts: AtomicU32::new(0),
    });
    let engine = WorkflowEngine::new(catalog(), store.clone(), Arc::new(MemoryActivityLog::new()))
        .with_config(&fast_config());

    let detail = engine.create_from_template(create_params("V"), &buyer()).await?.workflow;

    // Two conflicts fit within three attempts
    store.conflicts.store(2, Ordering::SeqCst);
    let outcome = engine.start_workflow(detail.id(), &buyer()).await?;
    assert_eq!(outcome.workflow.workflow.status, WorkflowStatus::InProgress);

    // Persistent contention is reported after the last attempt
    store.conflicts.store(10, Ordering::SeqCst);
    let err = engine
        .complete_stage(detail.stages[0].stage.id, CompleteParams::default(), &buyer())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ConcurrencyConflict { attempts: 3, .. }));

    let stored = engine.get_workflow(detail.id()).await?;
    assert_eq!(stored.stages[0].stage.status, StageStatus::InProgress);

    Ok(())
}

async fn file_engine(dir: &Path) -> Result<WorkflowEngine> {
    let store = JsonFileStore::open(dir.join("workflows.json")).await?;
    let log = JsonlActivityLog::open(dir.join("activity.jsonl")).await?;
    Ok(WorkflowEngine::new(catalog(), Arc::new(store), Arc::new(log)).with_config(&fast_config()))
}

#[tokio::test]
async fn test_file_backed_engine_survives_restart() -> Result<()> {
    let temp_dir = tempfile::TempDir::new()?;

    let (id, first_stage) = {
        let engine = file_engine(temp_dir.path()).await?;
        let detail = engine.create_from_template(create_params("V"), &buyer()).await?.workflow;
        engine.start_workflow(detail.id(), &buyer()).await?;
        engine
            .complete_stage(detail.stages[0].stage.id, CompleteParams::default(), &buyer())
            .await?;
        (detail.id(), detail.stages[0].stage.id)
    };

    let engine = file_engine(temp_dir.path()).await?;
    let detail = engine.get_workflow(id).await?;
    assert_eq!(detail.stages[0].stage.status, StageStatus::Completed);
    assert_eq!(detail.current_stage().map(|s| s.stage.order), Some(2));
    assert_eq!(detail.workflow.version, 2);

    // Stage lookups work after reload
    let err = engine
        .complete_stage(first_stage, CompleteParams::default(), &buyer())
        .await
        .unwrap_err();
    assert!(err.is_invalid_transition());

    let entries = engine.get_activity_log(id, Some(2)).await?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].activity_type, ActivityType::StageCompleted);

    // The live pair is still enforced after reload
    let err = engine
        .create_from_template(create_params("V"), &buyer())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateWorkflow { .. }));

    Ok(())
}

#[tokio::test]
async fn test_engines_sharing_data_files() -> Result<()> {
    let temp_dir = tempfile::TempDir::new()?;
    let first = file_engine(temp_dir.path()).await?;
    let second = file_engine(temp_dir.path()).await?;

    let original = first.create_from_template(create_params("V"), &buyer()).await?.workflow;

    // The second engine has not seen the workflow yet; the store still refuses the pair
    let err = second
        .create_from_template(create_params("V"), &buyer())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateWorkflow { existing, .. } if existing == original.id()));

    second.create_from_template(create_params("W"), &buyer()).await?;

    // A change based on an old copy is retried against the current one
    first.start_workflow(original.id(), &buyer()).await?;
    let notes = procure_flow::workflow::UpdateNotesParams {
        notes: Some("waiting on DPA".to_string()),
    };
    let updated = second.update_notes(original.id(), notes, &buyer()).await?.workflow;
    assert_eq!(updated.workflow.status, WorkflowStatus::InProgress);
    assert_eq!(updated.workflow.version, 2);

    let reopened = file_engine(temp_dir.path()).await?;
    let workflows = reopened.get_workflows_for_project("P").await?;
    assert_eq!(workflows.len(), 2);
    let stored = reopened.get_workflow(original.id()).await?;
    assert_eq!(stored.workflow.status, WorkflowStatus::InProgress);
    assert_eq!(stored.workflow.notes.as_deref(), Some("waiting on DPA"));

    Ok(())
}

#[test]
fn test_bundled_templates_are_valid() -> Result<()> {
    let templates_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("templates");
    let catalog = TemplateCatalog::load_dir(&templates_dir)?;

    assert!(catalog.len() >= 2);
    for template in catalog.list_templates() {
        assert!(template.validate().is_empty(), "{} is invalid", template.id);
        assert!(template.stage_plans().is_ok());
    }

    Ok(())
}
