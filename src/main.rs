// Procure Flow - command-line front end for the procurement workflow engine
//
// Operates on the file-backed workflow store and activity log under the
// configured data directory.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use uuid::Uuid;

use procure_flow::activity::{AuditStatus, JsonlActivityLog};
use procure_flow::config::{ConfigManager, EngineConfig};
use procure_flow::store::JsonFileStore;
use procure_flow::template::TemplateCatalog;
use procure_flow::workflow::{
    Actor, BlockParams, CancelParams, CompleteParams, CreateCustom, CreateFromTemplate, SkipParams,
    StagePlan, TransitionOutcome, WorkflowDetail, WorkflowEngine,
};

/// Procure Flow - template-driven procurement workflows
#[derive(Parser)]
#[command(name = "procure-flow")]
#[command(about = "Track vendors from selection through contracting and onboarding")]
#[command(version)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// User ID recorded in the activity log
    #[arg(long, global = true, env = "PROCURE_FLOW_ACTOR_ID", default_value = "cli")]
    actor_id: String,

    /// Display name recorded in the activity log
    #[arg(long, global = true, env = "PROCURE_FLOW_ACTOR_NAME", default_value = "CLI user")]
    actor_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List available workflow templates
    Templates,

    /// Create a workflow from a template or a YAML stage list
    Create {
        #[arg(long)]
        project: String,
        #[arg(long)]
        vendor: String,
        /// Template ID
        #[arg(long, conflicts_with = "stages_file", required_unless_present = "stages_file")]
        template: Option<String>,
        /// YAML file with a list of stages (name, target_days, milestones)
        #[arg(long)]
        stages_file: Option<PathBuf>,
        /// Planned start date (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// Workflow name (required with --stages-file)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        owner_id: String,
        #[arg(long)]
        owner_name: String,
    },

    /// Start a workflow and its first stage
    Start { workflow: Uuid },

    /// Complete the in-progress stage and advance the workflow
    CompleteStage {
        stage: Uuid,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Skip a stage
    SkipStage {
        stage: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Block a workflow, or a stage with --stage
    Block {
        id: Uuid,
        #[arg(long)]
        reason: String,
        /// Treat the ID as a stage ID
        #[arg(long)]
        stage: bool,
    },

    /// Unblock a workflow, or a stage with --stage
    Unblock {
        id: Uuid,
        /// Treat the ID as a stage ID
        #[arg(long)]
        stage: bool,
    },

    /// Cancel a workflow
    Cancel {
        workflow: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Show a workflow with its stages and milestones
    Show {
        workflow: Uuid,
        #[arg(long)]
        json: bool,
    },

    /// Dashboard statistics for a project
    Dashboard {
        project: String,
        #[arg(long)]
        json: bool,
    },

    /// Activity log of a workflow, newest first
    Log {
        workflow: Uuid,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_manager = match &args.config {
        Some(path) => ConfigManager::load(path).await?,
        None => ConfigManager::new().await?,
    };
    let config = config_manager.config().clone();

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&args, &config)?;

    let validation = config_manager.validate();
    for warning in &validation.warnings {
        tracing::warn!("Configuration: {}", warning);
    }
    if !validation.is_valid {
        anyhow::bail!("Invalid configuration: {}", validation.errors.join("; "));
    }

    let catalog = load_catalog(&config)?;
    let engine = build_engine(&config, Arc::new(catalog)).await?;
    let actor = Actor::new(args.actor_id.clone(), args.actor_name.clone());

    run(args.command, &engine, &actor).await
}

async fn run(command: Command, engine: &WorkflowEngine, actor: &Actor) -> Result<()> {
    match command {
        Command::Templates => {
            let templates = engine.list_templates();
            if templates.is_empty() {
                println!("No templates found.");
            }
            for template in templates {
                println!("  {} - {}", template.id, template.name);
                if let Some(procurement_type) = &template.procurement_type {
                    println!("    Type: {}", procurement_type);
                }
                println!(
                    "    {} stages, {} target days",
                    template.stages.len(),
                    template.total_target_days()
                );
                if !template.description.is_empty() {
                    println!("    {}", template.description);
                }
                println!();
            }
        }
        Command::Create {
            project,
            vendor,
            template,
            stages_file,
            start,
            name,
            owner_id,
            owner_name,
        } => {
            let owner = Actor::new(owner_id, owner_name);
            let outcome = match (template, stages_file) {
                (Some(template_id), _) => {
                    let mut params = CreateFromTemplate::new(project, vendor, template_id, start, owner);
                    params.name = name;
                    engine.create_from_template(params, actor).await?
                }
                (None, Some(path)) => {
                    let stages = read_stage_file(&path)?;
                    let params = CreateCustom {
                        project_id: project,
                        vendor_id: vendor,
                        name: name.context("--name is required with --stages-file")?,
                        description: None,
                        planned_start: start,
                        owner,
                        notes: None,
                        stages,
                    };
                    engine.create_custom(params, actor).await?
                }
                (None, None) => anyhow::bail!("either --template or --stages-file is required"),
            };
            report(&outcome);
            print_workflow(&outcome.workflow);
        }
        Command::Start { workflow } => {
            let outcome = engine.start_workflow(workflow, actor).await?;
            report(&outcome);
        }
        Command::CompleteStage { stage, notes } => {
            let outcome = engine
                .complete_stage(stage, CompleteParams { notes }, actor)
                .await?;
            report(&outcome);
        }
        Command::SkipStage { stage, reason } => {
            let outcome = engine.skip_stage(stage, SkipParams { reason }, actor).await?;
            report(&outcome);
        }
        Command::Block { id, reason, stage } => {
            let params = BlockParams::new(reason);
            let outcome = if stage {
                engine.block_stage(id, params, actor).await?
            } else {
                engine.block_workflow(id, params, actor).await?
            };
            report(&outcome);
        }
        Command::Unblock { id, stage } => {
            let outcome = if stage {
                engine.unblock_stage(id, actor).await?
            } else {
                engine.unblock_workflow(id, actor).await?
            };
            report(&outcome);
        }
        Command::Cancel { workflow, reason } => {
            let outcome = engine
                .cancel_workflow(workflow, CancelParams { reason }, actor)
                .await?;
            report(&outcome);
        }
        Command::Show { workflow, json } => {
            let detail = engine.get_workflow(workflow).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                print_workflow(&detail);
            }
        }
        Command::Dashboard { project, json } => {
            let stats = engine.get_dashboard(&project).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }

            println!("Project {} ({} workflows)\n", project, stats.total);
            println!("  Not started: {}", stats.by_status.not_started);
            println!("  In progress: {}", stats.by_status.in_progress);
            println!("  Blocked:     {}", stats.by_status.blocked);
            println!("  Completed:   {}", stats.by_status.completed);
            println!("  Cancelled:   {}", stats.by_status.cancelled);
            println!();
            println!("  Overdue:             {}", stats.overdue);
            println!("  At risk:             {}", stats.at_risk);
            println!("  Completed this week: {}", stats.completed_this_week);

            if !stats.upcoming_milestones.is_empty() {
                println!("\nUpcoming milestones:");
                for m in &stats.upcoming_milestones {
                    let due = m
                        .due_date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "no date".to_string());
                    println!("  {} {} / {} / {}", due, m.workflow_name, m.stage_name, m.milestone_name);
                }
            }
        }
        Command::Log { workflow, limit } => {
            let entries = engine.get_activity_log(workflow, limit).await?;
            for entry in entries {
                println!(
                    "{}  {:<24} {}  ({})",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.activity_type.as_str(),
                    entry.description,
                    entry.performed_by.name
                );
            }
        }
    }

    Ok(())
}

fn load_catalog(config: &EngineConfig) -> Result<TemplateCatalog> {
    match &config.templates_dir {
        Some(dir) => TemplateCatalog::load_dir(dir)
            .with_context(|| format!("Failed to load templates from {}", dir.display())),
        None => Ok(TemplateCatalog::with_builtin()),
    }
}

async fn build_engine(config: &EngineConfig, catalog: Arc<TemplateCatalog>) -> Result<WorkflowEngine> {
    let store = JsonFileStore::open(config.state_file())
        .await
        .with_context(|| format!("Failed to open workflow store {}", config.state_file().display()))?;
    let activity_log = JsonlActivityLog::open(config.activity_log_file())
        .await
        .with_context(|| format!("Failed to open activity log {}", config.activity_log_file().display()))?;

    Ok(WorkflowEngine::new(catalog, Arc::new(store), Arc::new(activity_log)).with_config(config))
}

fn read_stage_file(path: &Path) -> Result<Vec<StagePlan>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read stage file: {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse stage file: {}", path.display()))
}

fn report(outcome: &TransitionOutcome) {
    let workflow = &outcome.workflow.workflow;
    println!("✓ {} ({}) is {}", workflow.name, workflow.id, workflow.status);
    if let Some(stage) = outcome.workflow.current_stage() {
        println!("  Current stage: {} ({})", stage.stage.name, stage.stage.status);
    }
    for warning in &outcome.warnings {
        println!("  Warning: {}", warning);
    }
    if let AuditStatus::Degraded { pending, error } = &outcome.audit {
        eprintln!("  Audit log degraded ({} entries pending): {}", pending, error);
    }
}

fn print_workflow(detail: &WorkflowDetail) {
    let workflow = &detail.workflow;
    println!("{} [{}]", workflow.name, workflow.status);
    println!("  ID:       {}", workflow.id);
    println!("  Project:  {}  Vendor: {}", workflow.project_id, workflow.vendor_id);
    if let Some(owner) = &workflow.owner {
        println!("  Owner:    {}", owner);
    }
    if let (Some(start), Some(end)) = (workflow.planned_start_date, workflow.planned_end_date) {
        println!("  Planned:  {} to {}", start, end);
    }
    if let Some(reason) = &workflow.blocked_reason {
        println!("  Blocked:  {}", reason);
    }
    println!("  Progress: {:.0}%\n", detail.progress() * 100.0);

    for stage in &detail.stages {
        let s = &stage.stage;
        let window = match (s.planned_start_date, s.planned_end_date) {
            (Some(start), Some(end)) => format!("{} to {}", start, end),
            (Some(start), None) => format!("from {}", start),
            _ => String::new(),
        };
        println!("  {}. {} [{}] {}", s.order, s.name, s.status, window);
        println!("     stage id: {}", s.id);
        for m in &stage.milestones {
            println!("     - {} [{}] {}", m.name, m.status, m.id);
        }
    }
}

/// Initialize logging based on verbosity, configuration and CLI flags
fn init_logging(args: &Args, config: &EngineConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        config.log_level.to_string()
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("procure_flow={}", log_level).into());

    let stderr_layer = match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .context("Log file path has no file name")?;
            std::fs::create_dir_all(directory)
                .with_context(|| format!("Failed to create log directory: {}", directory.display()))?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
