//! Procurement workflow engine
//!
//! Template-driven, multi-stage workflows that track a vendor from selection
//! through contracting and onboarding. The crate provides the workflow engine
//! with its cascade and blocking rules, stage scheduling, an append-only
//! activity log, dashboard aggregation, and file-backed persistence.

pub mod activity;
pub mod config;
pub mod dashboard;
pub mod store;
pub mod template;
pub mod utils;
pub mod workflow;

// Re-export main types for convenience
pub use activity::{ActivityLog, ActivityLogEntry, AuditStatus};
pub use config::{ConfigManager, EngineConfig};
pub use dashboard::DashboardStats;
pub use store::{JsonFileStore, MemoryStore, WorkflowStore};
pub use template::{TemplateCatalog, TemplateStore, WorkflowTemplate};
pub use workflow::{TransitionOutcome, WorkflowEngine, WorkflowError};
