// Workflow Engine module for procurement workflows
//
// This module provides the workflow, stage and milestone model, the transition
// tables that drive the cascade, stage scheduling and the engine itself.

pub mod engine;
pub mod error;
pub mod events;
pub mod instantiate;
pub mod params;
pub mod schedule;
pub mod transition;
pub mod types;

// Re-export commonly used types
pub use engine::{TransitionOutcome, WorkflowEngine};
pub use error::{EntityKind, WorkflowError};
pub use events::DomainEvent;
pub use instantiate::WorkflowDraft;
pub use params::*;
pub use schedule::{schedule_stages, PlannedWindow};
pub use types::*;
