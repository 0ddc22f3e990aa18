// Template Store module for the procurement workflow engine
//
// This module provides the read-only catalogue of workflow templates used as
// blueprints for instantiation.

pub mod catalog;
pub mod types;

// Re-export commonly used types
pub use catalog::{builtin_vendor_onboarding, TemplateCatalog, TemplateStore};
pub use types::{TemplateId, TemplateStage, WorkflowTemplate};
