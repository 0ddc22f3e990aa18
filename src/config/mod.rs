// Configuration Manager module for the procurement workflow engine
//
// This module handles engine configuration files, environment overrides and
// the retry and dashboard settings consumed by the engine.

pub mod manager;
pub mod types;

// Re-export commonly used types
pub use manager::ConfigManager;
pub use types::{DashboardConfig, EngineConfig, LogLevel, RetryPolicy, ValidationResult};
