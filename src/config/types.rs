// Configuration types for the procurement workflow engine
//
// This module defines the engine configuration loaded from TOML, the retry
// policies used around the store and the audit sink, and dashboard thresholds.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::serde_helpers::duration_ms_serde;

/// Log level for the engine and CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Trace => write!(f, "trace"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt
    #[serde(with = "duration_ms_serde")]
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(25))
    }
}

/// Thresholds used by the dashboard aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Workflows ending within this many days may be at risk
    pub at_risk_window_days: i64,
    /// Progress below this fraction marks a workflow near its end as at risk
    pub at_risk_progress_threshold: f64,
    /// Look-back window for "completed this week"
    pub recent_completion_days: i64,
    /// Maximum number of upcoming milestones returned
    pub upcoming_milestone_limit: usize,
}

impl DashboardConfig {
    /// Upper bound for the look-ahead and look-back windows
    pub const MAX_WINDOW_DAYS: i64 = 3650;
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            at_risk_window_days: 7,
            at_risk_progress_threshold: 0.8,
            recent_completion_days: 7,
            upcoming_milestone_limit: 10,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the workflow state file and the activity log
    pub data_dir: PathBuf,
    /// Directory scanned for YAML workflow templates
    pub templates_dir: Option<PathBuf>,
    /// Log level for the engine
    pub log_level: LogLevel,
    /// Retries for optimistic version conflicts on commit
    pub conflict_retry: RetryPolicy,
    /// Retries for activity log writes
    pub audit_retry: RetryPolicy,
    /// Dashboard thresholds
    pub dashboard: DashboardConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: ConfigPaths::default_data_dir()
                .unwrap_or_else(|_| std::env::temp_dir().join(ConfigPaths::APP_DIR_NAME)),
            templates_dir: None,
            log_level: LogLevel::default(),
            conflict_retry: RetryPolicy::default(),
            audit_retry: RetryPolicy::default(),
            dashboard: DashboardConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Path of the JSON workflow state file
    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join(ConfigPaths::STATE_FILE)
    }

    /// Path of the JSON-lines activity log
    pub fn activity_log_file(&self) -> PathBuf {
        self.data_dir.join(ConfigPaths::ACTIVITY_LOG_FILE)
    }
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// Whether the configuration is valid
    pub is_valid: bool,
    /// Validation errors
    pub errors: Vec<String>,
    /// Validation warnings
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Create a new validation result
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error to the validation result
    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    /// Add a warning to the validation result
    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// Check if there are any issues
    pub fn has_issues(&self) -> bool {
        !self.errors.is_empty() || !self.warnings.is_empty()
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Environment variables read by the configuration manager
pub struct EnvVars;

impl EnvVars {
    pub const CONFIG_DIR: &'static str = "PROCURE_FLOW_CONFIG_DIR";
    pub const DATA_DIR: &'static str = "PROCURE_FLOW_DATA_DIR";
    pub const TEMPLATES_DIR: &'static str = "PROCURE_FLOW_TEMPLATES_DIR";
    pub const LOG_LEVEL: &'static str = "PROCURE_FLOW_LOG_LEVEL";
}

/// Configuration file paths and names
pub struct ConfigPaths;

impl ConfigPaths {
    /// Application directory name under the platform config/data dirs
    pub const APP_DIR_NAME: &'static str = "procure-flow";

    /// Engine configuration file name
    pub const CONFIG_FILE: &'static str = "procure-flow.toml";

    /// Workflow state file name
    pub const STATE_FILE: &'static str = "workflows.json";

    /// Activity log file name
    pub const ACTIVITY_LOG_FILE: &'static str = "activity.jsonl";

    /// Get the default configuration directory
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(Self::APP_DIR_NAME))
            .context("Failed to determine configuration directory")
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join(Self::APP_DIR_NAME))
            .context("Failed to determine data directory")
    }
}
