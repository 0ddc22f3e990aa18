// Configuration Manager implementation for the procurement workflow engine
//
// Loads the engine configuration from a TOML file and lets environment
// variables override individual settings.

use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;

use super::types::{ConfigPaths, DashboardConfig, EngineConfig, EnvVars, LogLevel, ValidationResult};

/// Main configuration manager
#[derive(Debug, Clone)]
pub struct ConfigManager {
    /// Current engine configuration
    config: EngineConfig,
    /// Path to the configuration file
    config_file: PathBuf,
}

impl ConfigManager {
    /// Create a configuration manager using the default configuration directory
    pub async fn new() -> Result<Self> {
        let config_dir = Self::determine_config_dir()?;
        Self::load(config_dir.join(ConfigPaths::CONFIG_FILE)).await
    }

    /// Create a configuration manager for an explicit configuration file
    pub async fn load<P: AsRef<Path>>(config_file: P) -> Result<Self> {
        let config_file = config_file.as_ref().to_path_buf();
        tracing::debug!("Using configuration file: {:?}", config_file);

        let mut manager = Self {
            config: EngineConfig::default(),
            config_file,
        };

        manager.load_configuration().await?;
        Ok(manager)
    }

    /// Determine the configuration directory to use
    fn determine_config_dir() -> Result<PathBuf> {
        // Check environment variable first
        if let Ok(config_dir) = env::var(EnvVars::CONFIG_DIR) {
            return Ok(PathBuf::from(config_dir));
        }

        ConfigPaths::default_config_dir()
    }

    /// Load configuration from the file, then apply environment overrides
    async fn load_configuration(&mut self) -> Result<()> {
        self.load_config_file().await?;
        self.load_from_environment();

        tracing::info!(
            "Configuration loaded (data dir: {}, templates: {})",
            self.config.data_dir.display(),
            self.config
                .templates_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "built-in".to_string())
        );
        Ok(())
    }

    async fn load_config_file(&mut self) -> Result<()> {
        if !self.config_file.exists() {
            tracing::debug!("Configuration file not found, using defaults");
            return Ok(());
        }

        let content = async_fs::read_to_string(&self.config_file)
            .await
            .with_context(|| format!("Failed to read configuration file: {}", self.config_file.display()))?;

        self.config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file: {}", self.config_file.display()))?;

        tracing::debug!("Engine configuration loaded from file");
        Ok(())
    }

    /// Environment variables take precedence over the file
    fn load_from_environment(&mut self) {
        if let Ok(data_dir) = env::var(EnvVars::DATA_DIR) {
            self.config.data_dir = PathBuf::from(data_dir);
            tracing::debug!("Loaded data directory from environment");
        }

        if let Ok(templates_dir) = env::var(EnvVars::TEMPLATES_DIR) {
            self.config.templates_dir = Some(PathBuf::from(templates_dir));
            tracing::debug!("Loaded templates directory from environment");
        }

        if let Ok(log_level) = env::var(EnvVars::LOG_LEVEL) {
            match log_level.parse::<LogLevel>() {
                Ok(level) => self.config.log_level = level,
                Err(e) => tracing::warn!("Ignoring {}: {}", EnvVars::LOG_LEVEL, e),
            }
        }
    }

    /// Get the current engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get mutable access to the configuration
    pub fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Validate the current configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        let config = &self.config;

        if config.conflict_retry.max_attempts == 0 {
            result.add_error("conflict_retry.max_attempts must be greater than 0".to_string());
        }

        if config.audit_retry.max_attempts == 0 {
            result.add_error("audit_retry.max_attempts must be greater than 0".to_string());
        }

        let threshold = config.dashboard.at_risk_progress_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            result.add_error(format!(
                "dashboard.at_risk_progress_threshold must be between 0 and 1 (got {})",
                threshold
            ));
        }

        let windows = [
            ("at_risk_window_days", config.dashboard.at_risk_window_days),
            ("recent_completion_days", config.dashboard.recent_completion_days),
        ];
        for (name, days) in windows {
            if !(0..=DashboardConfig::MAX_WINDOW_DAYS).contains(&days) {
                result.add_error(format!(
                    "dashboard.{} must be between 0 and {} (got {})",
                    name,
                    DashboardConfig::MAX_WINDOW_DAYS,
                    days
                ));
            }
        }

        if config.dashboard.upcoming_milestone_limit == 0 {
            result.add_warning("dashboard.upcoming_milestone_limit is 0; no milestones will be listed".to_string());
        }

        if let Some(templates_dir) = &config.templates_dir {
            if !templates_dir.exists() {
                result.add_warning(format!(
                    "Templates directory does not exist: {:?}",
                    templates_dir
                ));
            }
        }

        result
    }

    /// Save the current configuration to the configuration file
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_file.parent() {
            async_fs::create_dir_all(parent)
                .await
                .context("Failed to create configuration directory")?;
        }

        let content = toml::to_string_pretty(&self.config)
            .context("Failed to serialize engine configuration")?;
        async_fs::write(&self.config_file, content)
            .await
            .context("Failed to write configuration file")?;

        tracing::info!("Configuration saved to {}", self.config_file.display());
        Ok(())
    }
}
