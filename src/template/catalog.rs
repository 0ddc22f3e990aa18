// Template catalogue discovery and lookup
//
// Templates are YAML files discovered under a directory tree. Invalid files
// are logged and skipped so one bad template never hides the rest.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::types::{TemplateId, TemplateStage, WorkflowTemplate};

/// Read-only source of workflow templates
pub trait TemplateStore: Send + Sync {
    /// Look up a template by ID
    fn get_template(&self, id: &str) -> Option<WorkflowTemplate>;

    /// All templates, sorted by name
    fn list_templates(&self) -> Vec<WorkflowTemplate>;
}

/// In-memory template catalogue, optionally populated from a directory of YAML files
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    /// Directory scanned by `discover`, if any
    templates_dir: Option<PathBuf>,
    /// Templates indexed by ID
    templates: HashMap<TemplateId, WorkflowTemplate>,
}

impl TemplateCatalog {
    /// Create an empty catalogue
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalogue from templates built in code
    pub fn from_templates<I>(templates: I) -> Result<Self>
    where
        I: IntoIterator<Item = WorkflowTemplate>,
    {
        let mut catalog = Self::new();
        for template in templates {
            catalog.insert(template)?;
        }
        Ok(catalog)
    }

    /// Create a catalogue by discovering YAML templates under `templates_dir`
    pub fn load_dir<P: AsRef<Path>>(templates_dir: P) -> Result<Self> {
        let templates_dir = templates_dir.as_ref().to_path_buf();

        if !templates_dir.exists() {
            return Err(anyhow::anyhow!(
                "Templates directory does not exist: {}",
                templates_dir.display()
            ));
        }

        let mut catalog = Self {
            templates_dir: Some(templates_dir),
            templates: HashMap::new(),
        };
        catalog.discover()?;

        Ok(catalog)
    }

    /// Catalogue holding only the built-in vendor onboarding template
    pub fn with_builtin() -> Self {
        let mut templates = HashMap::new();
        let builtin = builtin_vendor_onboarding();
        templates.insert(builtin.id.clone(), builtin);

        Self {
            templates_dir: None,
            templates,
        }
    }

    /// Add a template after validating it
    pub fn insert(&mut self, template: WorkflowTemplate) -> Result<()> {
        let errors = template.validate();
        if !errors.is_empty() {
            return Err(anyhow::anyhow!(
                "Invalid template '{}': {}",
                template.id,
                errors.join("; ")
            ));
        }

        if self.templates.contains_key(&template.id) {
            return Err(anyhow::anyhow!("Duplicate template ID: {}", template.id));
        }

        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    /// Re-scan the templates directory, replacing the current contents
    pub fn discover(&mut self) -> Result<usize> {
        let Some(templates_dir) = self.templates_dir.clone() else {
            return Ok(self.templates.len());
        };

        tracing::info!("Discovering templates in {}", templates_dir.display());
        self.templates.clear();

        for entry in WalkDir::new(&templates_dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .map_or(false, |ext| ext == "yaml" || ext == "yml");

            if !path.is_file() || !is_yaml {
                continue;
            }

            let loaded = Self::load_template_file(path).and_then(|template| self.insert(template));
            match loaded {
                Ok(()) => tracing::debug!("Loaded template from {}", path.display()),
                Err(e) => tracing::error!("Skipping template {}: {:#}", path.display(), e),
            }
        }

        tracing::info!("Discovered {} templates", self.templates.len());
        Ok(self.templates.len())
    }

    fn load_template_file(path: &Path) -> Result<WorkflowTemplate> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read template file: {}", path.display()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse template YAML: {}", path.display()))
    }

    /// Templates tagged with the given procurement type
    pub fn by_procurement_type(&self, procurement_type: &str) -> Vec<&WorkflowTemplate> {
        let mut matches: Vec<&WorkflowTemplate> = self
            .templates
            .values()
            .filter(|t| t.procurement_type.as_deref() == Some(procurement_type))
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        matches
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateStore for TemplateCatalog {
    fn get_template(&self, id: &str) -> Option<WorkflowTemplate> {
        self.templates.get(id).cloned()
    }

    fn list_templates(&self) -> Vec<WorkflowTemplate> {
        let mut templates: Vec<WorkflowTemplate> = self.templates.values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        templates
    }
}

/// Default selection-to-onboarding template used when no catalogue is configured
pub fn builtin_vendor_onboarding() -> WorkflowTemplate {
    let stage = |order: u32, name: &str, days: i64, milestones: &[&str]| TemplateStage {
        name: name.to_string(),
        description: None,
        order,
        target_days: Some(days),
        milestones: milestones.iter().map(|m| m.to_string()).collect(),
    };

    WorkflowTemplate {
        id: "vendor-onboarding".to_string(),
        name: "Standard vendor onboarding".to_string(),
        description: "From vendor selection through contracting to onboarding".to_string(),
        procurement_type: Some("general".to_string()),
        stages: vec![
            stage(1, "Vendor selection", 5, &["Selection memo approved", "Vendor notified"]),
            stage(2, "Due diligence", 10, &["Security questionnaire", "Financial review", "Reference checks"]),
            stage(3, "Contract negotiation", 15, &["Redlines exchanged", "Legal approval", "Contract signed"]),
            stage(4, "Purchase order", 3, &["PO raised", "PO approved"]),
            stage(5, "Onboarding", 10, &["Kickoff held", "Access provisioned", "Vendor record created"]),
        ],
    }
}
