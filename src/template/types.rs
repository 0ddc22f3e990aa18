// Workflow template types
//
// Templates are reusable blueprints. Instantiation copies their stages and
// milestone names, so editing a template never touches existing workflows.

use serde::{Deserialize, Serialize};

use crate::workflow::{StagePlan, WorkflowError};

/// Unique identifier for a template (slug taken from the template file)
pub type TemplateId = String;

/// One stage definition inside a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateStage {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// 1-based position within the template
    pub order: u32,
    #[serde(default)]
    pub target_days: Option<i64>,
    #[serde(default, alias = "milestone_names")]
    pub milestones: Vec<String>,
}

/// A reusable blueprint of stages and milestones
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Procurement-type tag used to filter templates (e.g. "software", "services")
    #[serde(default, alias = "type")]
    pub procurement_type: Option<String>,
    pub stages: Vec<TemplateStage>,
}

impl WorkflowTemplate {
    /// Check the template for structural problems, returning every issue found
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.id.trim().is_empty() {
            errors.push("Template ID cannot be empty".to_string());
        }

        if self.name.trim().is_empty() {
            errors.push("Template name cannot be empty".to_string());
        }

        if self.stages.is_empty() {
            errors.push("Template must have at least one stage".to_string());
        }

        let mut orders: Vec<u32> = self.stages.iter().map(|s| s.order).collect();
        orders.sort_unstable();
        if orders.iter().enumerate().any(|(i, order)| *order as usize != i + 1) {
            errors.push(format!(
                "Stage orders must be the contiguous sequence 1..{} (found {:?})",
                self.stages.len(),
                orders
            ));
        }

        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                errors.push(format!("Stage {} name cannot be empty", stage.order));
            }
            if let Some(days) = stage.target_days {
                if days < 0 {
                    errors.push(format!(
                        "Stage '{}' has a negative target duration ({} days)",
                        stage.name, days
                    ));
                }
            }
            if stage.milestones.iter().any(|m| m.trim().is_empty()) {
                errors.push(format!("Stage '{}' has an empty milestone name", stage.name));
            }
        }

        errors
    }

    /// Copy the stages out in order, ready for instantiation
    pub fn stage_plans(&self) -> Result<Vec<StagePlan>, WorkflowError> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(WorkflowError::Validation(format!(
                "template '{}' is invalid: {}",
                self.id,
                errors.join("; ")
            )));
        }

        let mut stages: Vec<&TemplateStage> = self.stages.iter().collect();
        stages.sort_by_key(|s| s.order);

        Ok(stages
            .into_iter()
            .map(|s| StagePlan {
                name: s.name.clone(),
                description: s.description.clone(),
                target_days: s.target_days,
                milestones: s.milestones.clone(),
            })
            .collect())
    }

    pub fn total_target_days(&self) -> i64 {
        self.stages.iter().filter_map(|s| s.target_days).sum()
    }
}
