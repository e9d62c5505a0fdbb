//! Workflow definitions.
//!
//! # Example
//!
//! ```toml
//! name = "security_audit"
//! budget = 0.50
//!
//! [[stages]]
//! name = "triage"
//! complexity = "simple"
//! system_prompt = "Classify the findings by severity."
//! prompt = "{input}"
//!
//! [[stages]]
//! name = "deep_analysis"
//! complexity = "complex"
//! prompt = "Analyze these findings in depth:\n{previous}"
//! skip_if_previous_contains = "NO FINDINGS"
//! expected_keywords = ["severity", "remediation"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::WorkflowError;
use crate::routing::{Complexity, LatencySensitivity};

const INPUT_PLACEHOLDER: &str = "{input}";
const PREVIOUS_PLACEHOLDER: &str = "{previous}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Run budget in USD, fed to routing as remaining budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    #[serde(default)]
    pub stages: Vec<StageSpec>,
}

/// One stage of a workflow, executed in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    /// Defaults to the stage name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    /// Unclassified stages take the moderate routing path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(default)]
    pub latency: LatencySensitivity,
    #[serde(default)]
    pub system_prompt: String,
    /// `{input}` is the workflow input, `{previous}` the last executed
    /// stage's output
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_true")]
    pub cacheable: bool,
    /// Always skip, with this reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<String>,
    /// Skip when the previous output contains this text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if_previous_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_keywords: Vec<String>,
}

fn default_prompt() -> String {
    INPUT_PLACEHOLDER.to_string()
}

fn default_true() -> bool {
    true
}

impl StageSpec {
    pub fn new(name: impl Into<String>, complexity: Complexity) -> Self {
        Self {
            name: name.into(),
            task_type: None,
            complexity: Some(complexity),
            latency: LatencySensitivity::default(),
            system_prompt: String::new(),
            prompt: default_prompt(),
            cacheable: true,
            skip: None,
            skip_if_previous_contains: None,
            expected_keywords: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn task_type(&self) -> &str {
        self.task_type.as_deref().unwrap_or(&self.name)
    }

    /// Fill `{input}` and `{previous}` in a single pass over the template.
    /// Placeholder text inside the substituted values is left as is.
    pub fn render_prompt(&self, input: &str, previous: &str) -> String {
        let mut rendered = String::with_capacity(self.prompt.len() + input.len());
        let mut rest = self.prompt.as_str();

        while let Some(start) = rest.find('{') {
            rendered.push_str(&rest[..start]);
            let tail = &rest[start..];
            if let Some(after) = tail.strip_prefix(INPUT_PLACEHOLDER) {
                rendered.push_str(input);
                rest = after;
            } else if let Some(after) = tail.strip_prefix(PREVIOUS_PLACEHOLDER) {
                rendered.push_str(previous);
                rest = after;
            } else {
                rendered.push('{');
                rest = &tail[1..];
            }
        }
        rendered.push_str(rest);
        rendered
    }

    /// Why this stage should not run, given the previous stage's output.
    pub fn skip_reason(&self, previous: Option<&str>) -> Option<String> {
        if let Some(reason) = &self.skip {
            return Some(reason.clone());
        }
        match (&self.skip_if_previous_contains, previous) {
            (Some(needle), Some(previous)) if previous.contains(needle.as_str()) => {
                Some(format!("previous output contains '{}'", needle))
            }
            _ => None,
        }
    }
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, stages: Vec<StageSpec>) -> Self {
        Self {
            name: name.into(),
            description: None,
            budget: None,
            stages,
        }
    }

    pub fn with_budget(mut self, budget: f64) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Parse and validate a TOML definition file.
    pub fn load(path: &Path) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, WorkflowError> {
        let definition: Self = toml::from_str(content)
            .map_err(|e| WorkflowError::InvalidDefinition(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::InvalidDefinition(
                "workflow name cannot be empty".to_string(),
            ));
        }
        if self.stages.is_empty() {
            return Err(WorkflowError::EmptyWorkflow(self.name.clone()));
        }
        if let Some(budget) = self.budget {
            if !budget.is_finite() || budget < 0.0 {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "budget must be a non-negative number, got {}",
                    budget
                )));
            }
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "workflow '{}' has a stage without a name",
                    self.name
                )));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(WorkflowError::DuplicateStage {
                    workflow: self.name.clone(),
                    stage: stage.name.clone(),
                });
            }
        }
        Ok(())
    }
}
