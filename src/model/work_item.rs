//! Work items: the Feature and Bug records a workflow instance governs.
//!
//! Work items are owned by the host's store. The engine only reads them:
//! compliance violations and artifacts feed quality checks, and every field
//! (including `custom_fields`) is addressable from conditions by dotted path.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use super::template::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemKind {
    Feature,
    Bug,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceViolation {
    pub rule: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub resolved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentArtifact {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub complete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestReport {
    pub total: u32,
    pub passed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub skipped: u32,
}

impl TestReport {
    /// Percentage of tests that passed, or `None` when no tests ran.
    pub fn pass_rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.passed as f64 / self.total as f64 * 100.0)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LintReport {
    pub errors: u32,
    #[serde(default)]
    pub warnings: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SecurityReport {
    #[serde(default)]
    pub critical: u32,
    #[serde(default)]
    pub high: u32,
    #[serde(default)]
    pub medium: u32,
    #[serde(default)]
    pub low: u32,
}

fn default_lower_is_better() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Benchmark {
    pub name: String,
    pub value: f64,
    pub threshold: f64,
    #[serde(default = "default_lower_is_better")]
    pub lower_is_better: bool,
}

impl Benchmark {
    pub fn within_threshold(&self) -> bool {
        if self.lower_is_better {
            self.value <= self.threshold
        } else {
            self.value >= self.threshold
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccessibilityReport {
    pub score: f64,
    #[serde(default)]
    pub violations: u32,
}

/// Documentation and test artifacts attached to a work item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Artifacts {
    #[serde(default)]
    pub documentation: Vec<DocumentArtifact>,
    #[serde(default)]
    pub tests: Option<TestReport>,
    /// Line coverage percentage.
    #[serde(default)]
    pub coverage: Option<f64>,
    #[serde(default)]
    pub lint: Option<LintReport>,
    #[serde(default)]
    pub security: Option<SecurityReport>,
    #[serde(default)]
    pub benchmarks: Vec<Benchmark>,
    #[serde(default)]
    pub accessibility: Option<AccessibilityReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub id: String,
    pub kind: WorkItemKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub compliance: Vec<ComplianceViolation>,
    #[serde(default)]
    pub artifacts: Artifacts,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
}

impl WorkItem {
    pub fn new(id: &str, kind: WorkItemKind, title: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            title: title.to_string(),
            compliance: Vec::new(),
            artifacts: Artifacts::default(),
            custom_fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.custom_fields.insert(key.to_string(), value);
        self
    }

    /// Load a work item from a JSON or YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read work item file: {}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let item = if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse work item YAML: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse work item JSON: {}", path.display()))?
        };
        Ok(item)
    }

    pub fn unresolved_violations(&self) -> impl Iterator<Item = &ComplianceViolation> {
        self.compliance.iter().filter(|v| !v.resolved)
    }
}
