//! Rubric parsing from free text, YAML or JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur when loading a rubric.
#[derive(Error, Debug)]
pub enum RubricError {
    #[error("Failed to read rubric file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Rubric validation failed: {0}")]
    ValidationError(String),
}

/// A single grading criterion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RubricCriterion {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Maximum points for this criterion
    pub max_points: f64,
}

impl RubricCriterion {
    pub fn new(name: impl Into<String>, description: impl Into<String>, max_points: f64) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            max_points,
        }
    }
}

/// A grading rubric.
///
/// Free-form text is always accepted; structured criteria are optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rubric {
    /// Human-readable name
    #[serde(default = "default_rubric_name")]
    pub name: String,

    /// Rubric text as written by the teacher
    #[serde(default)]
    pub raw_text: String,

    /// Structured criteria, in presentation order
    #[serde(default)]
    pub criteria: Vec<RubricCriterion>,

    /// Declared maximum points for the whole rubric
    #[serde(default)]
    pub max_points: Option<f64>,
}

fn default_rubric_name() -> String {
    "Custom Rubric".to_string()
}

impl Rubric {
    /// Create a rubric from free-form text.
    pub fn from_text(text: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            raw_text: text.into(),
            criteria: Vec::new(),
            max_points: None,
        }
    }

    /// Parse a structured rubric from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, RubricError> {
        let rubric: Rubric = serde_yaml::from_str(yaml)?;
        rubric.validate()?;
        Ok(rubric)
    }

    /// Parse a structured rubric from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, RubricError> {
        let rubric: Rubric = serde_json::from_str(json)?;
        rubric.validate()?;
        Ok(rubric)
    }

    /// Load a rubric from disk.
    ///
    /// `.yaml`/`.yml` and `.json` files are parsed as structured rubrics;
    /// anything else is read as free text named after the file stem.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RubricError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            Some("json") => Self::from_json(&contents),
            _ => {
                let name = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
                    .unwrap_or_else(default_rubric_name);
                let rubric = Self::from_text(contents, name);
                rubric.validate()?;
                Ok(rubric)
            }
        }
    }

    /// Add a criterion.
    pub fn with_criterion(mut self, criterion: RubricCriterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// Set the declared maximum.
    pub fn with_max_points(mut self, max_points: f64) -> Self {
        self.max_points = Some(max_points);
        self
    }

    /// Declared maximum: explicit `max_points`, else the criteria total.
    pub fn declared_max(&self) -> Option<f64> {
        self.max_points.or_else(|| {
            if self.criteria.is_empty() {
                None
            } else {
                Some(self.criteria_total())
            }
        })
    }

    /// Sum of criterion maxima.
    pub fn criteria_total(&self) -> f64 {
        self.criteria.iter().map(|c| c.max_points).sum()
    }

    /// Whether the rubric has neither criteria nor text.
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty() && self.raw_text.trim().is_empty()
    }

    /// Render the rubric for inclusion in a grading prompt.
    pub fn render_for_prompt(&self) -> String {
        if !self.criteria.is_empty() {
            let mut lines = vec![format!("Rubric: {}", self.name)];
            if let Some(max) = self.declared_max() {
                lines.push(format!("Total Marks: {}", max));
            }
            lines.push(String::new());
            lines.push("Criteria:".to_string());
            for (i, criterion) in self.criteria.iter().enumerate() {
                lines.push(format!(
                    "{}. {} ({} marks)",
                    i + 1,
                    criterion.name,
                    criterion.max_points
                ));
                if !criterion.description.trim().is_empty() {
                    lines.push(format!("   {}", criterion.description.trim()));
                }
            }
            if !self.raw_text.trim().is_empty() {
                lines.push(String::new());
                lines.push(self.raw_text.trim().to_string());
            }
            lines.join("\n")
        } else if !self.raw_text.trim().is_empty() {
            format!("Rubric: {}\n\n{}", self.name, self.raw_text.trim())
        } else {
            "No rubric provided. Use general academic standards.".to_string()
        }
    }

    /// Validate the rubric structure.
    fn validate(&self) -> Result<(), RubricError> {
        if let Some(max) = self.max_points {
            if !max.is_finite() || max <= 0.0 {
                return Err(RubricError::ValidationError(format!(
                    "max_points must be positive, got {}",
                    max
                )));
            }
        }

        let mut seen = HashSet::new();
        for criterion in &self.criteria {
            if criterion.name.trim().is_empty() {
                return Err(RubricError::ValidationError(
                    "criterion name must not be empty".to_string(),
                ));
            }
            if !criterion.max_points.is_finite() || criterion.max_points < 0.0 {
                return Err(RubricError::ValidationError(format!(
                    "criterion '{}' has invalid max_points {}",
                    criterion.name, criterion.max_points
                )));
            }
            if !seen.insert(criterion.name.trim().to_lowercase()) {
                return Err(RubricError::ValidationError(format!(
                    "Duplicate criterion: {}",
                    criterion.name
                )));
            }
        }

        Ok(())
    }
}
