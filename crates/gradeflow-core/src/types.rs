//! Core grading types.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalizer::NormalizedGrade;
use crate::rubric::Rubric;

/// Placeholder used when a student id or name cannot be determined.
pub const UNKNOWN_STUDENT: &str = "Unknown";

/// Total marks used when neither the rubric nor the job declares one.
pub const DEFAULT_TOTAL_MARKS: f64 = 100.0;

/// A student on the roster, with text already extracted by ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Student {
    /// Identifier, usually derived from a filename or a detected pattern
    pub id: String,

    /// Display name, if ingestion found one
    #[serde(default)]
    pub name: Option<String>,

    /// Extracted assignment text
    pub text: String,

    /// Where the text came from (file name, page range)
    #[serde(default)]
    pub source: Option<String>,
}

impl Student {
    /// Create a student. Blank ids become [`UNKNOWN_STUDENT`].
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: clean_id(id.into()),
            name: None,
            text: text.into(),
            source: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        self.name = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    /// Set the source description.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Name for display, falling back to [`UNKNOWN_STUDENT`].
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_STUDENT)
    }
}

fn clean_id(id: String) -> String {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        UNKNOWN_STUDENT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Error returned when parsing a mode or style from a string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}' (expected one of: {expected})")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

/// Whether the model's marks are final or a suggestion for the teacher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GradingMode {
    /// Model calculates exact marks
    #[default]
    Auto,

    /// Model suggests marks, the teacher finalizes them
    Suggestion,
}

impl GradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradingMode::Auto => "auto",
            GradingMode::Suggestion => "suggestion",
        }
    }
}

impl fmt::Display for GradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GradingMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(GradingMode::Auto),
            "suggestion" | "suggestions" => Ok(GradingMode::Suggestion),
            other => Err(ParseEnumError {
                kind: "grading mode",
                value: other.to_string(),
                expected: "auto, suggestion",
            }),
        }
    }
}

/// How much feedback the model should write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStyle {
    Brief,
    #[default]
    Detailed,
}

impl FeedbackStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackStyle::Brief => "brief",
            FeedbackStyle::Detailed => "detailed",
        }
    }
}

impl fmt::Display for FeedbackStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackStyle {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brief" => Ok(FeedbackStyle::Brief),
            "detailed" => Ok(FeedbackStyle::Detailed),
            other => Err(ParseEnumError {
                kind: "feedback style",
                value: other.to_string(),
                expected: "brief, detailed",
            }),
        }
    }
}

/// Everything a provider needs to grade one student.
///
/// Built per student by the orchestrator. The rubric is shared behind an
/// `Arc` and never mutated once a job starts.
#[derive(Debug, Clone)]
pub struct GradingRequest {
    pub student: Student,
    pub rubric: Arc<Rubric>,
    pub mode: GradingMode,
    pub feedback_style: FeedbackStyle,

    /// Target total marks when the rubric declares none
    pub total_marks: f64,
}

impl GradingRequest {
    pub fn new(student: Student, rubric: Arc<Rubric>) -> Self {
        Self {
            student,
            rubric,
            mode: GradingMode::default(),
            feedback_style: FeedbackStyle::default(),
            total_marks: DEFAULT_TOTAL_MARKS,
        }
    }

    pub fn with_mode(mut self, mode: GradingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_feedback_style(mut self, style: FeedbackStyle) -> Self {
        self.feedback_style = style;
        self
    }

    pub fn with_total_marks(mut self, total_marks: f64) -> Self {
        self.total_marks = total_marks;
        self
    }

    /// Maximum score for this request: the rubric's declared maximum if it
    /// has one, otherwise the target total marks.
    pub fn max_score(&self) -> f64 {
        self.rubric.declared_max().unwrap_or(self.total_marks)
    }
}

/// Terminal outcome of grading one student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeStatus {
    /// Score recovered and within range
    Success,

    /// Provider never produced a usable response
    Failed,

    /// Partial or ambiguous output that needs a human decision
    NeedsReview,
}

impl fmt::Display for GradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradeStatus::Success => write!(f, "success"),
            GradeStatus::Failed => write!(f, "failed"),
            GradeStatus::NeedsReview => write!(f, "needs_review"),
        }
    }
}

/// Points awarded for one rubric criterion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionScore {
    pub label: String,
    pub points: f64,

    #[serde(default)]
    pub max_points: Option<f64>,

    #[serde(default)]
    pub feedback: String,
}

/// The grading outcome for one student.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradeResult {
    pub student_id: String,

    #[serde(default)]
    pub student_name: Option<String>,

    /// Recovered score, clamped to `[0, max_score]`; absent if none was found
    pub score: Option<f64>,

    pub max_score: f64,

    /// Per-criterion scores in the order the model reported them
    #[serde(default)]
    pub breakdown: Vec<CriterionScore>,

    #[serde(default)]
    pub feedback: String,

    #[serde(default)]
    pub strengths: Vec<String>,

    #[serde(default)]
    pub areas_for_improvement: Vec<String>,

    /// Provider text as received, kept for audit
    #[serde(default)]
    pub raw_response: Option<String>,

    pub status: GradeStatus,

    /// Human-readable reason for `failed` or `needs_review`
    #[serde(default)]
    pub cause: Option<String>,

    /// Provider display name
    #[serde(default)]
    pub provider: String,

    #[serde(default)]
    pub is_suggestion: bool,

    #[serde(default)]
    pub manually_edited: bool,

    /// Provider calls made for this result
    #[serde(default)]
    pub attempts: u32,

    pub graded_at: DateTime<Utc>,
}

impl GradeResult {
    /// Build a result from a normalized provider response.
    pub fn from_normalized(
        request: &GradingRequest,
        normalized: NormalizedGrade,
        raw_response: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        let status = if normalized.issue.is_some() {
            GradeStatus::NeedsReview
        } else {
            GradeStatus::Success
        };

        Self {
            student_id: request.student.id.clone(),
            student_name: request
                .student
                .name
                .clone()
                .or(normalized.student_name),
            score: normalized.score,
            max_score: request.max_score(),
            breakdown: normalized.breakdown,
            feedback: normalized.feedback,
            strengths: normalized.strengths,
            areas_for_improvement: normalized.areas_for_improvement,
            raw_response: Some(raw_response.into()),
            status,
            cause: normalized.issue.map(|issue| issue.to_string()),
            provider: provider.into(),
            is_suggestion: request.mode == GradingMode::Suggestion,
            manually_edited: false,
            attempts: 0,
            graded_at: Utc::now(),
        }
    }

    /// Build a failed result when the provider never produced a response.
    pub fn failed(
        request: &GradingRequest,
        cause: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            student_id: request.student.id.clone(),
            student_name: request.student.name.clone(),
            score: None,
            max_score: request.max_score(),
            breakdown: Vec::new(),
            feedback: String::new(),
            strengths: Vec::new(),
            areas_for_improvement: Vec::new(),
            raw_response: None,
            status: GradeStatus::Failed,
            cause: Some(cause.into()),
            provider: provider.into(),
            is_suggestion: request.mode == GradingMode::Suggestion,
            manually_edited: false,
            attempts: 0,
            graded_at: Utc::now(),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == GradeStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == GradeStatus::Failed
    }

    pub fn needs_review(&self) -> bool {
        self.status == GradeStatus::NeedsReview
    }

    /// Score as a percentage of `max_score`.
    pub fn percentage(&self) -> Option<f64> {
        match self.score {
            Some(score) if self.max_score > 0.0 => Some(score / self.max_score * 100.0),
            _ => None,
        }
    }
}
