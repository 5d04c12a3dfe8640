//! Response normalization.
//!
//! Turns free-form model output into a [`NormalizedGrade`] in two tiers:
//!
//! 1. **Strict**: locate a JSON object, validate it against the embedded
//!    response schema and read the structured fields.
//! 2. **Heuristic**: regex-locate a score token and keep the whole text as
//!    feedback.
//!
//! Normalization never fails. Anything short of a clean, in-range score is
//! reported through [`NormalizedGrade::issue`] so the caller can mark the
//! result for review.

mod patterns;
mod schema;

pub use patterns::{find_score, ScoreToken};
pub use schema::validate_grade_response;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CriterionScore;

/// Why a response could not be accepted as-is.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizationError {
    #[error("unparseable response: no structured grade or score found")]
    Unparseable,

    #[error("response has no score")]
    MissingScore,

    #[error("score {reported} is outside the range 0 to {max}")]
    ScoreOutOfRange { reported: f64, max: f64 },
}

/// Which tier produced the grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseTier {
    Strict,
    Heuristic,
    None,
}

/// Normalized view of one model response.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedGrade {
    /// Score clamped to `[0, max_score]`
    pub score: Option<f64>,
    pub breakdown: Vec<CriterionScore>,
    pub feedback: String,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub student_name: Option<String>,
    pub tier: ParseTier,
    pub issue: Option<NormalizationError>,
}

impl NormalizedGrade {
    fn empty(feedback: String, tier: ParseTier) -> Self {
        Self {
            score: None,
            breakdown: Vec::new(),
            feedback,
            strengths: Vec::new(),
            areas_for_improvement: Vec::new(),
            student_name: None,
            tier,
            issue: None,
        }
    }

    /// Whether the grade can be accepted without review.
    pub fn is_clean(&self) -> bool {
        self.issue.is_none() && self.score.is_some()
    }
}

/// Structured response, after schema validation.
#[derive(Debug, Deserialize)]
struct StructuredResponse {
    #[serde(default, alias = "total_score")]
    score: Option<f64>,

    #[serde(default, alias = "grades")]
    breakdown: Vec<StructuredCriterion>,

    #[serde(default, alias = "overall_feedback")]
    feedback: String,

    #[serde(default)]
    strengths: Vec<String>,

    #[serde(default)]
    areas_for_improvement: Vec<String>,

    #[serde(default)]
    student_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StructuredCriterion {
    #[serde(default, alias = "criterion", alias = "name")]
    label: String,

    #[serde(alias = "marks")]
    points: f64,

    #[serde(default, alias = "max_marks")]
    max_points: Option<f64>,

    #[serde(default)]
    feedback: String,
}

impl From<StructuredCriterion> for CriterionScore {
    fn from(c: StructuredCriterion) -> Self {
        CriterionScore {
            label: c.label,
            points: c.points,
            max_points: c.max_points,
            feedback: c.feedback,
        }
    }
}

/// Normalize raw model output against a maximum score.
pub fn normalize(raw: &str, max_score: f64) -> NormalizedGrade {
    let text = raw.trim();
    if text.is_empty() {
        let mut grade = NormalizedGrade::empty(String::new(), ParseTier::None);
        grade.issue = Some(NormalizationError::Unparseable);
        return grade;
    }

    let candidate = locate_json_object(text);

    if let Some(value) = &candidate {
        match validate_grade_response(value) {
            Ok(()) => match serde_json::from_value::<StructuredResponse>(value.clone()) {
                Ok(structured) => return from_structured(structured, max_score),
                Err(e) => {
                    tracing::debug!(error = %e, "Schema-valid response did not decode");
                }
            },
            Err(errors) => {
                tracing::debug!(
                    violations = errors.len(),
                    first = errors.first().map(String::as_str).unwrap_or_default(),
                    "Response JSON failed schema validation"
                );
            }
        }
    }

    from_heuristic(text, max_score, candidate.is_some())
}

fn from_structured(structured: StructuredResponse, max_score: f64) -> NormalizedGrade {
    let breakdown: Vec<CriterionScore> = structured
        .breakdown
        .into_iter()
        .map(CriterionScore::from)
        .collect();

    let score = structured.score.or_else(|| {
        if breakdown.is_empty() {
            None
        } else {
            Some(breakdown.iter().map(|c| c.points).sum())
        }
    });

    let mut grade = NormalizedGrade::empty(structured.feedback.trim().to_string(), ParseTier::Strict);
    grade.breakdown = breakdown;
    grade.strengths = structured.strengths;
    grade.areas_for_improvement = structured.areas_for_improvement;
    grade.student_name = structured
        .student_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    match score {
        Some(score) => apply_range(&mut grade, score, max_score),
        None => grade.issue = Some(NormalizationError::MissingScore),
    }
    grade
}

fn from_heuristic(text: &str, max_score: f64, found_structure: bool) -> NormalizedGrade {
    let mut grade = NormalizedGrade::empty(text.to_string(), ParseTier::Heuristic);

    match find_score(text, max_score) {
        Some(token) => {
            let score = match token.out_of {
                Some(out_of) if out_of > 0.0 && (out_of - max_score).abs() >= f64::EPSILON => {
                    token.value / out_of * max_score
                }
                _ => token.value,
            };
            apply_range(&mut grade, score, max_score);
        }
        None => {
            grade.tier = ParseTier::None;
            grade.issue = Some(if found_structure {
                NormalizationError::MissingScore
            } else {
                NormalizationError::Unparseable
            });
        }
    }
    grade
}

fn apply_range(grade: &mut NormalizedGrade, score: f64, max_score: f64) {
    if !score.is_finite() {
        grade.issue = Some(NormalizationError::MissingScore);
        return;
    }

    let upper = max_score.max(0.0);
    if score < 0.0 || score > upper {
        grade.score = Some(score.clamp(0.0, upper));
        grade.issue = Some(NormalizationError::ScoreOutOfRange {
            reported: score,
            max: max_score,
        });
    } else {
        grade.score = Some(score);
    }
}

/// Locate a JSON object: whole text, fenced block, then outermost braces.
fn locate_json_object(text: &str) -> Option<serde_json::Value> {
    let parse_object = |s: &str| -> Option<serde_json::Value> {
        serde_json::from_str::<serde_json::Value>(s)
            .ok()
            .filter(|v| v.is_object())
    };

    if let Some(value) = parse_object(text) {
        return Some(value);
    }

    if let Some(value) = patterns::FENCED_JSON
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| parse_object(m.as_str()))
    {
        return Some(value);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(&text[start..=end])
}
