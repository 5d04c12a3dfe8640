//! Reviewer edits to terminal grade results.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{GradeResult, GradeStatus};

/// Errors from applying a review edit. The result is left untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReviewError {
    #[error("result has no criterion named '{0}'")]
    UnknownCriterion(String),

    #[error("{field} of {value} is outside the range 0 to {max}")]
    ScoreOutOfRange { field: String, value: f64, max: f64 },
}

/// Edit to one criterion of the breakdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CriterionEdit {
    /// Criterion label, matched case-insensitively
    pub label: String,

    #[serde(default)]
    pub points: Option<f64>,

    #[serde(default)]
    pub feedback: Option<String>,
}

/// A reviewer's overrides for one student.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewEdit {
    /// Overall score; when absent and criteria points change, the total is
    /// recomputed from the breakdown
    #[serde(default)]
    pub score: Option<f64>,

    #[serde(default)]
    pub criteria: Vec<CriterionEdit>,

    #[serde(default)]
    pub feedback: Option<String>,
}

impl ReviewEdit {
    pub fn score(score: f64) -> Self {
        Self {
            score: Some(score),
            ..Self::default()
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    pub fn with_criterion(mut self, label: impl Into<String>, points: f64) -> Self {
        self.criteria.push(CriterionEdit {
            label: label.into(),
            points: Some(points),
            feedback: None,
        });
        self
    }
}

impl GradeResult {
    /// Apply a reviewer edit.
    ///
    /// All checks run before anything is written. On success the result is
    /// marked `manually_edited`. An edit that sets the score or changes a
    /// criterion's points makes the result `success` and clears its cause;
    /// feedback-only edits leave status and cause alone.
    pub fn apply_review(&mut self, edit: &ReviewEdit) -> Result<(), ReviewError> {
        let mut breakdown = self.breakdown.clone();
        let mut points_changed = false;

        for change in &edit.criteria {
            let wanted = change.label.trim();
            let entry = breakdown
                .iter_mut()
                .find(|c| c.label.trim().eq_ignore_ascii_case(wanted))
                .ok_or_else(|| ReviewError::UnknownCriterion(change.label.clone()))?;

            if let Some(points) = change.points {
                let max = entry.max_points.unwrap_or(self.max_score);
                check_range(&entry.label, points, max)?;
                entry.points = points;
                points_changed = true;
            }
            if let Some(feedback) = &change.feedback {
                entry.feedback = feedback.clone();
            }
        }

        let score = match edit.score {
            Some(score) => Some(score),
            None if points_changed => Some(breakdown.iter().map(|c| c.points).sum()),
            None => self.score,
        };
        if let Some(score) = score {
            check_range("score", score, self.max_score)?;
        }

        self.breakdown = breakdown;
        self.score = score;
        if let Some(feedback) = &edit.feedback {
            self.feedback = feedback.clone();
        }
        self.manually_edited = true;
        if edit.score.is_some() || points_changed {
            self.status = GradeStatus::Success;
            self.cause = None;
        }
        Ok(())
    }
}

fn check_range(field: &str, value: f64, max: f64) -> Result<(), ReviewError> {
    if value.is_finite() && value >= 0.0 && value <= max {
        Ok(())
    } else {
        Err(ReviewError::ScoreOutOfRange {
            field: field.to_string(),
            value,
            max,
        })
    }
}
