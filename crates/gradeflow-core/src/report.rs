//! Exporter hand-off: ordered results plus summary statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{GradeResult, GradeStatus};

/// Aggregate statistics over a set of results.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReportSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub needs_review: usize,

    /// Statistics over results that carry a score
    pub average_score: Option<f64>,
    pub highest_score: Option<f64>,
    pub lowest_score: Option<f64>,
    pub average_percentage: Option<f64>,
}

impl ReportSummary {
    pub fn from_results(results: &[GradeResult]) -> Self {
        let count = |status: GradeStatus| results.iter().filter(|r| r.status == status).count();

        let scores: Vec<f64> = results.iter().filter_map(|r| r.score).collect();
        let percentages: Vec<f64> = results.iter().filter_map(GradeResult::percentage).collect();

        Self {
            total: results.len(),
            succeeded: count(GradeStatus::Success),
            failed: count(GradeStatus::Failed),
            needs_review: count(GradeStatus::NeedsReview),
            average_score: mean(&scores),
            highest_score: scores.iter().copied().reduce(f64::max),
            lowest_score: scores.iter().copied().reduce(f64::min),
            average_percentage: mean(&percentages),
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Final results of a session, in roster order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingReport {
    pub session_id: String,
    pub generated_at: DateTime<Utc>,

    /// Provider display name
    pub provider: String,

    pub summary: ReportSummary,
    pub results: Vec<GradeResult>,
}

impl GradingReport {
    pub fn new(
        session_id: impl Into<String>,
        provider: impl Into<String>,
        results: Vec<GradeResult>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            generated_at: Utc::now(),
            provider: provider.into(),
            summary: ReportSummary::from_results(&results),
            results,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
