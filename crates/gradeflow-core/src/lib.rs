//! # gradeflow-core
//!
//! Deterministic building blocks for AI-assisted grading.
//!
//! This crate owns the data that flows through a grading job and the
//! pieces of the pipeline that never touch the network:
//! - The roster, rubric and per-student [`GradingRequest`]
//! - Prompt construction for a request ([`GradingPrompt`])
//! - The two-tier [`normalizer`] that turns free-form model output into a
//!   [`GradeResult`]
//! - Reviewer edits ([`ReviewEdit`]) and the exporter hand-off
//!   ([`GradingReport`])
//!
//! ## Key Guarantees
//!
//! 1. **No I/O**: provider calls live in `gradeflow-runtime`
//! 2. **Never throws on model output**: malformed responses become
//!    `needs_review` results, not errors
//! 3. **Stable shape**: every student yields exactly one `GradeResult`
//!
//! ## Example
//!
//! ```rust,ignore
//! use gradeflow_core::{normalize, Rubric, Student};
//!
//! let rubric = Rubric::from_text("Clarity (40)\nCorrectness (60)", "Essay");
//! let student = Student::new("s-001", "My essay...");
//! let grade = normalize(r#"{"score": 85, "feedback": "Solid work."}"#, 100.0);
//! assert_eq!(grade.score, Some(85.0));
//! ```

pub mod normalizer;
pub mod prompt;
pub mod report;
pub mod review;
pub mod rubric;
pub mod types;

// Re-export main types at crate root
pub use normalizer::{normalize, NormalizationError, NormalizedGrade, ParseTier};
pub use prompt::{GradingPrompt, CONNECTION_TEST_PROMPT};
pub use report::{GradingReport, ReportSummary};
pub use review::{CriterionEdit, ReviewEdit, ReviewError};
pub use rubric::{Rubric, RubricCriterion, RubricError};
pub use types::{
    CriterionScore, FeedbackStyle, GradeResult, GradeStatus, GradingMode, GradingRequest,
    ParseEnumError, Student, DEFAULT_TOTAL_MARKS, UNKNOWN_STUDENT,
};
