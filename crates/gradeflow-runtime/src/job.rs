//! The input to one grading session.

use std::sync::Arc;

use gradeflow_core::{FeedbackStyle, GradingMode, GradingRequest, Rubric, Student};

use crate::config::RuntimeConfig;

/// An ordered roster and the rubric it is graded against.
///
/// Roster order fixes slot order for the session's lifetime.
#[derive(Debug, Clone)]
pub struct GradingJob {
    pub students: Vec<Student>,
    pub rubric: Arc<Rubric>,
    pub mode: GradingMode,
    pub feedback_style: FeedbackStyle,
    pub total_marks: f64,
}

impl GradingJob {
    pub fn new(students: Vec<Student>, rubric: Rubric) -> Self {
        Self::with_config(students, rubric, &RuntimeConfig::default())
    }

    /// Job using the mode, style and total marks from `config`.
    pub fn with_config(students: Vec<Student>, rubric: Rubric, config: &RuntimeConfig) -> Self {
        Self {
            students,
            rubric: Arc::new(rubric),
            mode: config.mode,
            feedback_style: config.feedback_style,
            total_marks: config.default_total_marks,
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

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    /// Request for the student in slot `index`.
    pub fn request(&self, index: usize) -> Option<GradingRequest> {
        self.students.get(index).map(|student| {
            GradingRequest::new(student.clone(), Arc::clone(&self.rubric))
                .with_mode(self.mode)
                .with_feedback_style(self.feedback_style)
                .with_total_marks(self.total_marks)
        })
    }

    /// Slot of the first student with `student_id`.
    pub fn position(&self, student_id: &str) -> Option<usize> {
        self.students.iter().position(|s| s.id == student_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_share_rubric() {
        let job = GradingJob::new(
            vec![Student::new("a", "one"), Student::new("b", "two")],
            Rubric::from_text("Be clear.", "Essay"),
        )
        .with_mode(GradingMode::Suggestion)
        .with_total_marks(20.0);

        let first = job.request(0).unwrap();
        let second = job.request(1).unwrap();
        assert!(Arc::ptr_eq(&first.rubric, &second.rubric));
        assert_eq!(first.mode, GradingMode::Suggestion);
        assert_eq!(second.max_score(), 20.0);
        assert!(job.request(2).is_none());
    }

    #[test]
    fn test_position_returns_first_duplicate() {
        let job = GradingJob::new(
            vec![
                Student::new("dup", "one"),
                Student::new("x", "two"),
                Student::new("dup", "three"),
            ],
            Rubric::from_text("", "Quiz"),
        );
        assert_eq!(job.position("dup"), Some(0));
        assert_eq!(job.position("missing"), None);
    }
}
