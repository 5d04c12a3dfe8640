//! Prompt construction for grading requests.
//!
//! Every adapter sends the same two-part prompt: a system prompt that fixes
//! the grader's role and output format, and a user prompt carrying the
//! rubric and the student's text. Only the envelope differs per provider.

use crate::types::{FeedbackStyle, GradingMode, GradingRequest};

/// Base system prompt shared by every grading request.
pub const BASE_SYSTEM_PROMPT: &str = r#"
You are an experienced teacher grading student assignments against a rubric.

## Grading Rules
1. Grade ONLY against the rubric you are given
2. Award marks per criterion and never exceed a criterion's maximum
3. The total score must not exceed the maximum score
4. Quote or paraphrase the student's work when justifying marks
5. Be fair, consistent and constructive

## Output Format (JSON only, no prose outside the object)
{
  "student_name": "name if it appears in the assignment, else null",
  "score": number,
  "max_score": number,
  "breakdown": [
    {
      "criterion": "criterion name from the rubric",
      "points": number,
      "max_points": number,
      "feedback": "why these points were awarded"
    }
  ],
  "feedback": "overall feedback for the student",
  "strengths": ["strength 1", "strength 2"],
  "areas_for_improvement": ["area 1", "area 2"]
}
"#;

const BRIEF_STYLE: &str = "Keep feedback brief: one or two sentences per criterion and \
a short overall comment.";

const DETAILED_STYLE: &str = "Give detailed feedback: explain each criterion's marks, \
point to specific passages and suggest concrete next steps.";

const AUTO_INSTRUCTION: &str = "Calculate exact marks for each criterion. The marks you \
return are final.";

const SUGGESTION_INSTRUCTION: &str = "Suggest marks for each criterion. A teacher will \
review and finalize them, so flag anything you are unsure about in the feedback.";

/// Minimal prompt for connection tests.
pub const CONNECTION_TEST_PROMPT: &str = "Reply with the single word: OK";

/// System and user prompt for one grading call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradingPrompt {
    pub system: String,
    pub user: String,
}

impl GradingPrompt {
    /// Build the prompt for a request.
    pub fn for_request(request: &GradingRequest) -> Self {
        Self {
            system: system_prompt(request.feedback_style),
            user: user_prompt(request),
        }
    }

    /// Prompt size in bytes, system and user together.
    pub fn byte_len(&self) -> usize {
        self.system.len() + self.user.len()
    }
}

fn system_prompt(style: FeedbackStyle) -> String {
    let style_line = match style {
        FeedbackStyle::Brief => BRIEF_STYLE,
        FeedbackStyle::Detailed => DETAILED_STYLE,
    };
    format!("{}\n## Feedback Style\n{}\n", BASE_SYSTEM_PROMPT.trim(), style_line)
}

fn user_prompt(request: &GradingRequest) -> String {
    let mode_line = match request.mode {
        GradingMode::Auto => AUTO_INSTRUCTION,
        GradingMode::Suggestion => SUGGESTION_INSTRUCTION,
    };

    format!(
        "## Rubric\n{rubric}\n\n\
         ## Maximum Score\n{max}\n\n\
         ## Instructions\n{mode}\n\n\
         ## Student Submission (id: {id})\n{text}\n\n\
         Respond with the JSON object only.",
        rubric = request.rubric.render_for_prompt(),
        max = request.max_score(),
        mode = mode_line,
        id = request.student.id,
        text = request.student.text.trim(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::{Rubric, RubricCriterion};
    use crate::types::Student;
    use std::sync::Arc;

    fn request() -> GradingRequest {
        let rubric = Rubric::from_text("", "Essay")
            .with_criterion(RubricCriterion::new("Thesis", "", 30.0))
            .with_criterion(RubricCriterion::new("Evidence", "", 20.0));
        GradingRequest::new(Student::new("s-7", "  The essay body.  "), Arc::new(rubric))
    }

    #[test]
    fn test_user_prompt_carries_rubric_and_submission() {
        let prompt = GradingPrompt::for_request(&request());
        assert!(prompt.user.contains("1. Thesis (30 marks)"));
        assert!(prompt.user.contains("## Maximum Score\n50"));
        assert!(prompt.user.contains("(id: s-7)\nThe essay body."));
        assert!(prompt.user.contains(AUTO_INSTRUCTION));
    }

    #[test]
    fn test_mode_and_style_change_prompt() {
        let prompt = GradingPrompt::for_request(
            &request()
                .with_mode(GradingMode::Suggestion)
                .with_feedback_style(FeedbackStyle::Brief),
        );
        assert!(prompt.user.contains(SUGGESTION_INSTRUCTION));
        assert!(prompt.system.contains(BRIEF_STYLE));
        assert!(!prompt.system.contains(DETAILED_STYLE));
    }

    #[test]
    fn test_system_prompt_describes_json_shape() {
        let prompt = GradingPrompt::for_request(&request());
        assert!(prompt.system.contains("\"breakdown\""));
        assert!(prompt.system.contains("\"areas_for_improvement\""));
    }

    #[test]
    fn test_byte_len_tracks_student_text() {
        let short = GradingPrompt::for_request(&request());
        let mut long_request = request();
        long_request.student.text = format!("The essay body.{}", "x".repeat(1000));
        let long = GradingPrompt::for_request(&long_request);

        assert_eq!(short.byte_len(), short.system.len() + short.user.len());
        assert_eq!(long.byte_len(), short.byte_len() + 1000);
    }
}
