//! Patterns for locating JSON and score tokens in model output.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Fenced code block, optionally tagged `json`
    pub static ref FENCED_JSON: Regex = Regex::new(
        r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```"
    ).unwrap();

    /// `Score: 17/20`, `Total: 85 out of 100`
    pub static ref LABELLED_FRACTION: Regex = Regex::new(
        r#"(?i)\b(?:total\s+score|final\s+score|score|total|grade|marks?)"?\s*[:=]?\s*"?(-?\d+(?:\.\d+)?)\s*(?:/|out\s+of)\s*(\d+(?:\.\d+)?)"#
    ).unwrap();

    /// `85/100`, `85 out of 100`
    pub static ref BARE_FRACTION: Regex = Regex::new(
        r"(?i)(-?\d+(?:\.\d+)?)\s*(?:/|out\s+of)\s*(\d+(?:\.\d+)?)"
    ).unwrap();

    /// `Total: 85`, `Grade = 85`, `"score": "85"`
    pub static ref LABELLED_SCORE: Regex = Regex::new(
        r#"(?i)\b(?:total\s+score|final\s+score|score|total|grade|marks?)"?\s*[:=]\s*"?(-?\d+(?:\.\d+)?)"#
    ).unwrap();
}

/// How a heuristic score was found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreToken {
    pub value: f64,

    /// Denominator when the token was a fraction
    pub out_of: Option<f64>,
}

/// Find the first score token, trying fractions before bare labels.
///
/// Bare fractions count only when their denominator equals `max_score`,
/// so dates and ratios in prose are not mistaken for grades.
pub fn find_score(text: &str, max_score: f64) -> Option<ScoreToken> {
    if let Some(caps) = LABELLED_FRACTION.captures(text) {
        if let (Some(value), Some(out_of)) = (parse_num(caps.get(1)), parse_num(caps.get(2))) {
            return Some(ScoreToken {
                value,
                out_of: Some(out_of),
            });
        }
    }

    for caps in BARE_FRACTION.captures_iter(text) {
        if let (Some(value), Some(out_of)) = (parse_num(caps.get(1)), parse_num(caps.get(2))) {
            if (out_of - max_score).abs() < f64::EPSILON {
                return Some(ScoreToken {
                    value,
                    out_of: Some(out_of),
                });
            }
        }
    }

    LABELLED_SCORE
        .captures(text)
        .and_then(|caps| parse_num(caps.get(1)))
        .map(|value| ScoreToken {
            value,
            out_of: None,
        })
}

fn parse_num(m: Option<regex::Match<'_>>) -> Option<f64> {
    m.and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labelled_fraction() {
        let token = find_score("Overall Score: 17/20, nice.", 100.0).unwrap();
        assert_eq!(token.value, 17.0);
        assert_eq!(token.out_of, Some(20.0));
    }

    #[test]
    fn test_bare_fraction_needs_matching_denominator() {
        assert!(find_score("Submitted 3/4 of the tasks.", 100.0).is_none());

        let token = find_score("I would give this 85 out of 100.", 100.0).unwrap();
        assert_eq!(token.value, 85.0);
    }

    #[test]
    fn test_labelled_score() {
        assert_eq!(find_score("Total: 85", 100.0).unwrap().value, 85.0);
        assert_eq!(find_score("Grade = 72.5", 100.0).unwrap().value, 72.5);
        assert_eq!(find_score(r#""score": "64""#, 100.0).unwrap().value, 64.0);
    }

    #[test]
    fn test_no_score() {
        assert!(find_score("Well argued but needs citations.", 100.0).is_none());
    }
}
