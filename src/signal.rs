//! Completion protocol embedded in agent output.
//!
//! Simple signals are bare tokens such as `<<<RALPHEX:ALL_TASKS_DONE>>>`.
//! QUESTION and PLAN_DRAFT open a block that must be closed by
//! `<<<RALPHEX:END>>>`.

use crate::error::SignalError;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::sync::LazyLock;

pub const END_TOKEN: &str = "<<<RALPHEX:END>>>";

static FENCED_PAYLOAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?```$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    TaskDone,
    TaskFailed,
    ReviewDone,
    ExternalReviewDone,
    PlanReady,
    Question,
    PlanDraft,
}

impl Signal {
    pub const ALL: [Signal; 7] = [
        Signal::TaskDone,
        Signal::TaskFailed,
        Signal::ReviewDone,
        Signal::ExternalReviewDone,
        Signal::PlanReady,
        Signal::Question,
        Signal::PlanDraft,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Signal::TaskDone => "ALL_TASKS_DONE",
            Signal::TaskFailed => "TASK_FAILED",
            Signal::ReviewDone => "REVIEW_DONE",
            Signal::ExternalReviewDone => "CODEX_REVIEW_DONE",
            Signal::PlanReady => "PLAN_READY",
            Signal::Question => "QUESTION",
            Signal::PlanDraft => "PLAN_DRAFT",
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Signal::TaskDone => "<<<RALPHEX:ALL_TASKS_DONE>>>",
            Signal::TaskFailed => "<<<RALPHEX:TASK_FAILED>>>",
            Signal::ReviewDone => "<<<RALPHEX:REVIEW_DONE>>>",
            Signal::ExternalReviewDone => "<<<RALPHEX:CODEX_REVIEW_DONE>>>",
            Signal::PlanReady => "<<<RALPHEX:PLAN_READY>>>",
            Signal::Question => "<<<RALPHEX:QUESTION>>>",
            Signal::PlanDraft => "<<<RALPHEX:PLAN_DRAFT>>>",
        }
    }

    /// Bare completion markers, as opposed to block openers.
    pub fn is_completion(self) -> bool {
        !matches!(self, Signal::Question | Signal::PlanDraft)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Find the signal whose token appears last in `text`.
pub fn detect(text: &str) -> Option<Signal> {
    Signal::ALL
        .iter()
        .filter_map(|signal| text.rfind(signal.token()).map(|pos| (pos, *signal)))
        .max_by_key(|(pos, _)| *pos)
        .map(|(_, signal)| signal)
}

/// Remove every complete completion marker from `text`.
///
/// The flag reports whether anything was removed.
pub fn remove_completion_markers(text: &str) -> (String, bool) {
    let mut cleaned = text.to_string();
    let mut removed = false;
    for signal in Signal::ALL.iter().filter(|s| s.is_completion()) {
        if cleaned.contains(signal.token()) {
            cleaned = cleaned.replace(signal.token(), "");
            removed = true;
        }
    }
    (cleaned, removed)
}

/// Length of the longest suffix of `text` that could still grow into a
/// completion marker.
pub fn partial_marker_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let longest = Signal::ALL
        .iter()
        .filter(|s| s.is_completion())
        .map(|s| s.token().len() - 1)
        .max()
        .unwrap_or(0)
        .min(bytes.len());

    (1..=longest)
        .rev()
        .find(|&len| {
            let suffix = &bytes[bytes.len() - len..];
            Signal::ALL
                .iter()
                .filter(|s| s.is_completion())
                .any(|s| s.token().as_bytes().starts_with(suffix))
        })
        .unwrap_or(0)
}

/// A clarifying question raised while drafting a plan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Question {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Parse the last QUESTION block in `text`, if any.
pub fn parse_question(text: &str) -> Result<Option<Question>, SignalError> {
    let Some(payload) = extract_block(text, Signal::Question)? else {
        return Ok(None);
    };

    let question: Question =
        serde_json::from_str(payload).map_err(|e| SignalError::InvalidPayload {
            kind: Signal::Question.name(),
            reason: e.to_string(),
        })?;

    if question.question.trim().is_empty() {
        return Err(SignalError::InvalidPayload {
            kind: Signal::Question.name(),
            reason: "question text is empty".to_string(),
        });
    }

    Ok(Some(question))
}

/// Parse the last PLAN_DRAFT block in `text`, if any.
pub fn parse_plan_draft(text: &str) -> Result<Option<String>, SignalError> {
    let Some(payload) = extract_block(text, Signal::PlanDraft)? else {
        return Ok(None);
    };

    if payload.is_empty() {
        return Err(SignalError::InvalidPayload {
            kind: Signal::PlanDraft.name(),
            reason: "draft is empty".to_string(),
        });
    }

    Ok(Some(payload.to_string()))
}

fn extract_block(text: &str, signal: Signal) -> Result<Option<&str>, SignalError> {
    let Some(start) = text.rfind(signal.token()) else {
        return Ok(None);
    };

    let body = &text[start + signal.token().len()..];
    let end = body
        .find(END_TOKEN)
        .ok_or(SignalError::Unterminated(signal.name()))?;

    let payload = body[..end].trim();
    let payload = FENCED_PAYLOAD
        .captures(payload)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(payload);

    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_single_signal() {
        assert_eq!(
            detect("all good <<<RALPHEX:ALL_TASKS_DONE>>>"),
            Some(Signal::TaskDone)
        );
        assert_eq!(detect("no markers here"), None);
    }

    #[test]
    fn test_detect_last_signal_wins() {
        let text = "<<<RALPHEX:TASK_FAILED>>> then recovered <<<RALPHEX:ALL_TASKS_DONE>>>";
        assert_eq!(detect(text), Some(Signal::TaskDone));

        let text = "<<<RALPHEX:ALL_TASKS_DONE>>> oops <<<RALPHEX:TASK_FAILED>>>";
        assert_eq!(detect(text), Some(Signal::TaskFailed));
    }

    #[test]
    fn test_detect_ignores_other_namespaces() {
        assert_eq!(detect("<<<OTHER:ALL_TASKS_DONE>>>"), None);
    }

    #[test]
    fn test_remove_markers_keeps_surrounding_text() {
        let (cleaned, removed) = remove_completion_markers("done here <<<RALPHEX:REVIEW_DONE>>> bye");
        assert_eq!(cleaned, "done here  bye");
        assert!(removed);

        let (cleaned, removed) = remove_completion_markers("plain text");
        assert_eq!(cleaned, "plain text");
        assert!(!removed);
    }

    #[test]
    fn test_remove_leaves_block_openers_alone() {
        let text = "<<<RALPHEX:QUESTION>>>";
        assert_eq!(remove_completion_markers(text), (text.to_string(), false));
    }

    #[test]
    fn test_partial_marker_len() {
        assert_eq!(partial_marker_len("done <<<RALPHEX:ALL_TA"), "<<<RALPHEX:ALL_TA".len());
        assert_eq!(partial_marker_len("a <"), 1);
        assert_eq!(partial_marker_len("no marker"), 0);
        assert_eq!(partial_marker_len("<<<RALPHEX:QUESTI"), 0);
        assert_eq!(partial_marker_len(""), 0);
        assert_eq!(partial_marker_len("naïve"), 0);
    }

    #[test]
    fn test_parse_question_block() {
        let text = r#"I need to know something.
<<<RALPHEX:QUESTION>>>
{"question": "Which database?", "options": ["sqlite", "postgres"]}
<<<RALPHEX:END>>>"#;
        let question = parse_question(text).unwrap().unwrap();
        assert_eq!(question.question, "Which database?");
        assert_eq!(question.options, vec!["sqlite", "postgres"]);
    }

    #[test]
    fn test_parse_question_in_code_fence() {
        let text = "<<<RALPHEX:QUESTION>>>\n```json\n{\"question\": \"Scope?\"}\n```\n<<<RALPHEX:END>>>";
        let question = parse_question(text).unwrap().unwrap();
        assert_eq!(question.question, "Scope?");
        assert!(question.options.is_empty());
    }

    #[test]
    fn test_parse_question_absent() {
        assert_eq!(parse_question("just text").unwrap(), None);
    }

    #[test]
    fn test_parse_question_unterminated() {
        let text = "<<<RALPHEX:QUESTION>>>\n{\"question\": \"Which?\"}";
        assert_eq!(
            parse_question(text),
            Err(SignalError::Unterminated("QUESTION"))
        );
    }

    #[test]
    fn test_parse_question_invalid_json() {
        let text = "<<<RALPHEX:QUESTION>>>not json<<<RALPHEX:END>>>";
        assert!(matches!(
            parse_question(text),
            Err(SignalError::InvalidPayload { kind: "QUESTION", .. })
        ));
    }

    #[test]
    fn test_parse_plan_draft() {
        let text = "<<<RALPHEX:PLAN_DRAFT>>>\n# Plan\n- [ ] step one\n<<<RALPHEX:END>>>";
        assert_eq!(
            parse_plan_draft(text).unwrap().as_deref(),
            Some("# Plan\n- [ ] step one")
        );
    }

    #[test]
    fn test_parse_plan_draft_unterminated() {
        let text = "<<<RALPHEX:PLAN_DRAFT>>>\n# Plan\n- [ ] step one";
        assert_eq!(
            parse_plan_draft(text),
            Err(SignalError::Unterminated("PLAN_DRAFT"))
        );
    }
}
