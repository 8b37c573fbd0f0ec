//! Terminal collaborators: phase-coloured progress output and interactive input.

use crate::executor::OutputSink;
use crate::orchestrator::{DraftAction, DraftReview, InputCollector, Logger, Phase};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use crossterm::style::{Color, Stylize};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Select};
use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

fn phase_color(phase: Phase) -> Color {
    match phase {
        Phase::Task => Color::Green,
        Phase::Review => Color::Cyan,
        Phase::ExternalReview => Color::Magenta,
        Phase::SecondaryEval => Color::Blue,
        Phase::Plan => Color::Yellow,
        Phase::Finalize => Color::White,
    }
}

fn timestamp() -> String {
    Local::now().format("[%H:%M:%S]").to_string()
}

/// Prefix every non-empty line that starts inside `text` with `stamp`.
///
/// `at_line_start` says whether the previous chunk ended a line; the returned
/// flag carries that state to the next chunk.
fn stamp_lines(text: &str, at_line_start: bool, stamp: &str) -> (String, bool) {
    let mut out = String::with_capacity(text.len() + stamp.len());
    let mut line_start = at_line_start;

    for segment in text.split_inclusive('\n') {
        if line_start && segment != "\n" {
            out.push_str(stamp);
            out.push(' ');
        }
        out.push_str(segment);
        line_start = segment.ends_with('\n');
    }

    (out, line_start)
}

/// Writes timestamped progress to stdout in the colour of the current phase.
pub struct ConsoleLogger {
    phase: watch::Receiver<Phase>,
    color: bool,
    at_line_start: Mutex<bool>,
}

impl ConsoleLogger {
    pub fn new(phase: watch::Receiver<Phase>) -> Self {
        let color = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        Self {
            phase,
            color,
            at_line_start: Mutex::new(true),
        }
    }

    /// Sink that streams executor output through this logger.
    pub fn sink(self: &Arc<Self>) -> OutputSink {
        let logger = Arc::clone(self);
        Arc::new(move |text: &str| logger.print_raw(text))
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.color {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }

    fn current_color(&self) -> Color {
        phase_color(*self.phase.borrow())
    }

    /// Write whole lines, first closing any line left open by streamed output.
    fn write_lines(&self, text: &str, color: Color) {
        let mut at_line_start = self
            .at_line_start
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut out = String::new();
        if !*at_line_start {
            out.push('\n');
        }
        let (stamped, _) = stamp_lines(text, true, &timestamp());
        out.push_str(&self.paint(stamped.trim_end_matches('\n'), color));
        out.push('\n');
        *at_line_start = true;

        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(out.as_bytes());
        let _ = stdout.flush();
    }
}

impl Logger for ConsoleLogger {
    fn print(&self, msg: &str) {
        self.write_lines(msg, self.current_color());
    }

    fn print_raw(&self, text: &str) {
        let mut at_line_start = self
            .at_line_start
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let (stamped, ends_line) = stamp_lines(text, *at_line_start, &timestamp());
        *at_line_start = ends_line;

        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(self.paint(&stamped, self.current_color()).as_bytes());
        let _ = stdout.flush();
    }

    fn print_section(&self, title: &str) {
        let line = format!("--- {} ---", title);
        let line = if self.color {
            line.with(self.current_color()).bold().to_string()
        } else {
            line
        };
        self.write_lines(&format!("\n{}", line), Color::Reset);
    }

    fn print_aligned(&self, text: &str) {
        let indented: Vec<String> = text.lines().map(|line| format!("    {}", line)).collect();
        self.write_lines(&indented.join("\n"), self.current_color());
    }

    fn warn(&self, msg: &str) {
        self.write_lines(&format!("WARNING: {}", msg), Color::Yellow);
    }

    fn log_question(&self, question: &str, options: &[String]) {
        let mut text = format!("QUESTION: {}", question);
        for (i, option) in options.iter().enumerate() {
            text.push_str(&format!("\n  {}) {}", i + 1, option));
        }
        self.write_lines(&text, Color::Yellow);
    }

    fn log_answer(&self, answer: &str) {
        self.write_lines(&format!("ANSWER: {}", answer), Color::Yellow);
    }

    fn log_draft_review(&self, action: DraftAction, feedback: Option<&str>) {
        let text = match feedback {
            Some(feedback) if !feedback.trim().is_empty() => {
                format!("DRAFT REVIEW: {} ({})", action, feedback.trim())
            }
            _ => format!("DRAFT REVIEW: {}", action),
        };
        self.write_lines(&text, Color::Yellow);
    }
}

const OTHER_ANSWER: &str = "Other (type your own answer)";

/// Asks the user through the terminal. Prompts block, so they run on the
/// blocking pool.
#[derive(Debug, Default)]
pub struct TerminalInput;

impl TerminalInput {
    /// `None` when stdin is not interactive.
    pub fn detect() -> Option<Self> {
        std::io::stdin().is_terminal().then_some(Self)
    }
}

#[async_trait]
impl InputCollector for TerminalInput {
    async fn ask_question(&self, question: &str, options: &[String]) -> Result<String> {
        let question = question.to_string();
        let options = options.to_vec();

        tokio::task::spawn_blocking(move || ask_question_blocking(&question, &options))
            .await
            .context("Question prompt task failed")?
    }

    async fn ask_draft_review(&self, draft: &str) -> Result<DraftReview> {
        let draft = draft.to_string();

        tokio::task::spawn_blocking(move || ask_draft_review_blocking(&draft))
            .await
            .context("Draft review prompt task failed")?
    }
}

fn ask_question_blocking(question: &str, options: &[String]) -> Result<String> {
    let theme = ColorfulTheme::default();

    if options.is_empty() {
        let answer: String = Input::with_theme(&theme)
            .with_prompt(question)
            .interact_text()?;
        return Ok(answer);
    }

    let mut items: Vec<&str> = options.iter().map(String::as_str).collect();
    items.push(OTHER_ANSWER);

    let selection = Select::with_theme(&theme)
        .with_prompt(question)
        .items(&items)
        .default(0)
        .interact()?;

    if selection < options.len() {
        return Ok(options[selection].clone());
    }

    let answer: String = Input::with_theme(&theme)
        .with_prompt("Your answer")
        .interact_text()?;
    Ok(answer)
}

fn ask_draft_review_blocking(draft: &str) -> Result<DraftReview> {
    println!("\n{}\n", draft.trim());

    let theme = ColorfulTheme::default();
    let choices = ["Accept", "Revise", "Reject"];
    let selection = Select::with_theme(&theme)
        .with_prompt("Review the draft plan")
        .items(&choices)
        .default(0)
        .interact()?;

    let review = match selection {
        0 => DraftReview {
            action: DraftAction::Accept,
            feedback: None,
        },
        1 => {
            let feedback: String = Input::with_theme(&theme)
                .with_prompt("What should change?")
                .interact_text()?;
            DraftReview {
                action: DraftAction::Revise,
                feedback: Some(feedback),
            }
        }
        _ => DraftReview {
            action: DraftAction::Reject,
            feedback: None,
        },
    };
    Ok(review)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_lines_prefixes_each_new_line() {
        let (out, open) = stamp_lines("one\ntwo\n", true, "[t]");
        assert_eq!(out, "[t] one\n[t] two\n");
        assert!(open);
    }

    #[test]
    fn test_stamp_lines_continues_open_line() {
        let (out, open) = stamp_lines("Hel", true, "[t]");
        assert_eq!(out, "[t] Hel");
        assert!(!open);

        let (out, open) = stamp_lines("lo\nwor", open, "[t]");
        assert_eq!(out, "lo\n[t] wor");
        assert!(!open);
    }

    #[test]
    fn test_stamp_lines_leaves_blank_lines_bare() {
        let (out, open) = stamp_lines("\n--- task ---", true, "[t]");
        assert_eq!(out, "\n[t] --- task ---");
        assert!(!open);
    }

    #[test]
    fn test_phase_colors_are_distinct() {
        let phases = [
            Phase::Task,
            Phase::Review,
            Phase::ExternalReview,
            Phase::SecondaryEval,
            Phase::Plan,
            Phase::Finalize,
        ];
        for (i, a) in phases.iter().enumerate() {
            for b in &phases[i + 1..] {
                assert_ne!(phase_color(*a), phase_color(*b));
            }
        }
    }
}
