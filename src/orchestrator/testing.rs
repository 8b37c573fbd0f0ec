//! In-memory collaborators for orchestrator tests.

use super::{DraftAction, DraftReview, HeadHash, InputCollector, Logger, Mode, RunnerConfig};
use crate::error::GitError;
use crate::executor::{ExecutionResult, Executor};
use crate::signal;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Run settings with no delay between iterations.
pub fn fast_config(mode: Mode) -> RunnerConfig {
    let mut config = RunnerConfig::new(mode);
    config.iteration_delay = std::time::Duration::ZERO;
    config
}

/// Executor result with the signal detected from `output`.
pub fn reply(output: &str) -> ExecutionResult {
    ExecutionResult {
        output: output.to_string(),
        signal: signal::detect(output),
        error: None,
    }
}

pub fn write_plan(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("plan.md");
    std::fs::write(&path, content).unwrap();
    path
}

/// Replays canned results in order; once exhausted it returns empty output.
pub struct ScriptedExecutor {
    name: &'static str,
    script: Mutex<VecDeque<ExecutionResult>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<ExecutionResult>) -> Arc<Self> {
        Self::named("scripted", script)
    }

    pub fn named(name: &'static str, script: Vec<ExecutionResult>) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, _cancel: &CancellationToken, prompt: &str) -> ExecutionResult {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.script.lock().unwrap().pop_front().unwrap_or_default()
    }
}

#[derive(Default)]
pub struct RecordingLogger {
    lines: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl RecordingLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    pub fn printed(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }

    fn push(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }
}

impl Logger for RecordingLogger {
    fn print(&self, msg: &str) {
        self.push(msg.to_string());
    }

    fn print_raw(&self, text: &str) {
        self.push(text.to_string());
    }

    fn print_section(&self, title: &str) {
        self.push(format!("== {} ==", title));
    }

    fn print_aligned(&self, text: &str) {
        self.push(text.to_string());
    }

    fn warn(&self, msg: &str) {
        self.warnings.lock().unwrap().push(msg.to_string());
    }

    fn log_question(&self, question: &str, _options: &[String]) {
        self.push(format!("Q: {}", question));
    }

    fn log_answer(&self, answer: &str) {
        self.push(format!("A: {}", answer));
    }

    fn log_draft_review(&self, action: DraftAction, _feedback: Option<&str>) {
        self.push(format!("draft: {}", action));
    }
}

/// Always reports the same commit.
pub struct FixedHead(pub &'static str);

#[async_trait]
impl HeadHash for FixedHead {
    async fn head_hash(&self) -> Result<String, GitError> {
        Ok(self.0.to_string())
    }
}

/// Reports a new commit on every call.
#[derive(Default)]
pub struct CountingHead(AtomicUsize);

#[async_trait]
impl HeadHash for CountingHead {
    async fn head_hash(&self) -> Result<String, GitError> {
        Ok(format!("commit-{}", self.0.fetch_add(1, Ordering::SeqCst)))
    }
}

pub struct FailingHead;

#[async_trait]
impl HeadHash for FailingHead {
    async fn head_hash(&self) -> Result<String, GitError> {
        Err(GitError::Command {
            args: "rev-parse HEAD".to_string(),
            stderr: "not a git repository".to_string(),
        })
    }
}

/// Answers questions and draft reviews from queues.
#[derive(Default)]
pub struct ScriptedInput {
    answers: Mutex<VecDeque<String>>,
    reviews: Mutex<VecDeque<DraftReview>>,
    drafts: Mutex<Vec<String>>,
}

impl ScriptedInput {
    pub fn new(answers: Vec<&str>, reviews: Vec<DraftReview>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into_iter().map(String::from).collect()),
            reviews: Mutex::new(reviews.into()),
            drafts: Mutex::new(Vec::new()),
        })
    }

    pub fn drafts(&self) -> Vec<String> {
        self.drafts.lock().unwrap().clone()
    }
}

#[async_trait]
impl InputCollector for ScriptedInput {
    async fn ask_question(&self, _question: &str, _options: &[String]) -> anyhow::Result<String> {
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted answer left"))
    }

    async fn ask_draft_review(&self, draft: &str) -> anyhow::Result<DraftReview> {
        self.drafts.lock().unwrap().push(draft.to_string());
        self.reviews
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted review left"))
    }
}

/// Waits for cancellation instead of answering.
pub struct BlockingInput;

#[async_trait]
impl InputCollector for BlockingInput {
    async fn ask_question(&self, _question: &str, _options: &[String]) -> anyhow::Result<String> {
        std::future::pending().await
    }

    async fn ask_draft_review(&self, _draft: &str) -> anyhow::Result<DraftReview> {
        std::future::pending().await
    }
}
