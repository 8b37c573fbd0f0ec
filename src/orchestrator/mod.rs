//! Phase and iteration state machine.
//!
//! A [`Runner`] drives the executors through the loops of one mode. Loops run
//! strictly one invocation at a time; each iteration boundary checks the shared
//! cancellation token and the inter-iteration delay is itself cancellable.

mod plan;
pub mod prompts;
mod review;
mod task;

#[cfg(test)]
mod testing;

pub use prompts::Prompts;

use crate::config::Config;
use crate::error::{GitError, RunError};
use crate::executor::{ExecutionResult, Executor};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Full,
    Review,
    ExternalReview,
    TasksOnly,
    Plan,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::Full => "full",
            Mode::Review => "review",
            Mode::ExternalReview => "external-review",
            Mode::TasksOnly => "tasks-only",
            Mode::Plan => "plan",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What kind of work is happening now. Display only; never drives control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Task,
    Review,
    ExternalReview,
    SecondaryEval,
    Plan,
    Finalize,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Task => "task",
            Phase::Review => "review",
            Phase::ExternalReview => "external-review",
            Phase::SecondaryEval => "secondary-eval",
            Phase::Plan => "plan",
            Phase::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Single writer of the current phase. Loggers hold receivers.
#[derive(Debug)]
pub struct PhaseTracker {
    tx: watch::Sender<Phase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Phase::Task);
        Self { tx }
    }

    pub fn set(&self, phase: Phase) {
        self.tx.send_if_modified(|current| {
            if *current == phase {
                false
            } else {
                *current = phase;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.tx.subscribe()
    }
}

/// Settings for one orchestration run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub mode: Mode,
    pub plan_file: Option<PathBuf>,
    pub plan_description: Option<String>,
    pub max_iterations: u32,
    pub iteration_delay: Duration,
    pub task_retry_count: u32,
    pub external_review: bool,
    pub finalize: bool,
    pub default_branch: String,
    pub plans_dir: PathBuf,
}

impl RunnerConfig {
    pub fn from_config(config: &Config, mode: Mode, default_branch: String) -> Self {
        Self {
            mode,
            plan_file: None,
            plan_description: None,
            max_iterations: config.max_iterations,
            iteration_delay: Duration::from_millis(config.iteration_delay_ms),
            task_retry_count: config.task_retry_count,
            external_review: config.external_review,
            finalize: config.finalize,
            default_branch,
            plans_dir: config.plans_dir.clone(),
        }
    }

    /// Settings from the default config file values.
    #[cfg(test)]
    pub fn new(mode: Mode) -> Self {
        Self::from_config(&Config::default(), mode, "master".to_string())
    }

    pub fn review_cap(&self) -> u32 {
        (self.max_iterations / 10).max(3)
    }

    pub fn external_review_cap(&self) -> u32 {
        (self.max_iterations / 5).max(3)
    }

    pub fn plan_cap(&self) -> u32 {
        (self.max_iterations / 5).max(5)
    }
}

/// User-facing progress output.
pub trait Logger: Send + Sync {
    fn print(&self, msg: &str);

    /// Streamed tool output, written as-is.
    fn print_raw(&self, text: &str);

    fn print_section(&self, title: &str);

    /// Multi-line block, every line prefixed and indented consistently.
    fn print_aligned(&self, text: &str);

    fn warn(&self, msg: &str);

    fn log_question(&self, question: &str, options: &[String]);

    fn log_answer(&self, answer: &str);

    fn log_draft_review(&self, action: DraftAction, feedback: Option<&str>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftAction {
    Accept,
    Revise,
    Reject,
}

impl fmt::Display for DraftAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DraftAction::Accept => "accept",
            DraftAction::Revise => "revise",
            DraftAction::Reject => "reject",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftReview {
    pub action: DraftAction,
    pub feedback: Option<String>,
}

/// Interactive answers during plan drafting.
#[async_trait]
pub trait InputCollector: Send + Sync {
    async fn ask_question(&self, question: &str, options: &[String]) -> anyhow::Result<String>;

    async fn ask_draft_review(&self, draft: &str) -> anyhow::Result<DraftReview>;
}

/// Current repository commit, used to notice review iterations that changed nothing.
#[async_trait]
pub trait HeadHash: Send + Sync {
    async fn head_hash(&self) -> Result<String, GitError>;
}

/// Executor invocations per phase for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    invocations: BTreeMap<Phase, u32>,
}

impl RunStats {
    fn record(&mut self, phase: Phase) {
        *self.invocations.entry(phase).or_default() += 1;
    }

    #[cfg(test)]
    pub fn count(&self, phase: Phase) -> u32 {
        self.invocations.get(&phase).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.invocations.values().sum()
    }

    pub fn by_phase(&self) -> impl Iterator<Item = (Phase, u32)> + '_ {
        self.invocations.iter().map(|(phase, count)| (*phase, *count))
    }
}

/// Which executor an invocation goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seat {
    Primary,
    Reviewer,
    /// The secondary agent when configured, otherwise the primary.
    Evaluator,
}

pub struct Runner {
    config: RunnerConfig,
    primary: Arc<dyn Executor>,
    reviewer: Option<Arc<dyn Executor>>,
    secondary: Option<Arc<dyn Executor>>,
    logger: Arc<dyn Logger>,
    input: Option<Arc<dyn InputCollector>>,
    git: Option<Arc<dyn HeadHash>>,
    phase: PhaseTracker,
    prompts: Prompts,
    stats: RunStats,
}

impl Runner {
    pub fn new(config: RunnerConfig, primary: Arc<dyn Executor>, logger: Arc<dyn Logger>) -> Self {
        Self {
            config,
            primary,
            reviewer: None,
            secondary: None,
            logger,
            input: None,
            git: None,
            phase: PhaseTracker::new(),
            prompts: Prompts::embedded(),
            stats: RunStats::default(),
        }
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn Executor>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn with_secondary(mut self, secondary: Arc<dyn Executor>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_input(mut self, input: Arc<dyn InputCollector>) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_git(mut self, git: Arc<dyn HeadHash>) -> Self {
        self.git = Some(git);
        self
    }

    pub fn with_phase_tracker(mut self, phase: PhaseTracker) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Run the pipeline for the configured mode to completion or the first
    /// fatal error.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunStats, RunError> {
        self.validate()?;
        info!("Starting {} run", self.config.mode);

        match self.config.mode {
            Mode::Full => {
                self.run_tasks(cancel).await?;
                self.run_reviews(cancel, true).await?;
            }
            Mode::TasksOnly => self.run_tasks(cancel).await?,
            Mode::Review => self.run_reviews(cancel, true).await?,
            Mode::ExternalReview => self.run_reviews(cancel, false).await?,
            Mode::Plan => self.run_plan(cancel).await?,
        }

        info!(
            "{} run finished after {} invocations",
            self.config.mode,
            self.stats.total()
        );
        Ok(self.stats.clone())
    }

    fn validate(&self) -> Result<(), RunError> {
        let mode = self.config.mode;
        match mode {
            Mode::Full | Mode::TasksOnly => {
                let path = self
                    .config
                    .plan_file
                    .as_ref()
                    .ok_or(RunError::PlanFileRequired(mode.name()))?;
                if !path.is_file() {
                    return Err(RunError::MissingPlanFile(path.clone()));
                }
            }
            Mode::Plan => {
                let described = self
                    .config
                    .plan_description
                    .as_deref()
                    .is_some_and(|d| !d.trim().is_empty());
                if !described {
                    return Err(RunError::MissingPlanDescription);
                }
                if self.input.is_none() {
                    return Err(RunError::MissingInput);
                }
            }
            Mode::ExternalReview => {
                if !self.config.external_review || self.reviewer.is_none() {
                    return Err(RunError::MissingReviewer);
                }
            }
            Mode::Review => {}
        }

        if matches!(mode, Mode::Full | Mode::Review)
            && self.config.external_review
            && self.reviewer.is_none()
        {
            return Err(RunError::MissingReviewer);
        }

        Ok(())
    }

    /// Whether the external-review loop is part of this run.
    fn runs_external_review(&self) -> bool {
        match self.config.mode {
            Mode::ExternalReview => true,
            Mode::Full | Mode::Review => self.config.external_review,
            Mode::TasksOnly | Mode::Plan => false,
        }
    }

    /// Invoke one executor. An error in the result becomes the phase's error.
    async fn invoke(
        &mut self,
        seat: Seat,
        phase: Phase,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<ExecutionResult, RunError> {
        check_cancel(cancel)?;

        let executor = match seat {
            Seat::Primary => self.primary.clone(),
            Seat::Reviewer => self.reviewer.clone().ok_or(RunError::MissingReviewer)?,
            Seat::Evaluator => self
                .secondary
                .clone()
                .unwrap_or_else(|| self.primary.clone()),
        };

        self.phase.set(phase);
        self.stats.record(phase);
        debug!("Invoking {} for {} phase", executor.name(), phase);

        let mut result = executor.run(cancel, prompt).await;
        match result.error.take() {
            Some(e) => Err(RunError::phase(phase.name(), e)),
            None => {
                debug!(
                    "{} returned {} chars, signal {:?}",
                    executor.name(),
                    result.output.len(),
                    result.signal
                );
                Ok(result)
            }
        }
    }

    /// Render a template with the run-wide placeholders plus `extra`.
    fn render(&self, template: &str, extra: &[(&str, &str)]) -> String {
        let plan_file = self
            .config
            .plan_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(no plan file)".to_string());
        let plans_dir = self.config.plans_dir.display().to_string();

        let mut vars = vec![
            ("PLAN_FILE", plan_file.as_str()),
            ("DEFAULT_BRANCH", self.config.default_branch.as_str()),
            ("PLANS_DIR", plans_dir.as_str()),
        ];
        vars.extend_from_slice(extra);
        prompts::render(template, &vars)
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<(), RunError> {
        sleep_or_cancel(cancel, self.config.iteration_delay).await
    }
}

/// Non-blocking cancellation check for iteration boundaries.
pub fn check_cancel(cancel: &CancellationToken) -> Result<(), RunError> {
    if cancel.is_cancelled() {
        Err(RunError::Cancelled)
    } else {
        Ok(())
    }
}

/// Sleep for `delay`, returning early with [`RunError::Cancelled`] if the
/// token fires first.
pub async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> Result<(), RunError> {
    if delay.is_zero() {
        return check_cancel(cancel);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RunError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
