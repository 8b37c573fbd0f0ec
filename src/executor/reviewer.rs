use super::stream::{next_line_lossy, Decoded};
use super::{finish, tail, ExecutionResult, Executor, Invocation, OutputSink, PatternScanner};
use crate::config::ReviewerConfig;
use crate::error::ExecutorError;
use crate::process::{launch, LaunchOptions};
use crate::signal;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_MODEL: &str = "gpt-5-codex";
pub const DEFAULT_REASONING_EFFORT: &str = "xhigh";
pub const DEFAULT_SANDBOX: &str = "read-only";
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 3_600_000;

const SEPARATOR_MIN_DASHES: usize = 8;
const STDERR_KEEP_LINES: usize = 50;

/// Runs the external reviewer. Its final answer arrives on stdout as one
/// block; stderr carries progress that is filtered before display.
pub struct ReviewerExecutor {
    config: ReviewerConfig,
    sink: OutputSink,
    scanner: PatternScanner,
    launch: LaunchOptions,
}

impl ReviewerExecutor {
    pub fn new(config: ReviewerConfig, sink: OutputSink) -> Self {
        let scanner =
            PatternScanner::new(config.error_patterns.clone(), config.help_command.clone());
        Self {
            config,
            sink,
            scanner,
            launch: LaunchOptions::default(),
        }
    }

    pub fn with_launch_options(mut self, options: LaunchOptions) -> Self {
        self.launch = options;
        self
    }

    fn build_args(&self, prompt: &str) -> Vec<String> {
        let model = self.config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let effort = self
            .config
            .reasoning_effort
            .as_deref()
            .unwrap_or(DEFAULT_REASONING_EFFORT);
        let sandbox = self.config.sandbox.as_deref().unwrap_or(DEFAULT_SANDBOX);
        let timeout_ms = self.config.timeout_ms.unwrap_or(DEFAULT_IDLE_TIMEOUT_MS);

        let mut args = vec![
            "exec".to_string(),
            "--sandbox".to_string(),
            sandbox.to_string(),
            "-c".to_string(),
            format!("model=\"{}\"", model),
            "-c".to_string(),
            format!("model_reasoning_effort={}", effort),
            "-c".to_string(),
            format!("stream_idle_timeout_ms={}", timeout_ms),
            "--skip-git-repo-check".to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args.push(prompt.to_string());
        args
    }
}

#[async_trait]
impl Executor for ReviewerExecutor {
    fn name(&self) -> &'static str {
        "codex"
    }

    async fn run(&self, cancel: &CancellationToken, prompt: &str) -> ExecutionResult {
        let invocation = Invocation::start(cancel, None);

        let mut cmd = Command::new(&self.config.command);
        cmd.args(self.build_args(prompt));
        let launched = match launch(invocation.token(), cmd, &self.launch) {
            Ok(launched) => launched,
            Err(e) => return ExecutionResult::failed(e.into()),
        };
        debug!("{} started (pid {:?})", self.name(), launched.handle.pid());

        let (stdout, stderr) = tokio::join!(
            read_answer(launched.stdout, invocation.token()),
            filter_progress(launched.stderr, invocation.token(), &self.sink),
        );

        let (stderr_tail, stderr_error) = stderr;
        let decoded = match stdout {
            Ok(output) => Decoded {
                signal: signal::detect(&output),
                output,
                error: stderr_error,
            },
            Err(e) => Decoded {
                error: Some(e),
                ..Decoded::default()
            },
        };

        let exit = launched.handle.wait().await;
        finish(&invocation, exit, decoded, &stderr_tail, &self.scanner)
    }
}

async fn read_answer<R: AsyncRead + Unpin>(
    mut reader: R,
    cancel: &CancellationToken,
) -> Result<String, ExecutorError> {
    let mut buf = Vec::new();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
        read = reader.read_to_end(&mut buf) => {
            read?;
            Ok(String::from_utf8_lossy(&buf).to_string())
        }
    }
}

/// Forward the interesting stderr lines; returns the raw tail for error reports.
async fn filter_progress<R: AsyncRead + Unpin>(
    reader: R,
    cancel: &CancellationToken,
    sink: &OutputSink,
) -> (String, Option<ExecutorError>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut filter = StderrFilter::default();
    let mut recent: VecDeque<String> = VecDeque::with_capacity(STDERR_KEEP_LINES + 1);

    let error = loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Some(ExecutorError::Cancelled),
            line = next_line_lossy(&mut reader, &mut buf) => line,
        };

        match line {
            Ok(Some(line)) => {
                if let Some(shown) = filter.filter(&line) {
                    sink(&format!("{}\n", shown));
                }
                recent.push_back(line);
                if recent.len() > STDERR_KEEP_LINES {
                    recent.pop_front();
                }
            }
            Ok(None) => break None,
            Err(e) => break Some(ExecutorError::Stream(e)),
        }
    };

    debug!("Reviewer stderr: {} lines kept for diagnostics", recent.len());
    let joined = Vec::from(recent).join("\n");
    (tail(&joined), error)
}

/// Reduces the reviewer's verbose stderr to its header block and bold
/// summary lines, without repeats.
#[derive(Debug, Default)]
pub struct StderrFilter {
    separators: usize,
    shown: HashSet<String>,
}

impl StderrFilter {
    pub fn filter(&mut self, line: &str) -> Option<String> {
        let trimmed = line.trim();

        if is_separator(trimmed) {
            if self.separators < 2 {
                self.separators += 1;
                return Some(line.to_string());
            }
            return None;
        }

        let candidate = if self.separators == 1 {
            // between the first and second separator: the header block
            line.to_string()
        } else if trimmed.starts_with("**") {
            trimmed.replace("**", "")
        } else {
            return None;
        };

        if self.shown.insert(candidate.clone()) {
            Some(candidate)
        } else {
            None
        }
    }
}

fn is_separator(line: &str) -> bool {
    line.len() >= SEPARATOR_MIN_DASHES && line.chars().all(|c| c == '-')
}
