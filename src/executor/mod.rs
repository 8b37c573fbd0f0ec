//! Executors wrap one CLI tool each behind a single `run(prompt)` call.
//!
//! An invocation launches the tool through [`crate::process`], decodes its
//! output while forwarding chunks to the caller's sink, reconciles the decoded
//! text with the exit status, and finally scans for configured error patterns.

mod agent;
mod patterns;
mod reviewer;
pub mod stream;

pub use agent::{AgentExecutor, AgentRole};
pub use patterns::PatternScanner;
pub use reviewer::ReviewerExecutor;

use crate::error::{ExecutorError, ProcessError};
use crate::signal::Signal;
use async_trait::async_trait;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use stream::Decoded;

/// Receives decoded output chunks as they arrive, for live display.
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

/// A sink that drops everything.
#[cfg(test)]
pub fn discard_sink() -> OutputSink {
    Arc::new(|_| {})
}

/// Outcome of one executor invocation.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    pub output: String,
    pub signal: Option<Signal>,
    pub error: Option<ExecutorError>,
}

impl ExecutionResult {
    pub fn failed(error: ExecutorError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, cancel: &CancellationToken, prompt: &str) -> ExecutionResult;
}

/// Cancellation scope for one invocation: the run-wide token plus an optional
/// per-invocation timeout.
pub(crate) struct Invocation {
    parent: CancellationToken,
    token: CancellationToken,
    timeout: Option<Duration>,
    timer: Option<JoinHandle<()>>,
}

impl Invocation {
    pub(crate) fn start(parent: &CancellationToken, timeout: Option<Duration>) -> Self {
        let token = parent.child_token();
        let timer = timeout.map(|limit| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => token.cancel(),
                    _ = token.cancelled() => {}
                }
            })
        });

        Self {
            parent: parent.clone(),
            token,
            timeout,
            timer,
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn interrupted(&self) -> Option<ExecutorError> {
        if self.parent.is_cancelled() {
            Some(ExecutorError::Cancelled)
        } else if self.token.is_cancelled() {
            Some(ExecutorError::Timeout(self.timeout.unwrap_or_default()))
        } else {
            None
        }
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

const STDERR_TAIL: usize = 2000;

/// Read a stream to the end, keeping only the trailing part for error messages.
pub(crate) async fn drain_tail<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        warn!("Failed to read stderr: {}", e);
    }
    tail(&String::from_utf8_lossy(&buf))
}

pub(crate) fn tail(text: &str) -> String {
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

/// Combine decode outcome, exit status and error patterns into one result.
///
/// Cancellation and timeout win over everything. A non-zero exit is only
/// fatal when the tool produced no output. A matched error pattern overrides
/// any other outcome.
pub(crate) fn finish(
    invocation: &Invocation,
    exit: Result<ExitStatus, ProcessError>,
    decoded: Decoded,
    stderr: &str,
    scanner: &PatternScanner,
) -> ExecutionResult {
    let Decoded {
        output,
        signal,
        error: stream_error,
    } = decoded;

    if let Some(interrupted) = invocation.interrupted() {
        return ExecutionResult {
            output,
            signal,
            error: Some(interrupted),
        };
    }

    let error = match (stream_error, exit) {
        (Some(e), _) => Some(e),
        (None, Err(e)) => Some(ExecutorError::from(e)),
        (None, Ok(status)) if !status.success() => {
            let code = status.code().unwrap_or(-1);
            if output.trim().is_empty() {
                Some(ExecutorError::NonZeroExit {
                    code,
                    stderr: stderr.to_string(),
                })
            } else {
                warn!(
                    "Process exited with code {} but produced output, keeping it",
                    code
                );
                None
            }
        }
        (None, Ok(_)) => None,
    };

    let error = scanner.check(&output).or(error);

    ExecutionResult {
        output,
        signal,
        error,
    }
}
