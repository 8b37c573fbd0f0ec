use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors from launching and supervising a subprocess.
///
/// `Clone` so a cached wait outcome can be returned more than once.
#[derive(Error, Debug, Clone)]
pub enum ProcessError {
    #[error("Process cancelled")]
    Cancelled,

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: Arc<std::io::Error>,
    },

    #[error("Failed to capture {0} pipe")]
    MissingPipe(&'static str),

    #[error("Failed to wait for process: {0}")]
    Wait(Arc<std::io::Error>),

    #[error("Process watcher failed: {0}")]
    Watcher(String),
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Launch failed: {0}")]
    Launch(ProcessError),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Failed to read output stream: {0}")]
    Stream(#[from] std::io::Error),

    #[error("Process failed with exit code {code} and no output: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Detected error pattern \"{pattern}\" in output; run `{help_command}` for details")]
    PatternMatched {
        pattern: String,
        help_command: String,
    },
}

impl From<ProcessError> for ExecutorError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Cancelled => ExecutorError::Cancelled,
            other => ExecutorError::Launch(other),
        }
    }
}

/// Malformed structured signal blocks. Never fatal to a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("{0} block has no closing END marker")]
    Unterminated(&'static str),

    #[error("{kind} block payload is invalid: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum GitError {
    #[error("git {args} failed: {stderr}")]
    Command { args: String, stderr: String },

    #[error("git produced empty output for {0}")]
    Empty(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Run cancelled")]
    Cancelled,

    #[error("{phase} phase failed: {source}")]
    Phase {
        phase: &'static str,
        #[source]
        source: ExecutorError,
    },

    #[error("{phase} phase reached max iterations ({limit}) without completion")]
    MaxIterations { phase: &'static str, limit: u32 },

    #[error("{phase} phase reported failure")]
    ToolFailed { phase: &'static str },

    #[error("Task execution failed after {retries} retries")]
    RetriesExhausted { retries: u32 },

    #[error("Plan rejected by user")]
    PlanRejected,

    #[error("Mode {0} requires a plan file")]
    PlanFileRequired(&'static str),

    #[error("Plan file not found: {0}")]
    MissingPlanFile(PathBuf),

    #[error("External review requested but no reviewer is configured")]
    MissingReviewer,

    #[error("Plan mode requires an interactive input collector")]
    MissingInput,

    #[error("Plan mode requires a plan description")]
    MissingPlanDescription,

    #[error("Input collection failed: {0}")]
    Input(String),
}

impl RunError {
    /// Wrap an executor failure with the phase it happened in.
    /// Cancellation is kept distinct from tool failures.
    pub fn phase(phase: &'static str, source: ExecutorError) -> Self {
        match source {
            ExecutorError::Cancelled => RunError::Cancelled,
            source => RunError::Phase { phase, source },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            RunError::Cancelled
                | RunError::Phase {
                    source: ExecutorError::Cancelled,
                    ..
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_wrapping_keeps_cancellation_distinct() {
        let err = RunError::phase("task", ExecutorError::Cancelled);
        assert!(err.is_cancelled());

        let err = RunError::phase(
            "task",
            ExecutorError::NonZeroExit {
                code: 1,
                stderr: "boom".to_string(),
            },
        );
        assert!(!err.is_cancelled());
        assert!(err.to_string().starts_with("task phase failed"));
    }

    #[test]
    fn test_pattern_error_is_actionable() {
        let err = ExecutorError::PatternMatched {
            pattern: "You've hit your limit".to_string(),
            help_command: "claude /usage".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("You've hit your limit"));
        assert!(msg.contains("claude /usage"));
    }

    #[test]
    fn test_process_cancel_maps_to_executor_cancel() {
        let err: ExecutorError = ProcessError::Cancelled.into();
        assert!(matches!(err, ExecutorError::Cancelled));
    }
}
