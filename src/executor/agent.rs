use super::stream::{decode_json_stream, MarkerHandling};
use super::{drain_tail, finish, ExecutionResult, Executor, Invocation, OutputSink, PatternScanner};
use crate::config::AgentConfig;
use crate::process::{launch, LaunchOptions};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Flags that make the agent CLI emit one JSON event per line.
pub const DEFAULT_AGENT_ARGS: [&str; 4] = [
    "--dangerously-skip-permissions",
    "--output-format",
    "stream-json",
    "--verbose",
];

/// Which seat a JSON-stream agent occupies in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    /// Implements tasks and runs reviews; transcript keeps protocol markers.
    Primary,
    /// Evaluates reviewer findings; markers are hidden from the transcript.
    Secondary,
}

impl AgentRole {
    fn markers(self) -> MarkerHandling {
        match self {
            AgentRole::Primary => MarkerHandling::Keep,
            AgentRole::Secondary => MarkerHandling::Strip,
        }
    }
}

/// Runs a coding agent that streams line-delimited JSON events.
pub struct AgentExecutor {
    config: AgentConfig,
    role: AgentRole,
    sink: OutputSink,
    scanner: PatternScanner,
    launch: LaunchOptions,
}

impl AgentExecutor {
    pub fn new(config: AgentConfig, role: AgentRole, sink: OutputSink) -> Self {
        let scanner =
            PatternScanner::new(config.error_patterns.clone(), config.help_command.clone());
        Self {
            config,
            role,
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
        let mut args: Vec<String> = match &self.config.args {
            Some(args) => args.clone(),
            None => DEFAULT_AGENT_ARGS.iter().map(|s| s.to_string()).collect(),
        };

        if let Some(model) = &self.config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        args.push("-p".to_string());
        args.push(prompt.to_string());
        args
    }

    fn build_command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(self.build_args(prompt));

        // Ensure subscription auth is used (not API key)
        if self.role == AgentRole::Primary {
            cmd.env_remove("ANTHROPIC_API_KEY");
        }

        cmd
    }
}

#[async_trait]
impl Executor for AgentExecutor {
    fn name(&self) -> &'static str {
        match self.role {
            AgentRole::Primary => "claude",
            AgentRole::Secondary => "secondary",
        }
    }

    async fn run(&self, cancel: &CancellationToken, prompt: &str) -> ExecutionResult {
        let invocation = Invocation::start(cancel, self.config.timeout_sec.map(Duration::from_secs));

        debug!(
            "Running {} ({} prompt chars)",
            self.config.command.display(),
            prompt.len()
        );

        let launched = match launch(invocation.token(), self.build_command(prompt), &self.launch) {
            Ok(launched) => launched,
            Err(e) => return ExecutionResult::failed(e.into()),
        };
        debug!("{} started (pid {:?})", self.name(), launched.handle.pid());

        let (decoded, stderr) = tokio::join!(
            decode_json_stream(
                launched.stdout,
                invocation.token(),
                self.role.markers(),
                &self.sink
            ),
            drain_tail(launched.stderr),
        );

        let exit = launched.handle.wait().await;
        finish(&invocation, exit, decoded, &stderr, &self.scanner)
    }
}
