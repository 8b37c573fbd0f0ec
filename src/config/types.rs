use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::*;

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    /// Task loop iteration cap; review and plan caps are derived from it
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_iteration_delay_ms")]
    pub iteration_delay_ms: u64,

    /// How many TASK_FAILED signals are retried before the run aborts
    #[serde(default = "default_task_retry_count")]
    pub task_retry_count: u32,

    #[serde(default = "default_true")]
    pub external_review: bool,

    #[serde(default)]
    pub finalize: bool,

    /// Detected from git when unset
    #[serde(default)]
    pub default_branch: Option<String>,

    /// Pause between SIGTERM and SIGKILL when a tool's process group is stopped
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    #[serde(default = "default_plans_dir")]
    pub plans_dir: PathBuf,

    /// Directory with prompt files overriding the embedded ones
    #[serde(default)]
    pub prompts_dir: Option<PathBuf>,

    #[serde(default)]
    pub claude: AgentConfig,

    #[serde(default)]
    pub codex: ReviewerConfig,

    /// Optional second JSON-stream agent used to evaluate reviewer findings
    #[serde(default)]
    pub secondary: Option<AgentConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct AgentConfig {
    #[serde(default = "default_claude_binary")]
    pub command: PathBuf,

    /// Replaces the default streaming flags when set
    #[serde(default)]
    pub args: Option<Vec<String>>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_claude_error_patterns")]
    pub error_patterns: Vec<String>,

    #[serde(default = "default_claude_help_command")]
    pub help_command: String,

    #[serde(default)]
    pub timeout_sec: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_claude_binary(),
            args: None,
            model: None,
            error_patterns: default_claude_error_patterns(),
            help_command: default_claude_help_command(),
            timeout_sec: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ReviewerConfig {
    #[serde(default = "default_codex_binary")]
    pub command: PathBuf,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub reasoning_effort: Option<String>,

    #[serde(default)]
    pub sandbox: Option<String>,

    /// Stream idle timeout passed to the reviewer CLI
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub extra_args: Vec<String>,

    #[serde(default = "default_codex_error_patterns")]
    pub error_patterns: Vec<String>,

    #[serde(default = "default_codex_help_command")]
    pub help_command: String,
}

impl Default for ReviewerConfig {
    fn default() -> Self {
        Self {
            command: default_codex_binary(),
            model: None,
            reasoning_effort: None,
            sandbox: None,
            timeout_ms: None,
            extra_args: Vec::new(),
            error_patterns: default_codex_error_patterns(),
            help_command: default_codex_help_command(),
        }
    }
}
