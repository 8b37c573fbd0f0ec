mod defaults;
mod types;

pub use types::*;

use crate::error::ConfigError;
use defaults::*;
use std::path::Path;
use tracing::info;

impl Default for Config {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            iteration_delay_ms: default_iteration_delay_ms(),
            task_retry_count: default_task_retry_count(),
            external_review: true,
            finalize: false,
            default_branch: None,
            kill_grace_ms: default_kill_grace_ms(),
            plans_dir: default_plans_dir(),
            prompts_dir: None,
            claude: AgentConfig::default(),
            codex: ReviewerConfig::default(),
            secondary: None,
        }
    }
}

impl Config {
    /// Load config from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load config if the file exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            info!("Loading config from {:?}", path);
            Self::load(path)
        } else {
            info!("No config found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "max_iterations",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.claude.command.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "claude.command",
                reason: "must not be empty".to_string(),
            });
        }

        if self.external_review && self.codex.command.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "codex.command",
                reason: "must not be empty when external review is enabled".to_string(),
            });
        }

        if let Some(secondary) = &self.secondary {
            if secondary.command.as_os_str().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "secondary.command",
                    reason: "must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }
}
