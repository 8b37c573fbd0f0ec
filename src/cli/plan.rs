use super::session::{self, detect_default_branch};
use crate::cli::PlanArgs;
use crate::config::Config;
use crate::console::TerminalInput;
use crate::git::GitCli;
use crate::orchestrator::{InputCollector, Mode, RunnerConfig};
use std::sync::Arc;
use tracing::warn;

pub async fn execute(args: PlanArgs) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(&args.config)?;
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    config.validate()?;

    let cwd = std::env::current_dir()?;
    let git = GitCli::new(&cwd);
    let default_branch = detect_default_branch(&config, &git).await;

    let mut runner_config = RunnerConfig::from_config(&config, Mode::Plan, default_branch);
    runner_config.plan_description = Some(args.description.join(" "));

    let input: Option<Arc<dyn InputCollector>> = match TerminalInput::detect() {
        Some(terminal) => Some(Arc::new(terminal)),
        None => {
            warn!("stdin is not a terminal, plan questions cannot be answered");
            None
        }
    };

    session::execute(&config, runner_config, git, input).await
}
