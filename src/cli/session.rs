//! Wiring shared by the `run` and `plan` commands: executors, collaborators,
//! Ctrl-C handling and the run summary.

use crate::config::Config;
use crate::console::ConsoleLogger;
use crate::executor::{AgentExecutor, AgentRole, Executor, ReviewerExecutor};
use crate::git::GitCli;
use crate::orchestrator::{
    InputCollector, Mode, PhaseTracker, Prompts, RunStats, Runner, RunnerConfig,
};
use crate::process::LaunchOptions;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit status for a run stopped by Ctrl-C.
const EXIT_CANCELLED: i32 = 130;

pub async fn detect_default_branch(config: &Config, git: &GitCli) -> String {
    match &config.default_branch {
        Some(branch) => branch.clone(),
        None => git.default_branch().await,
    }
}

/// Build the runner, execute it with Ctrl-C wired to cancellation, and
/// print the summary.
pub async fn execute(
    config: &Config,
    runner_config: RunnerConfig,
    git: GitCli,
    input: Option<Arc<dyn InputCollector>>,
) -> anyhow::Result<()> {
    let tracker = PhaseTracker::new();
    let logger = Arc::new(ConsoleLogger::new(tracker.subscribe()));
    let sink = logger.sink();
    let launch = LaunchOptions {
        grace: Duration::from_millis(config.kill_grace_ms),
    };

    let primary: Arc<dyn Executor> = Arc::new(
        AgentExecutor::new(config.claude.clone(), AgentRole::Primary, sink.clone())
            .with_launch_options(launch.clone()),
    );

    let prompts = config
        .prompts_dir
        .as_deref()
        .map(Prompts::load)
        .unwrap_or_default();

    let mode = runner_config.mode;
    let mut runner = Runner::new(runner_config, primary, logger.clone())
        .with_git(Arc::new(git))
        .with_phase_tracker(tracker)
        .with_prompts(prompts);

    if config.external_review && mode != Mode::Plan {
        runner = runner.with_reviewer(Arc::new(
            ReviewerExecutor::new(config.codex.clone(), sink.clone())
                .with_launch_options(launch.clone()),
        ));
    }

    if let Some(secondary) = &config.secondary {
        runner = runner.with_secondary(Arc::new(
            AgentExecutor::new(secondary.clone(), AgentRole::Secondary, sink.clone())
                .with_launch_options(launch),
        ));
    }

    if let Some(input) = input {
        runner = runner.with_input(input);
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            interrupt.cancel();
        }
    });

    let start = Instant::now();
    match runner.run(&cancel).await {
        Ok(stats) => {
            print_summary(mode, start.elapsed(), &stats);
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            eprintln!("\nRun cancelled after {:.1}s", start.elapsed().as_secs_f64());
            std::process::exit(EXIT_CANCELLED);
        }
        Err(e) => {
            info!("Run failed after {} invocations", runner.stats().total());
            Err(e.into())
        }
    }
}

fn print_summary(mode: Mode, elapsed: Duration, stats: &RunStats) {
    println!("\n=== Summary ===\n");
    println!("Mode: {}", mode);
    println!("Elapsed: {:.1}s", elapsed.as_secs_f64());
    println!("Invocations: {}", stats.total());
    for (phase, count) in stats.by_phase() {
        println!("  - {}: {}", phase, count);
    }
    println!();
}
