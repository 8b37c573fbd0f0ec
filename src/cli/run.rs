use super::session::{self, detect_default_branch};
use crate::cli::RunArgs;
use crate::config::Config;
use crate::git::GitCli;
use crate::orchestrator::{Mode, RunnerConfig};
use tracing::info;

pub async fn execute(args: RunArgs) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(&args.config)?;

    // Apply CLI overrides
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(delay) = args.delay {
        config.iteration_delay_ms = delay;
    }
    if args.no_external_review {
        config.external_review = false;
    }
    if args.finalize {
        config.finalize = true;
    }

    config.validate()?;

    let cwd = std::env::current_dir()?;
    let git = GitCli::new(&cwd);
    let default_branch = detect_default_branch(&config, &git).await;

    let mode = Mode::from(args.mode);
    let mut runner_config = RunnerConfig::from_config(&config, mode, default_branch);
    runner_config.plan_file = args.plan;

    if args.dry_run {
        info!("DRY RUN - no tools will be launched");
        print_execution_plan(&config, &runner_config);
        return Ok(());
    }

    session::execute(&config, runner_config, git, None).await
}

fn print_execution_plan(config: &Config, rc: &RunnerConfig) {
    println!("\n=== Execution Plan ===\n");
    println!("Mode: {}", rc.mode);
    match &rc.plan_file {
        Some(plan) => println!("Plan: {}", plan.display()),
        None => println!("Plan: (none)"),
    }
    println!("Default branch: {}", rc.default_branch);
    println!(
        "Iteration delay: {}ms, task retries: {}",
        rc.iteration_delay.as_millis(),
        rc.task_retry_count
    );

    println!("\nSteps:");
    if matches!(rc.mode, Mode::Full | Mode::TasksOnly) {
        println!(
            "  - tasks (up to {} iterations) via {}",
            rc.max_iterations,
            config.claude.command.display()
        );
    }
    if matches!(rc.mode, Mode::Full | Mode::Review) {
        println!("  - first review");
        println!("  - review loop (up to {} iterations)", rc.review_cap());
    }
    let external = match rc.mode {
        Mode::ExternalReview => true,
        Mode::Full | Mode::Review => rc.external_review,
        Mode::TasksOnly | Mode::Plan => false,
    };
    if external {
        let evaluator = config
            .secondary
            .as_ref()
            .map(|s| s.command.display().to_string())
            .unwrap_or_else(|| config.claude.command.display().to_string());
        println!(
            "  - external review (up to {} rounds) via {}, evaluated by {}",
            rc.external_review_cap(),
            config.codex.command.display(),
            evaluator
        );
        println!("  - review loop (up to {} iterations)", rc.review_cap());
    }
    if rc.finalize && rc.mode != Mode::TasksOnly {
        println!("  - finalize (best effort)");
    }
    println!();
}
