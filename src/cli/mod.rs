pub mod plan;
pub mod run;
pub mod schema;
mod session;

use crate::orchestrator::Mode;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ralphex")]
#[command(
    author,
    version,
    about = "Plan-driven implement and review loop for Claude Code and Codex CLI"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose/debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Implement a plan, then review the result
    Run(RunArgs),

    /// Draft a new plan interactively
    Plan(PlanArgs),

    /// Print JSON Schema for config validation
    Schema(SchemaArgs),
}

/// Pipelines selectable for `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Tasks, reviews, external review, optional finalize
    Full,
    /// Reviews and external review only
    Review,
    /// External review and the review pass after it
    ExternalReview,
    /// Tasks only, no reviews
    TasksOnly,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Full => Mode::Full,
            ModeArg::Review => Mode::Review,
            ModeArg::ExternalReview => Mode::ExternalReview,
            ModeArg::TasksOnly => Mode::TasksOnly,
        }
    }
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    /// Plan file with `- [ ]` checklist items
    #[arg(value_name = "PLAN")]
    pub plan: Option<PathBuf>,

    /// Which pipeline to run
    #[arg(short, long, value_enum, default_value = "full")]
    pub mode: ModeArg,

    /// Path to config file
    #[arg(short, long, default_value = "ralphex.yaml")]
    pub config: PathBuf,

    /// Override the task loop iteration cap
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Override the delay between iterations, in milliseconds
    #[arg(long, value_name = "MS")]
    pub delay: Option<u64>,

    /// Skip the external review loop
    #[arg(long)]
    pub no_external_review: bool,

    /// Run the finalize step after reviews
    #[arg(long)]
    pub finalize: bool,

    /// Show the resolved pipeline without running anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Clone)]
pub struct PlanArgs {
    /// What the plan should accomplish
    #[arg(value_name = "DESCRIPTION", required = true, num_args = 1..)]
    pub description: Vec<String>,

    /// Path to config file
    #[arg(short, long, default_value = "ralphex.yaml")]
    pub config: PathBuf,

    /// Override the iteration cap the plan loop derives its limit from
    #[arg(long)]
    pub max_iterations: Option<u32>,
}

#[derive(Parser, Clone)]
pub struct SchemaArgs {
    /// Print a config file with all defaults instead of the schema
    #[arg(long)]
    pub defaults: bool,
}
