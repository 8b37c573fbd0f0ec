use super::{check_cancel, Phase, RunError, Runner, Seat};
use crate::signal::Signal;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const UNCHECKED_ITEM: &str = "- [ ]";

impl Runner {
    /// Re-submit the task prompt until the plan is complete.
    pub(super) async fn run_tasks(&mut self, cancel: &CancellationToken) -> Result<(), RunError> {
        let plan_file = self
            .config
            .plan_file
            .clone()
            .ok_or(RunError::PlanFileRequired(self.config.mode.name()))?;
        let prompt = self.render(&self.prompts.task, &[]);
        let limit = self.config.max_iterations;
        let allowed_retries = self.config.task_retry_count;
        let mut retries = 0;

        for iteration in 1..=limit {
            check_cancel(cancel)?;
            self.logger
                .print_section(&format!("task iteration {}/{}", iteration, limit));

            let result = self.invoke(Seat::Primary, Phase::Task, cancel, &prompt).await?;

            match result.signal {
                Some(Signal::TaskDone) => {
                    if plan_has_unchecked(&plan_file) {
                        self.logger.warn(
                            "Agent reported all tasks done but the plan still has unchecked items, continuing",
                        );
                    } else {
                        info!("All tasks completed after {} iterations", iteration);
                        self.logger.print("All tasks completed");
                        return Ok(());
                    }
                }
                Some(Signal::TaskFailed) => {
                    if retries >= allowed_retries {
                        return Err(RunError::RetriesExhausted {
                            retries: allowed_retries,
                        });
                    }
                    retries += 1;
                    self.logger.warn(&format!(
                        "Task reported failure, retrying ({}/{})",
                        retries, allowed_retries
                    ));
                }
                _ => retries = 0,
            }

            if iteration < limit {
                self.pause(cancel).await?;
            }
        }

        Err(RunError::MaxIterations {
            phase: Phase::Task.name(),
            limit,
        })
    }
}

/// Whether the plan still has unchecked checklist items.
///
/// A plan moved to `completed/` next to its original location is read from
/// there. When neither file can be read the completion signal is trusted.
pub fn plan_has_unchecked(path: &Path) -> bool {
    let content = std::fs::read_to_string(path).or_else(|_| {
        let fallback = completed_location(path);
        debug!("Plan not readable at {:?}, trying {:?}", path, fallback);
        std::fs::read_to_string(fallback)
    });

    match content {
        Ok(content) => content
            .lines()
            .any(|line| line.trim_start().starts_with(UNCHECKED_ITEM)),
        Err(e) => {
            debug!("Plan file unreadable ({}), trusting completion signal", e);
            false
        }
    }
}

fn completed_location(path: &Path) -> PathBuf {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    match path.file_name() {
        Some(name) => dir.join("completed").join(name),
        None => dir.join("completed"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::Mode;
    use super::*;
    use crate::error::ExecutorError;
    use crate::executor::ExecutionResult;
    use std::time::{Duration, Instant};

    const CLEAN_PLAN: &str = "# Plan\n\n### Task 1\n- [x] write code\n- [x] write tests\n";
    const OPEN_PLAN: &str = "# Plan\n\n### Task 1\n- [x] write code\n  - [ ] write tests\n";

    fn task_runner(
        plan: &Path,
        script: Vec<ExecutionResult>,
    ) -> (Runner, std::sync::Arc<ScriptedExecutor>, std::sync::Arc<RecordingLogger>) {
        let mut config = fast_config(Mode::TasksOnly);
        config.plan_file = Some(plan.to_path_buf());
        let primary = ScriptedExecutor::new(script);
        let logger = RecordingLogger::new();
        let runner = Runner::new(config, primary.clone(), logger.clone());
        (runner, primary, logger)
    }

    #[test]
    fn test_unchecked_detection() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!plan_has_unchecked(&write_plan(dir.path(), CLEAN_PLAN)));
        assert!(plan_has_unchecked(&write_plan(dir.path(), OPEN_PLAN)));
    }

    #[test]
    fn test_unchecked_reads_completed_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let completed = dir.path().join("completed");
        std::fs::create_dir(&completed).unwrap();
        std::fs::write(completed.join("plan.md"), OPEN_PLAN).unwrap();

        assert!(plan_has_unchecked(&dir.path().join("plan.md")));
    }

    #[test]
    fn test_unreadable_plan_trusts_signal() {
        assert!(!plan_has_unchecked(Path::new("/nonexistent/dir/plan.md")));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let dir = tempfile::tempdir().unwrap();
        let plan = write_plan(dir.path(), CLEAN_PLAN);
        let (mut runner, primary, _) = task_runner(
            &plan,
            vec![
                reply("working on task 1"),
                reply("tests fail <<<RALPHEX:TASK_FAILED>>>"),
                reply("fixed <<<RALPHEX:ALL_TASKS_DONE>>>"),
            ],
        );

        let stats = runner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(primary.calls(), 3);
        assert_eq!(stats.count(Phase::Task), 3);
    }

    #[tokio::test]
    async fn test_done_with_unchecked_items_extends_loop() {
        let dir = tempfile::tempdir().unwrap();
        let plan = write_plan(dir.path(), OPEN_PLAN);
        let (mut runner, primary, logger) = task_runner(
            &plan,
            vec![
                reply("<<<RALPHEX:ALL_TASKS_DONE>>>"),
                reply("<<<RALPHEX:ALL_TASKS_DONE>>>"),
            ],
        );
        runner.config.max_iterations = 2;

        let err = runner.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            RunError::MaxIterations {
                phase: "task",
                limit: 2
            }
        ));
        assert_eq!(primary.calls(), 2);
        assert_eq!(logger.warnings().len(), 2);
    }

    #[tokio::test]
    async fn test_every_iteration_sends_same_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let plan = write_plan(dir.path(), CLEAN_PLAN);
        let (mut runner, primary, _) = task_runner(
            &plan,
            vec![reply("step"), reply("<<<RALPHEX:ALL_TASKS_DONE>>>")],
        );

        runner.run(&CancellationToken::new()).await.unwrap();
        let prompts = primary.prompts();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0], prompts[1]);
        assert!(prompts[0].contains(&plan.display().to_string()));
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let plan = write_plan(dir.path(), CLEAN_PLAN);
        let (mut runner, primary, _) = task_runner(
            &plan,
            vec![
                reply("<<<RALPHEX:TASK_FAILED>>>"),
                reply("<<<RALPHEX:TASK_FAILED>>>"),
            ],
        );

        let err = runner.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RunError::RetriesExhausted { retries: 1 }));
        assert!(err.to_string().contains("retries"));
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test]
    async fn test_progress_resets_retry_budget() {
        let dir = tempfile::tempdir().unwrap();
        let plan = write_plan(dir.path(), CLEAN_PLAN);
        let (mut runner, primary, _) = task_runner(
            &plan,
            vec![
                reply("<<<RALPHEX:TASK_FAILED>>>"),
                reply("progress"),
                reply("<<<RALPHEX:TASK_FAILED>>>"),
                reply("<<<RALPHEX:ALL_TASKS_DONE>>>"),
            ],
        );

        runner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(primary.calls(), 4);
    }

    #[tokio::test]
    async fn test_pattern_match_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let plan = write_plan(dir.path(), CLEAN_PLAN);
        let (mut runner, primary, _) = task_runner(
            &plan,
            vec![
                ExecutionResult {
                    output: "You've hit your limit".to_string(),
                    signal: None,
                    error: Some(ExecutorError::PatternMatched {
                        pattern: "You've hit your limit".to_string(),
                        help_command: "claude /usage".to_string(),
                    }),
                },
                reply("<<<RALPHEX:ALL_TASKS_DONE>>>"),
            ],
        );

        let err = runner.run(&CancellationToken::new()).await.unwrap_err();
        match err {
            RunError::Phase {
                phase: "task",
                source: ExecutorError::PatternMatched { help_command, .. },
            } => assert_eq!(help_command, "claude /usage"),
            other => panic!("expected pattern match, got {:?}", other),
        }
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_delay() {
        let dir = tempfile::tempdir().unwrap();
        let plan = write_plan(dir.path(), CLEAN_PLAN);
        let (mut runner, primary, _) = task_runner(&plan, vec![reply("still working")]);
        runner.config.iteration_delay = Duration::from_millis(5000);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = runner.run(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_millis(2000));
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_executor_cancellation_is_not_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let plan = write_plan(dir.path(), CLEAN_PLAN);
        let (mut runner, _, _) =
            task_runner(&plan, vec![ExecutionResult::failed(ExecutorError::Cancelled)]);

        let err = runner.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled));
    }
}
