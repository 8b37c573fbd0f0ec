use super::{check_cancel, Phase, RunError, Runner, Seat};
use crate::signal::Signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const NO_PREVIOUS_RESPONSE: &str = "(none, this is the first review round)";

impl Runner {
    /// Review pipeline that follows the task loop, or runs on its own in the
    /// review modes.
    pub(super) async fn run_reviews(
        &mut self,
        cancel: &CancellationToken,
        with_claude_reviews: bool,
    ) -> Result<(), RunError> {
        if with_claude_reviews {
            self.run_first_review(cancel).await?;
            self.run_review_loop(cancel, "pre-review").await?;
        }

        if self.runs_external_review() {
            self.run_external_review_loop(cancel).await?;
            self.run_review_loop(cancel, "post-review").await?;
        }

        if self.config.finalize {
            self.run_finalize(cancel).await?;
        }

        Ok(())
    }

    async fn run_first_review(&mut self, cancel: &CancellationToken) -> Result<(), RunError> {
        check_cancel(cancel)?;
        self.logger.print_section("first review");

        let prompt = self.render(&self.prompts.review_first, &[]);
        let result = self
            .invoke(Seat::Primary, Phase::Review, cancel, &prompt)
            .await?;

        match result.signal {
            Some(Signal::ReviewDone) => self.logger.print("First review complete"),
            Some(Signal::TaskFailed) => {
                return Err(RunError::ToolFailed {
                    phase: Phase::Review.name(),
                })
            }
            _ => self
                .logger
                .warn("First review did not report completion, continuing"),
        }
        Ok(())
    }

    /// Repeat the focused review until it reports done, makes no commit, or
    /// hits the cap. Hitting the cap is not fatal.
    async fn run_review_loop(
        &mut self,
        cancel: &CancellationToken,
        label: &str,
    ) -> Result<(), RunError> {
        let cap = self.config.review_cap();
        let prompt = self.render(&self.prompts.review_second, &[]);

        for iteration in 1..=cap {
            check_cancel(cancel)?;
            self.logger
                .print_section(&format!("{} {}/{}", label, iteration, cap));

            let before = self.head_hash().await;
            let result = self
                .invoke(Seat::Primary, Phase::Review, cancel, &prompt)
                .await?;

            match result.signal {
                Some(Signal::ReviewDone) => {
                    self.logger.print("Review complete");
                    return Ok(());
                }
                Some(Signal::TaskFailed) => {
                    return Err(RunError::ToolFailed {
                        phase: Phase::Review.name(),
                    })
                }
                _ => {}
            }

            if let (Some(before), Some(after)) = (before, self.head_hash().await) {
                if before == after {
                    info!("{} made no commit, ending loop", label);
                    self.logger.print("No changes detected, review complete");
                    return Ok(());
                }
            }

            if iteration < cap {
                self.pause(cancel).await?;
            }
        }

        self.logger.warn(&format!(
            "{} reached max iterations ({}), continuing",
            label, cap
        ));
        Ok(())
    }

    /// Alternate reviewer and evaluator until the evaluator accepts the state
    /// of the branch or the reviewer has nothing to say.
    async fn run_external_review_loop(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        let cap = self.config.external_review_cap();
        let mut previous = String::new();

        for iteration in 1..=cap {
            check_cancel(cancel)?;
            self.logger
                .print_section(&format!("external review {}/{}", iteration, cap));

            let previous_response = if previous.trim().is_empty() {
                NO_PREVIOUS_RESPONSE
            } else {
                previous.as_str()
            };
            let prompt = self.render(
                &self.prompts.codex,
                &[("PREVIOUS_RESPONSE", previous_response)],
            );
            let review = self
                .invoke(Seat::Reviewer, Phase::ExternalReview, cancel, &prompt)
                .await?;

            let findings = review.output.trim();
            if findings.is_empty() {
                self.logger
                    .print("External reviewer returned no findings, nothing to evaluate");
                return Ok(());
            }
            self.logger.print_aligned(findings);

            let prompt = self.render(&self.prompts.codex_eval, &[("REVIEW_OUTPUT", findings)]);
            let evaluation = self
                .invoke(Seat::Evaluator, Phase::SecondaryEval, cancel, &prompt)
                .await?;

            match evaluation.signal {
                Some(Signal::ExternalReviewDone) => {
                    self.logger.print("External review complete");
                    return Ok(());
                }
                Some(Signal::TaskFailed) => {
                    return Err(RunError::ToolFailed {
                        phase: Phase::SecondaryEval.name(),
                    })
                }
                _ => {}
            }

            previous = evaluation.output;
            if iteration < cap {
                self.pause(cancel).await?;
            }
        }

        self.logger.warn(&format!(
            "External review reached max iterations ({}), continuing",
            cap
        ));
        Ok(())
    }

    /// Best-effort last step. Only cancellation escapes.
    async fn run_finalize(&mut self, cancel: &CancellationToken) -> Result<(), RunError> {
        check_cancel(cancel)?;
        self.logger.print_section("finalize");

        let prompt = self.render(&self.prompts.finalize, &[]);
        match self
            .invoke(Seat::Primary, Phase::Finalize, cancel, &prompt)
            .await
        {
            Ok(result) if result.signal == Some(Signal::TaskFailed) => {
                self.logger.warn("Finalize step reported failure, ignoring")
            }
            Ok(_) => self.logger.print("Finalize complete"),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => self
                .logger
                .warn(&format!("Finalize step failed, ignoring: {}", e)),
        }
        Ok(())
    }

    /// HEAD before/after comparison is skipped when the accessor is missing
    /// or fails.
    async fn head_hash(&self) -> Option<String> {
        let git = self.git.as_ref()?;
        match git.head_hash().await {
            Ok(hash) => Some(hash),
            Err(e) => {
                debug!("HEAD hash unavailable: {}", e);
                None
            }
        }
    }
}
