use super::{check_cancel, DraftAction, Phase, RunError, Runner, Seat};
use crate::error::SignalError;
use crate::signal::{self, Signal};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

impl Runner {
    /// Interactive drafting loop: answer questions, review drafts, stop on
    /// PLAN_READY.
    pub(super) async fn run_plan(&mut self, cancel: &CancellationToken) -> Result<(), RunError> {
        let input = self.input.clone().ok_or(RunError::MissingInput)?;
        let description = self
            .config
            .plan_description
            .clone()
            .ok_or(RunError::MissingPlanDescription)?;
        let cap = self.config.plan_cap();
        let mut conversation = Conversation::default();

        for iteration in 1..=cap {
            check_cancel(cancel)?;
            self.logger
                .print_section(&format!("plan iteration {}/{}", iteration, cap));

            let rendered = conversation.render();
            let prompt = self.render(
                &self.prompts.plan,
                &[
                    ("PLAN_DESCRIPTION", description.as_str()),
                    ("CONVERSATION", rendered.as_str()),
                ],
            );
            let result = self
                .invoke(Seat::Primary, Phase::Plan, cancel, &prompt)
                .await?;

            match result.signal {
                Some(Signal::PlanReady) => {
                    info!("Plan ready after {} iterations", iteration);
                    self.logger.print("Plan ready");
                    return Ok(());
                }
                Some(Signal::TaskFailed) => {
                    return Err(RunError::ToolFailed {
                        phase: Phase::Plan.name(),
                    })
                }
                Some(Signal::Question) => match signal::parse_question(&result.output) {
                    Ok(Some(question)) => {
                        self.logger
                            .log_question(&question.question, &question.options);
                        let answer = ask(
                            cancel,
                            input.ask_question(&question.question, &question.options),
                        )
                        .await?;
                        self.logger.log_answer(&answer);
                        conversation.push(format!("Q: {}\nA: {}", question.question, answer));
                    }
                    Ok(None) => {}
                    Err(e) => self.malformed(e),
                },
                Some(Signal::PlanDraft) => match signal::parse_plan_draft(&result.output) {
                    Ok(Some(draft)) => {
                        let review = ask(cancel, input.ask_draft_review(&draft)).await?;
                        self.logger
                            .log_draft_review(review.action, review.feedback.as_deref());

                        match review.action {
                            DraftAction::Accept => conversation.push(format!(
                                "User accepted the draft plan. Write it to {} and finish.",
                                self.config.plans_dir.display()
                            )),
                            DraftAction::Revise => conversation.push(format!(
                                "User requested changes to the draft plan:\n{}",
                                review.feedback.as_deref().unwrap_or("(no details given)")
                            )),
                            DraftAction::Reject => return Err(RunError::PlanRejected),
                        }
                    }
                    Ok(None) => {}
                    Err(e) => self.malformed(e),
                },
                _ => {}
            }

            if iteration < cap {
                self.pause(cancel).await?;
            }
        }

        Err(RunError::MaxIterations {
            phase: Phase::Plan.name(),
            limit: cap,
        })
    }

    /// Unparsable blocks are treated as plain text.
    fn malformed(&self, err: SignalError) {
        warn!("Ignoring malformed signal block: {}", err);
        self.logger
            .warn(&format!("Ignoring malformed signal block: {}", err));
    }
}

/// Wait for the user, giving up when the run is cancelled.
async fn ask<T>(
    cancel: &CancellationToken,
    pending: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, RunError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RunError::Cancelled),
        answer = pending => answer.map_err(|e| RunError::Input(format!("{:#}", e))),
    }
}

/// Answers and draft decisions, fed back into every following plan prompt.
#[derive(Debug, Default)]
struct Conversation {
    entries: Vec<String>,
}

impl Conversation {
    fn push(&mut self, entry: String) {
        self.entries.push(entry);
    }

    fn render(&self) -> String {
        if self.entries.is_empty() {
            "(nothing yet)".to_string()
        } else {
            self.entries.join("\n\n")
        }
    }
}
