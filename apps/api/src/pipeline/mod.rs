//! Pipeline orchestrator — drives a run from `queued` to a terminal status.
//!
//! Flow: fan out step1/step2/step3 concurrently, then loop the answer attempt
//! (step4 → step5 → step6) until the judge's score meets the strictness
//! threshold or the retry budget is spent. Exceeding the budget still ends in
//! `done`: the last attempt is accepted as best effort. Every transition is
//! written to the run store so a polling client sees live progress.
//!
//! On retry, only step2 is re-run — with the judge report fed back as a
//! critique. Question analysis (step1) and resume analysis (step3) do not
//! depend on judge feedback and keep their outputs.

pub mod handlers;
mod steps;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::llm_client::{Generator, LlmError};
use crate::models::run::{AttemptSummary, JudgeReport, RunRequest, RunStatus, StepName};
use crate::prompts::{PromptError, PromptLoader};
use crate::store::RunStore;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid JSON returned by model")]
    InvalidJson,

    #[error("judge report missing score")]
    MissingScore,
}

/// One run's worth of orchestration context. The store is the only owner of
/// live run state; this struct holds handles, never a private copy.
pub struct Pipeline {
    store: RunStore,
    llm: Arc<dyn Generator>,
    prompts: PromptLoader,
    run_id: Uuid,
    req: RunRequest,
}

impl Pipeline {
    pub fn new(
        store: RunStore,
        llm: Arc<dyn Generator>,
        prompts: PromptLoader,
        run_id: Uuid,
        req: RunRequest,
    ) -> Self {
        Pipeline {
            store,
            llm,
            prompts,
            run_id,
            req,
        }
    }

    /// Runs the pipeline to a terminal status. Any error unwinds to here and
    /// becomes the run's terminal failure; there is no partial credit.
    pub async fn run(self) {
        info!(
            "run {} started (model={}, strictness={}, max_retries={})",
            self.run_id, self.req.model, self.req.judge_strictness, self.req.max_retries
        );
        if let Err(err) = self.drive().await {
            error!("run {} failed: {err}", self.run_id);
            let message = err.to_string();
            self.store.update(self.run_id, move |run| {
                run.status = RunStatus::Failed;
                run.current_step = None;
                run.error = Some(message);
            });
        }
    }

    async fn drive(&self) -> Result<(), PipelineError> {
        self.store.update(self.run_id, |run| {
            run.status = RunStatus::Running;
            run.current_step = Some(StepName::Step1.index());
            run.attempt = 1;
        });

        // Fan-out: the analysis steps only overlap on I/O waits. The first
        // failure drops the sibling futures, cancelling their in-flight
        // generation calls; a cancelled sibling may leave its slot `running`
        // in the failed run.
        let (step1_json, mut step2_json, step3_json) = tokio::try_join!(
            steps::run_step1(self),
            steps::run_step2(self),
            steps::run_step3(self),
        )?;

        let mut attempt: u32 = 1;
        loop {
            self.store.update(self.run_id, move |run| {
                run.current_step = Some(StepName::Step4.index());
                run.attempt = attempt;
            });

            let (final_output, judge_report) = self
                .run_answer_attempt(&step1_json, &step2_json, &step3_json)
                .await?;
            let score = judge_report.score.ok_or(PipelineError::MissingScore)?;

            if score >= f64::from(self.req.judge_strictness) {
                info!(
                    "run {} passed on attempt {attempt} (score {score})",
                    self.run_id
                );
                self.finish(final_output, judge_report);
                return Ok(());
            }

            if attempt > u32::from(self.req.max_retries) {
                info!(
                    "run {} out of retries on attempt {attempt} (score {score}); accepting best effort",
                    self.run_id
                );
                self.finish(final_output, judge_report);
                return Ok(());
            }

            self.snapshot_attempt(attempt, &final_output, &judge_report);
            attempt += 1;
            info!("run {} retrying as attempt {attempt}", self.run_id);
            self.store.update(self.run_id, move |run| {
                run.attempt = attempt;
                run.current_step = Some(StepName::Step2.index());
            });

            let critique = serde_json::to_string_pretty(&judge_report)?;
            step2_json = steps::run_step2_retry(self, &critique).await?;
        }
    }

    /// One answer attempt: step4 → step5 → step6, strictly in order. The
    /// attempt's output and judge report are written to the run record even
    /// when the score falls short, so a poller always sees the latest attempt.
    async fn run_answer_attempt(
        &self,
        step1_json: &Value,
        step2_json: &Value,
        step3_json: &Value,
    ) -> Result<(String, JudgeReport), PipelineError> {
        let draft = steps::run_step4(self, step1_json, step2_json, step3_json).await?;
        let final_output = steps::run_step5(self, &draft).await?;
        let judge_report =
            steps::run_step6(self, &final_output, step1_json, step2_json, step3_json).await?;

        let output = final_output.clone();
        let report = judge_report.clone();
        self.store.update(self.run_id, move |run| {
            run.final_output = Some(output);
            run.judge_report = Some(report);
        });
        Ok((final_output, judge_report))
    }

    fn finish(&self, final_output: String, judge_report: JudgeReport) {
        self.store.update(self.run_id, move |run| {
            run.status = RunStatus::Done;
            run.current_step = None;
            run.final_output = Some(final_output);
            run.judge_report = Some(judge_report);
        });
    }

    /// Snapshot-and-reset as one atomic store operation: append the attempt
    /// (with a deep copy of all six slots) to the history, then reset the
    /// feedback-dependent slots. A reader never observes a half-reset state.
    fn snapshot_attempt(&self, attempt: u32, final_output: &str, judge_report: &JudgeReport) {
        info!("run {} snapshotting attempt {attempt}", self.run_id);
        let final_output = final_output.to_string();
        let judge_report = judge_report.clone();
        self.store.update(self.run_id, move |run| {
            run.attempt_history.push(AttemptSummary {
                attempt,
                steps: run.steps.clone(),
                final_output: Some(final_output),
                judge_report: Some(judge_report),
            });
            run.steps.reset_for_retry();
        });
    }
}
