//! Step definitions — status bookkeeping around each generation call.
//!
//! Every step marks its slot running, does its work, and records done/failed
//! before handing the error back to the orchestrator. Structured steps go
//! through `run_json_step`, which allows exactly one repair retry when the
//! model's output does not parse.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::llm_client::strip_json_fences;
use crate::models::run::{JudgeReport, StepName, StepStatus};
use crate::prompts::render;

use super::{Pipeline, PipelineError};

const JSON_NUDGE: &str = "\n\nReturn valid JSON only. Do not wrap in code fences.";

// Analysis and judging want determinism; drafting gets room to write.
const TEMP_ANALYSIS: f32 = 0.2;
const TEMP_DRAFT: f32 = 0.5;
const TEMP_TRANSFORM: f32 = 0.4;
const TEMP_JUDGE: f32 = 0.1;

/// Typed shape of step4's structured output. The evidence map is
/// model-defined, so it stays an open JSON value. Extra fields are tolerated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct DraftAnswer {
    #[serde(default)]
    pub answer: String,
    #[serde(default = "empty_object")]
    pub evidence_map: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Typed shape of step6's structured output.
#[derive(Debug, Deserialize)]
struct JudgeOutput {
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    reasons: Vec<String>,
    #[serde(default)]
    fixes: Vec<String>,
}

fn start_step(p: &Pipeline, name: StepName) {
    p.store.update_step(p.run_id, name, |step| {
        step.status = StepStatus::Running;
        step.error = None;
    });
    info!("run {} {name} started", p.run_id);
}

fn fail_step(p: &Pipeline, name: StepName, err: &PipelineError) {
    error!("run {} {name} failed: {err}", p.run_id);
    let message = err.to_string();
    p.store.update_step(p.run_id, name, move |step| {
        step.status = StepStatus::Failed;
        step.error = Some(message);
    });
}

/// Records the outcome of a structured step on its slot and passes the parsed
/// value (and raw text) through.
fn finish_json_step(
    p: &Pipeline,
    name: StepName,
    outcome: Result<(Value, String), PipelineError>,
) -> Result<(Value, String), PipelineError> {
    match outcome {
        Ok((value, raw)) => {
            let stored_json = value.clone();
            let stored_text = raw.clone();
            p.store.update_step(p.run_id, name, move |step| {
                step.status = StepStatus::Done;
                step.output_json = Some(stored_json);
                step.output_text = Some(stored_text);
            });
            info!("run {} {name} done", p.run_id);
            Ok((value, raw))
        }
        Err(err) => {
            fail_step(p, name, &err);
            Err(err)
        }
    }
}

fn parse_json(raw: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(strip_json_fences(raw))
}

/// One JSON-formatted generation with at most one repair retry.
///
/// A parse failure gets the same prompt re-sent with an explicit nudge
/// appended; a second parse failure is permanent. Upstream generation
/// failures propagate immediately with no repair attempt.
async fn run_json_step(
    p: &Pipeline,
    prompt: &str,
    temperature: f32,
) -> Result<(Value, String), PipelineError> {
    let raw = p
        .llm
        .generate(&p.req.model, prompt, temperature, true)
        .await?;
    if let Ok(value) = parse_json(&raw) {
        return Ok((value, raw));
    }

    warn!("run {}: model returned invalid JSON, retrying with nudge", p.run_id);
    let nudged = format!("{prompt}{JSON_NUDGE}");
    let raw = p
        .llm
        .generate(&p.req.model, &nudged, temperature, true)
        .await?;
    match parse_json(&raw) {
        Ok(value) => Ok((value, raw)),
        Err(_) => Err(PipelineError::InvalidJson),
    }
}

/// step1 — question analysis.
pub(super) async fn run_step1(p: &Pipeline) -> Result<Value, PipelineError> {
    start_step(p, StepName::Step1);
    let outcome = async {
        let template = p.prompts.load("step1_question_analysis.txt")?;
        let prompt = render(&template, &[("question", p.req.question.as_str())])?;
        run_json_step(p, &prompt, TEMP_ANALYSIS).await
    }
    .await;
    finish_json_step(p, StepName::Step1, outcome).map(|(value, _)| value)
}

/// step2 — job-description analysis.
pub(super) async fn run_step2(p: &Pipeline) -> Result<Value, PipelineError> {
    start_step(p, StepName::Step2);
    let outcome = async {
        let template = p.prompts.load("step2_jd_analysis.txt")?;
        let prompt = render(&template, &[("jd_text", p.req.jd_text.as_str())])?;
        run_json_step(p, &prompt, TEMP_ANALYSIS).await
    }
    .await;
    finish_json_step(p, StepName::Step2, outcome).map(|(value, _)| value)
}

/// step2 retry — same analysis with the judge's critique appended.
pub(super) async fn run_step2_retry(p: &Pipeline, critique: &str) -> Result<Value, PipelineError> {
    start_step(p, StepName::Step2);
    let outcome = async {
        let template = p.prompts.load("step2_jd_analysis_retry.txt")?;
        let prompt = render(
            &template,
            &[("jd_text", p.req.jd_text.as_str()), ("critique", critique)],
        )?;
        run_json_step(p, &prompt, TEMP_ANALYSIS).await
    }
    .await;
    finish_json_step(p, StepName::Step2, outcome).map(|(value, _)| value)
}

/// step3 — resume analysis.
pub(super) async fn run_step3(p: &Pipeline) -> Result<Value, PipelineError> {
    start_step(p, StepName::Step3);
    let outcome = async {
        let template = p.prompts.load("step3_resume_analysis.txt")?;
        let prompt = render(&template, &[("resume_text", p.req.resume_text.as_str())])?;
        run_json_step(p, &prompt, TEMP_ANALYSIS).await
    }
    .await;
    finish_json_step(p, StepName::Step3, outcome).map(|(value, _)| value)
}

/// step4 — draft answer from the question, JD, resume, and all three analyses.
pub(super) async fn run_step4(
    p: &Pipeline,
    step1_json: &Value,
    step2_json: &Value,
    step3_json: &Value,
) -> Result<DraftAnswer, PipelineError> {
    start_step(p, StepName::Step4);
    let outcome = async {
        let template = p.prompts.load("step4_answer.txt")?;
        let step1 = serde_json::to_string_pretty(step1_json)?;
        let step2 = serde_json::to_string_pretty(step2_json)?;
        let step3 = serde_json::to_string_pretty(step3_json)?;
        let prompt = render(
            &template,
            &[
                ("question", p.req.question.as_str()),
                ("jd_text", p.req.jd_text.as_str()),
                ("resume_text", p.req.resume_text.as_str()),
                ("step1_json", step1.as_str()),
                ("step2_json", step2.as_str()),
                ("step3_json", step3.as_str()),
            ],
        )?;
        run_json_step(p, &prompt, TEMP_DRAFT).await
    }
    .await;
    let (value, _) = finish_json_step(p, StepName::Step4, outcome)?;
    Ok(serde_json::from_value(value)?)
}

/// step5 — optional free-text transform of the draft answer.
///
/// With no custom instructions there is nothing to do: the step marks itself
/// skipped and step4's answer passes through as the final output, with no
/// generation call at all.
pub(super) async fn run_step5(p: &Pipeline, draft: &DraftAnswer) -> Result<String, PipelineError> {
    let custom = p
        .req
        .custom_prompt_text
        .as_deref()
        .map(str::trim)
        .unwrap_or("");
    if custom.is_empty() {
        p.store.update_step(p.run_id, StepName::Step5, |step| {
            step.status = StepStatus::Skipped;
        });
        info!("run {} step5 skipped (no custom transform)", p.run_id);
        return Ok(draft.answer.clone());
    }

    start_step(p, StepName::Step5);
    let outcome: Result<String, PipelineError> = async {
        let template = p.prompts.load("step5_custom_transform.txt")?;
        let evidence_map = serde_json::to_string_pretty(&draft.evidence_map)?;
        let prompt = render(
            &template,
            &[
                ("custom_prompt_text", custom),
                ("draft_answer", draft.answer.as_str()),
                ("evidence_map", evidence_map.as_str()),
            ],
        )?;
        Ok(p
            .llm
            .generate(&p.req.model, &prompt, TEMP_TRANSFORM, false)
            .await?)
    }
    .await;

    match outcome {
        Ok(text) => {
            let stored = text.clone();
            p.store.update_step(p.run_id, StepName::Step5, move |step| {
                step.status = StepStatus::Done;
                step.output_text = Some(stored);
            });
            info!("run {} step5 done", p.run_id);
            Ok(text)
        }
        Err(err) => {
            fail_step(p, StepName::Step5, &err);
            Err(err)
        }
    }
}

/// step6 — judge the final output against the request and analyses.
pub(super) async fn run_step6(
    p: &Pipeline,
    final_output: &str,
    step1_json: &Value,
    step2_json: &Value,
    step3_json: &Value,
) -> Result<JudgeReport, PipelineError> {
    start_step(p, StepName::Step6);
    let strictness = p.req.judge_strictness.to_string();
    let outcome = async {
        let template = p.prompts.load("step6_judge.txt")?;
        let step1 = serde_json::to_string_pretty(step1_json)?;
        let step2 = serde_json::to_string_pretty(step2_json)?;
        let step3 = serde_json::to_string_pretty(step3_json)?;
        let prompt = render(
            &template,
            &[
                ("question", p.req.question.as_str()),
                ("jd_text", p.req.jd_text.as_str()),
                ("resume_text", p.req.resume_text.as_str()),
                ("final_output", final_output),
                ("step1_json", step1.as_str()),
                ("step2_json", step2.as_str()),
                ("step3_json", step3.as_str()),
                ("judge_strictness", strictness.as_str()),
            ],
        )?;
        run_json_step(p, &prompt, TEMP_JUDGE).await
    }
    .await;
    let (value, raw) = finish_json_step(p, StepName::Step6, outcome)?;

    let output: JudgeOutput = serde_json::from_value(value)?;
    let report = JudgeReport {
        score: output.score,
        reasons: output.reasons,
        fixes: output.fixes,
        raw_text: Some(raw),
    };
    info!("run {} step6 score={:?}", p.run_id, report.score);
    Ok(report)
}
