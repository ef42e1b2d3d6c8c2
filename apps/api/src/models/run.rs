//! Run data model — the state record a polling client observes.
//!
//! A run owns exactly six step slots (`step1`…`step6`). Slots are never added
//! or removed; a retry cycle resets step2/4/5/6 to fresh pending state while
//! step1 and step3 keep their outputs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request body that starts a run.
///
/// Range constraints (`judge_strictness` 1–5, `max_retries` 0–5) are enforced
/// at the HTTP boundary, not here.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub question: String,
    pub jd_text: String,
    pub resume_text: String,
    #[serde(default)]
    pub custom_prompt_text: Option<String>,
    pub model: String,
    #[serde(default = "default_judge_strictness")]
    pub judge_strictness: u8,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
}

fn default_judge_strictness() -> u8 {
    3
}

fn default_max_retries() -> u8 {
    2
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Queued,
    Running,
    Done,
    Failed,
    /// Reserved — the orchestrator never sets this.
    Canceled,
}

/// One pipeline stage's bookkeeping record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    pub output_json: Option<serde_json::Value>,
    pub output_text: Option<String>,
    pub error: Option<String>,
}

/// Names of the six fixed pipeline slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepName {
    Step1,
    Step2,
    Step3,
    Step4,
    Step5,
    Step6,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Step1 => "step1",
            StepName::Step2 => "step2",
            StepName::Step3 => "step3",
            StepName::Step4 => "step4",
            StepName::Step5 => "step5",
            StepName::Step6 => "step6",
        }
    }

    /// 1-based position, used for the advisory `current_step` field.
    pub fn index(&self) -> u8 {
        match self {
            StepName::Step1 => 1,
            StepName::Step2 => 2,
            StepName::Step3 => 3,
            StepName::Step4 => 4,
            StepName::Step5 => 5,
            StepName::Step6 => 6,
        }
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The six step slots. A struct rather than a map so the fixed slot set is
/// enforced by construction; serializes as `{"step1": {...}, ...}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Steps {
    pub step1: StepState,
    pub step2: StepState,
    pub step3: StepState,
    pub step4: StepState,
    pub step5: StepState,
    pub step6: StepState,
}

impl Steps {
    pub fn get(&self, name: StepName) -> &StepState {
        match name {
            StepName::Step1 => &self.step1,
            StepName::Step2 => &self.step2,
            StepName::Step3 => &self.step3,
            StepName::Step4 => &self.step4,
            StepName::Step5 => &self.step5,
            StepName::Step6 => &self.step6,
        }
    }

    pub fn get_mut(&mut self, name: StepName) -> &mut StepState {
        match name {
            StepName::Step1 => &mut self.step1,
            StepName::Step2 => &mut self.step2,
            StepName::Step3 => &mut self.step3,
            StepName::Step4 => &mut self.step4,
            StepName::Step5 => &mut self.step5,
            StepName::Step6 => &mut self.step6,
        }
    }

    /// Resets the slots that depend on judge feedback. Question analysis
    /// (step1) and resume analysis (step3) keep their outputs.
    pub fn reset_for_retry(&mut self) {
        self.step2 = StepState::default();
        self.step4 = StepState::default();
        self.step5 = StepState::default();
        self.step6 = StepState::default();
    }
}

/// The judge's verdict on one answer attempt. `score` stays `None` until
/// step6 completes; a missing score after step6 is a fatal condition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JudgeReport {
    pub score: Option<f64>,
    pub reasons: Vec<String>,
    pub fixes: Vec<String>,
    pub raw_text: Option<String>,
}

/// Frozen snapshot of one retried attempt. `steps` is a deep copy taken
/// before the live slots are reset, so it never aliases live state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempt: u32,
    pub steps: Steps,
    pub final_output: Option<String>,
    pub judge_report: Option<JudgeReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub current_step: Option<u8>,
    pub attempt: u32,
    pub steps: Steps,
    pub final_output: Option<String>,
    pub judge_report: Option<JudgeReport>,
    pub attempt_history: Vec<AttemptSummary>,
    pub error: Option<String>,
}

impl RunState {
    /// A freshly queued run: all six steps pending, attempt 1.
    pub fn new(run_id: Uuid) -> Self {
        RunState {
            run_id,
            status: RunStatus::Queued,
            current_step: None,
            attempt: 1,
            steps: Steps::default(),
            final_output: None,
            judge_report: None,
            attempt_history: Vec::new(),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_starts_queued_with_all_steps_pending() {
        let run = RunState::new(Uuid::new_v4());
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.attempt, 1);
        assert!(run.attempt_history.is_empty());
        for name in [
            StepName::Step1,
            StepName::Step2,
            StepName::Step3,
            StepName::Step4,
            StepName::Step5,
            StepName::Step6,
        ] {
            assert_eq!(run.steps.get(name).status, StepStatus::Pending);
        }
    }

    #[test]
    fn test_steps_serialize_as_named_map() {
        let run = RunState::new(Uuid::new_v4());
        let value = serde_json::to_value(&run).unwrap();
        let steps = value.get("steps").unwrap().as_object().unwrap();
        assert_eq!(steps.len(), 6);
        assert!(steps.contains_key("step1"));
        assert!(steps.contains_key("step6"));
        assert_eq!(steps["step1"]["status"], "pending");
    }

    #[test]
    fn test_reset_for_retry_preserves_step1_and_step3() {
        let mut steps = Steps::default();
        steps.step1.status = StepStatus::Done;
        steps.step1.output_json = Some(serde_json::json!({"topic": "motivation"}));
        steps.step3.status = StepStatus::Done;
        steps.step3.output_json = Some(serde_json::json!({"skills": ["rust"]}));
        steps.step2.status = StepStatus::Done;
        steps.step4.status = StepStatus::Failed;
        steps.step4.error = Some("boom".to_string());

        steps.reset_for_retry();

        assert_eq!(steps.step1.status, StepStatus::Done);
        assert!(steps.step1.output_json.is_some());
        assert_eq!(steps.step3.status, StepStatus::Done);
        assert_eq!(steps.step2.status, StepStatus::Pending);
        assert_eq!(steps.step4.status, StepStatus::Pending);
        assert!(steps.step4.error.is_none());
        assert_eq!(steps.step5.status, StepStatus::Pending);
        assert_eq!(steps.step6.status, StepStatus::Pending);
    }

    #[test]
    fn test_run_request_defaults() {
        let json = serde_json::json!({
            "question": "Why this role?",
            "jd_text": "We need a Rust engineer.",
            "resume_text": "Ten years of systems work.",
            "model": "m1"
        });
        let request: RunRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.judge_strictness, 3);
        assert_eq!(request.max_retries, 2);
        assert!(request.custom_prompt_text.is_none());
    }

    #[test]
    fn test_status_serde_snake_case() {
        assert_eq!(
            serde_json::to_value(RunStatus::Queued).unwrap(),
            serde_json::json!("queued")
        );
        assert_eq!(
            serde_json::to_value(StepStatus::Skipped).unwrap(),
            serde_json::json!("skipped")
        );
        let status: RunStatus = serde_json::from_value(serde_json::json!("failed")).unwrap();
        assert_eq!(status, RunStatus::Failed);
    }
}
