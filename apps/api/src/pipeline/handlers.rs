//! Axum route handlers for the run API.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::run::{RunRequest, RunState};
use crate::state::AppState;

use super::Pipeline;

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
    pub error: Option<String>,
}

/// POST /api/run
///
/// Validates the request, inserts a queued run with six pending steps, and
/// spawns the pipeline task. Returns the run id immediately; progress is
/// observed only by polling `GET /api/run/:id`.
pub async fn handle_create_run(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, AppError> {
    validate(&request)?;

    let run_id = Uuid::new_v4();
    state
        .store
        .create(RunState::new(run_id))
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    info!(
        "run {run_id} created (model={}, strictness={}, max_retries={}, question_len={}, jd_len={}, resume_len={})",
        request.model,
        request.judge_strictness,
        request.max_retries,
        request.question.len(),
        request.jd_text.len(),
        request.resume_text.len()
    );

    let pipeline = Pipeline::new(
        state.store.clone(),
        state.llm.clone(),
        state.prompts.clone(),
        run_id,
        request,
    );
    tokio::spawn(pipeline.run());

    Ok(Json(RunResponse { run_id }))
}

fn validate(request: &RunRequest) -> Result<(), AppError> {
    if request.question.trim().is_empty() {
        return Err(AppError::Validation("question cannot be empty".to_string()));
    }
    if request.jd_text.trim().is_empty() {
        return Err(AppError::Validation("jd_text cannot be empty".to_string()));
    }
    if request.resume_text.trim().is_empty() {
        return Err(AppError::Validation(
            "resume_text cannot be empty".to_string(),
        ));
    }
    if request.model.trim().is_empty() {
        return Err(AppError::Validation("model cannot be empty".to_string()));
    }
    if !(1..=5).contains(&request.judge_strictness) {
        return Err(AppError::Validation(
            "judge_strictness must be between 1 and 5".to_string(),
        ));
    }
    if request.max_retries > 5 {
        return Err(AppError::Validation(
            "max_retries must be between 0 and 5".to_string(),
        ));
    }
    Ok(())
}

/// GET /api/run/:id
///
/// Returns the current run record. Snapshot semantics only: a queued `done`
/// may land right after this read.
pub async fn handle_get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunState>, AppError> {
    state.store.get(run_id).map(Json).ok_or_else(|| {
        info!("run {run_id} not found");
        AppError::NotFound(format!("Run {run_id} not found"))
    })
}

/// GET /api/models
///
/// Model list from the `OLLAMA_MODELS` override when configured, otherwise
/// from the backend. A backend failure is reported in the body rather than as
/// an HTTP error so the UI can still render with an explanatory message.
pub async fn handle_list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    if let Some(models) = &state.config.model_override {
        return Json(ModelsResponse {
            models: models.clone(),
            error: None,
        });
    }

    match state.llm.list_models().await {
        Ok(models) => Json(ModelsResponse {
            models,
            error: None,
        }),
        Err(err) => {
            error!("model listing failed: {err}");
            Json(ModelsResponse {
                models: Vec::new(),
                error: Some(err.to_string()),
            })
        }
    }
}
