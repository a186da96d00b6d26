//! The trigger endpoint and the authenticated procedure listing.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use hookd_core::runner::{self, ExecutionRecord, Outcome, StepResult};
use hookd_core::{auth, HookdError};

use crate::error::AppError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

/// Structured outcome body returned by the trigger endpoint for every
/// category. Never carries the configured credential or server
/// environment — only the triggered commands' own output.
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub outcome: &'static str,
    pub summary: String,
    /// RFC 3339 start time of the run; absent for rejected triggers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// One-based index of the step a failure or timeout is attributed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step_output: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Serialize)]
pub struct StepSummary {
    pub command: String,
    pub exit_code: Option<i32>,
    pub duration_seconds: f64,
    pub output: String,
}

impl From<&StepResult> for StepSummary {
    fn from(step: &StepResult) -> Self {
        Self {
            command: step.command.clone(),
            exit_code: step.exit_code,
            duration_seconds: step.duration.as_secs_f64(),
            output: step.output.clone(),
        }
    }
}

fn rejection(status: StatusCode, outcome: &'static str, summary: String) -> Response {
    (
        status,
        Json(TriggerResponse {
            outcome,
            summary,
            started_at: None,
            failed_step: None,
            failed_step_output: None,
            steps: Vec::new(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Credential extraction
// ---------------------------------------------------------------------------

fn presented_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .or_else(|| headers.get("x-hookd-token").and_then(|v| v.to_str().ok()))
}

fn presented_signature(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
}

fn authorize(app: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), HookdError> {
    auth::authorize(
        &app.auth,
        presented_token(headers),
        presented_signature(headers),
        body,
    )
}

// ---------------------------------------------------------------------------
// POST /hooks/{id}
// ---------------------------------------------------------------------------

/// Run the named procedure and report the outcome.
///
/// Flow: authenticate → registry lookup → acquire the execution slot →
/// run → format. Every category gets a structured body; the HTTP status
/// reflects the category (401/404/409 client side, 200 success,
/// 500/504 execution failure).
pub async fn trigger(
    Path(id): Path<String>,
    State(app): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if authorize(&app, &headers, &body).is_err() {
        warn!(procedure = %id, "trigger rejected: invalid or missing credential");
        return rejection(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "invalid or missing credential".to_string(),
        );
    }

    let Some(def) = app.registry.lookup(&id) else {
        warn!(procedure = %id, "trigger rejected: unknown procedure");
        return rejection(
            StatusCode::NOT_FOUND,
            "unknown-procedure",
            format!("no procedure named '{id}'"),
        );
    };

    // Held for the whole run; dropping it on any exit path below frees
    // the slot for the next trigger.
    let _slot = match app.slots.acquire(&id, def.on_busy).await {
        Ok(guard) => guard,
        Err(_) => {
            info!(procedure = %id, "trigger rejected: deployment already in progress");
            return rejection(
                StatusCode::CONFLICT,
                "already-running",
                format!("deployment already in progress for '{id}'"),
            );
        }
    };

    info!(procedure = %id, steps = def.steps.len(), "trigger accepted");
    let record = runner::run(def).await;
    record_response(&record, def.timeout_secs)
}

fn record_response(record: &ExecutionRecord, timeout_secs: u64) -> Response {
    let steps: Vec<StepSummary> = record.steps.iter().map(StepSummary::from).collect();
    let failed_step_output = record.failed_step().map(|s| s.output.clone());

    let (status, outcome, summary, failed_step) = match record.outcome {
        Outcome::Succeeded => (
            StatusCode::OK,
            record.outcome.label(),
            format!(
                "procedure '{}' completed: {} step(s) succeeded",
                record.procedure,
                record.steps.len()
            ),
            None,
        ),
        Outcome::FailedAtStep(n) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            record.outcome.label(),
            format!(
                "procedure '{}' failed at step {} (`{}`)",
                record.procedure,
                n + 1,
                record.steps.get(n).map(|s| s.command.as_str()).unwrap_or("?"),
            ),
            Some(n + 1),
        ),
        Outcome::TimedOut => (
            StatusCode::GATEWAY_TIMEOUT,
            record.outcome.label(),
            format!(
                "procedure '{}' exceeded its {timeout_secs}s budget and was terminated",
                record.procedure,
            ),
            // The killed step if one was recorded; otherwise the budget
            // ran out between steps and the timeout belongs to the step
            // that never started.
            Some(if record.failed_step().is_some() {
                record.steps.len()
            } else {
                record.steps.len() + 1
            }),
        ),
    };

    (
        status,
        Json(TriggerResponse {
            outcome,
            summary,
            started_at: Some(record.started_at.to_rfc3339()),
            failed_step,
            failed_step_output,
            steps,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /hooks
// ---------------------------------------------------------------------------

/// List registered procedures. Requires the same credential as a trigger;
/// for HMAC auth the signature covers the empty body.
pub async fn list_hooks(
    State(app): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    authorize(&app, &headers, b"")?;

    let hooks: Vec<serde_json::Value> = app
        .registry
        .ids()
        .into_iter()
        .filter_map(|id| app.registry.lookup(id))
        .map(|def| {
            serde_json::json!({
                "id": def.id,
                "steps": def.steps.len(),
                "timeout_secs": def.timeout_secs,
                "on_busy": def.on_busy,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({ "hooks": hooks })))
}
