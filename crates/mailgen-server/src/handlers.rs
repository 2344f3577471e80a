//! HTTP handlers. Every mail endpoint runs the same gate order: identity,
//! admission, body validation, then the orchestrator (which checks provider
//! configuration before any external call).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use mailgen_core::ids::DraftId;
use mailgen_engine::{Admission, AdmissionController, GenerationOrchestrator, SendOrchestrator, SendRequest};
use mailgen_store::Database;
use mailgen_telemetry::MetricsRecorder;
use serde::Serialize;
use tracing::debug;

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::server::AppState;
use crate::validation::{parse_body, GenerateEmailRequest, SendEmailRequest};

/// Shared state available to all handlers.
pub struct HandlerState {
    pub db: Database,
    pub admission: Arc<AdmissionController>,
    pub generation: GenerationOrchestrator,
    pub sending: SendOrchestrator,
    pub metrics: Arc<MetricsRecorder>,
}

impl HandlerState {
    fn admit(&self, user: &CurrentUser) -> Result<(), ApiError> {
        match self.admission.check(user.id.as_str()) {
            Admission::Admitted => Ok(()),
            Admission::Rejected { retry_after } => {
                debug!(user_id = %user.id, ?retry_after, "admission rejected");
                Err(ApiError::RateLimited { retry_after })
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateEmailResponse {
    pub id: String,
    pub subject: String,
    pub content: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SendEmailResponse {
    pub success: bool,
    pub message: String,
}

pub async fn generate_email(
    State(state): State<AppState>,
    user: CurrentUser,
    body: Bytes,
) -> Result<Json<GenerateEmailResponse>, ApiError> {
    let hs = &state.handler_state;
    hs.admit(&user)?;

    let req: GenerateEmailRequest =
        parse_body(&body, GenerateEmailRequest::validate).map_err(ApiError::Validation)?;

    let draft = hs
        .generation
        .generate_draft(&user.id, &req.prompt, req.recipients)
        .await?;

    Ok(Json(GenerateEmailResponse {
        id: draft.id.to_string(),
        subject: draft.subject,
        content: draft.content,
        recipients: draft.recipients,
    }))
}

pub async fn send_email(
    State(state): State<AppState>,
    user: CurrentUser,
    body: Bytes,
) -> Result<Json<SendEmailResponse>, ApiError> {
    let hs = &state.handler_state;
    hs.admit(&user)?;

    let req: SendEmailRequest =
        parse_body(&body, SendEmailRequest::validate).map_err(ApiError::Validation)?;

    let report = hs
        .sending
        .send(
            &user.id,
            SendRequest {
                subject: req.subject,
                content: req.content,
                recipients: req.recipients,
                draft_id: req.draft_id.map(DraftId::from_raw),
            },
        )
        .await?;

    Ok(Json(SendEmailResponse {
        success: true,
        message: report.message(),
    }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let hs = &state.handler_state;
    let db_ok = hs
        .db
        .with_conn(|conn| {
            conn.execute_batch("SELECT 1")?;
            Ok(true)
        })
        .unwrap_or(false);

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if db_ok { "healthy" } else { "degraded" },
            "trackedIdentities": hs.admission.tracked_identities(),
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.handler_state.metrics.snapshot())
}
