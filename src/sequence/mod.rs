//! Sequence control surface: create/list, activate/pause, enrollment.

pub mod engine;

use crate::campaign::commands::ControlError;
use crate::shared::models::{ApiResponse, Sequence, SequenceStep};
use crate::shared::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::NaiveTime;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

pub fn configure_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sequences", get(list_sequences).post(create_sequence))
        .route("/api/sequences/{id}", get(get_sequence))
        .route("/api/sequences/{id}/activate", post(activate_sequence))
        .route("/api/sequences/{id}/pause", post(pause_sequence))
        .route("/api/sequences/{id}/contacts", post(add_contacts))
        .route(
            "/api/sequences/{id}/contacts/{contact_id}",
            delete(remove_contact),
        )
}

type HandlerError = (StatusCode, String);

fn map_control_error(e: ControlError) -> HandlerError {
    match e {
        ControlError::NotFound(what) => (StatusCode::NOT_FOUND, what),
        ControlError::Rejected(reason) => (StatusCode::UNPROCESSABLE_ENTITY, reason),
        ControlError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateStepRequest {
    pub delay_days: i32,
    pub send_time: Option<NaiveTime>,
    pub subject: String,
    pub body_html: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSequenceRequest {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<CreateStepRequest>,
}

pub async fn create_sequence(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSequenceRequest>,
) -> Result<Json<ApiResponse<Sequence>>, HandlerError> {
    let now = state.clock.now();
    let sequence = Sequence::new(&request.name, now);
    state
        .store
        .insert_sequence(&sequence)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    for (position, step) in request.steps.into_iter().enumerate() {
        state
            .store
            .insert_step(&SequenceStep {
                id: Uuid::new_v4(),
                sequence_id: sequence.id,
                position: position as i32,
                delay_days: step.delay_days,
                send_time: step.send_time,
                subject: step.subject,
                body_html: step.body_html,
                created_at: now,
            })
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }

    Ok(Json(ApiResponse::ok(sequence)))
}

pub async fn list_sequences(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Sequence>>>, HandlerError> {
    state
        .store
        .list_sequences()
        .map(|sequences| Json(ApiResponse::ok(sequences)))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub async fn get_sequence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Sequence>>, HandlerError> {
    let sequence = state
        .store
        .sequence(id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or((StatusCode::NOT_FOUND, format!("sequence {id} not found")))?;
    Ok(Json(ApiResponse::ok(sequence)))
}

pub async fn activate_sequence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, HandlerError> {
    state
        .sequences()
        .activate(id)
        .map(|()| {
            Json(ApiResponse {
                success: true,
                data: None,
                message: Some("sequence activated".to_string()),
            })
        })
        .map_err(map_control_error)
}

pub async fn pause_sequence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, HandlerError> {
    state
        .sequences()
        .pause(id)
        .map(|()| {
            Json(ApiResponse {
                success: true,
                data: None,
                message: Some("sequence paused".to_string()),
            })
        })
        .map_err(map_control_error)
}

#[derive(Debug, Deserialize)]
pub struct AddContactsRequest {
    pub ids: Vec<Uuid>,
}

pub async fn add_contacts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<AddContactsRequest>,
) -> Result<Json<ApiResponse<usize>>, HandlerError> {
    state
        .sequences()
        .add_contacts(id, &request.ids)
        .map(|enrolled| Json(ApiResponse::ok(enrolled)))
        .map_err(map_control_error)
}

pub async fn remove_contact(
    State(state): State<Arc<AppState>>,
    Path((id, contact_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<()>>, HandlerError> {
    state
        .sequences()
        .remove_contact(id, contact_id)
        .map(|()| {
            Json(ApiResponse {
                success: true,
                data: None,
                message: Some("contact removed from sequence".to_string()),
            })
        })
        .map_err(map_control_error)
}
