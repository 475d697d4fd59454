//! Campaign control surface. Handlers parse, delegate to the command
//! invoker or segment distributor, and wrap results in the API envelope;
//! all status branching lives in the state machine.

pub mod commands;
pub mod dispatch;
pub mod pipeline;
pub mod segments;
pub mod state;

use crate::shared::models::{
    ApiResponse, AudienceKind, Campaign, CampaignStatus, Segment,
};
use crate::shared::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use commands::{CampaignCommand, CommandOutcome, ControlError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub fn configure_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/campaigns", get(list_campaigns).post(create_campaign))
        .route("/api/campaigns/{id}", get(get_campaign))
        .route("/api/campaigns/{id}/schedule", post(schedule_campaign))
        .route("/api/campaigns/{id}/send", post(send_campaign))
        .route("/api/campaigns/{id}/pause", post(pause_campaign))
        .route("/api/campaigns/{id}/resume", post(resume_campaign))
        .route("/api/campaigns/{id}/stop", post(stop_campaign))
        .route(
            "/api/campaigns/{id}/recipients",
            post(add_recipients).delete(remove_recipients),
        )
        .route(
            "/api/campaigns/{id}/segments",
            post(create_segments).delete(delete_segments),
        )
        .route("/api/segments/{id}/send", post(send_segment))
        .route("/api/segments/{id}", put(update_segment))
}

type HandlerError = (StatusCode, String);

fn map_control_error(e: ControlError) -> HandlerError {
    match e {
        ControlError::NotFound(what) => (StatusCode::NOT_FOUND, what),
        ControlError::Rejected(reason) => (StatusCode::UNPROCESSABLE_ENTITY, reason),
        ControlError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn transition_response(
    outcome: Result<CommandOutcome, ControlError>,
) -> Result<Json<ApiResponse<()>>, HandlerError> {
    match outcome {
        Ok(CommandOutcome::Transition { changed, message }) => Ok(Json(ApiResponse {
            success: changed,
            data: None,
            message: Some(message),
        })),
        Ok(CommandOutcome::Count(_)) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "unexpected command outcome".to_string(),
        )),
        Err(e) => Err(map_control_error(e)),
    }
}

fn count_response(
    outcome: Result<CommandOutcome, ControlError>,
) -> Result<Json<ApiResponse<usize>>, HandlerError> {
    match outcome {
        Ok(CommandOutcome::Count(n)) => Ok(Json(ApiResponse::ok(n))),
        Ok(CommandOutcome::Transition { .. }) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "unexpected command outcome".to_string(),
        )),
        Err(e) => Err(map_control_error(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    #[serde(default = "default_audience")]
    pub audience: AudienceKind,
    pub subject: String,
    pub body_html: String,
}

fn default_audience() -> AudienceKind {
    AudienceKind::Contact
}

#[derive(Debug, Serialize)]
pub struct CampaignSummary {
    pub id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub audience: AudienceKind,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Campaign> for CampaignSummary {
    fn from(c: Campaign) -> Self {
        Self {
            id: c.id,
            name: c.name,
            status: c.status,
            audience: c.audience,
            scheduled_at: c.scheduled_at,
            completed_at: c.completed_at,
        }
    }
}

pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateCampaignRequest>,
) -> Result<Json<ApiResponse<CampaignSummary>>, HandlerError> {
    let campaign = Campaign::new(
        &request.name,
        request.audience,
        &request.subject,
        &request.body_html,
        state.clock.now(),
    );
    state
        .store
        .insert_campaign(&campaign)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(ApiResponse::ok(campaign.into())))
}

pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<CampaignSummary>>>, HandlerError> {
    let campaigns = state
        .store
        .list_campaigns()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(ApiResponse::ok(
        campaigns.into_iter().map(CampaignSummary::from).collect(),
    )))
}

pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Campaign>>, HandlerError> {
    let campaign = state
        .store
        .campaign(id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or((StatusCode::NOT_FOUND, format!("campaign {id} not found")))?;
    Ok(Json(ApiResponse::ok(campaign)))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub send_at: DateTime<Utc>,
}

pub async fn schedule_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<ApiResponse<()>>, HandlerError> {
    transition_response(
        state
            .invoker()
            .execute(id, CampaignCommand::Schedule { at: request.send_at }),
    )
}

pub async fn send_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, HandlerError> {
    transition_response(state.invoker().execute(id, CampaignCommand::Send))
}

pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, HandlerError> {
    transition_response(state.invoker().execute(id, CampaignCommand::Pause))
}

pub async fn resume_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, HandlerError> {
    transition_response(state.invoker().execute(id, CampaignCommand::Resume))
}

pub async fn stop_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, HandlerError> {
    transition_response(state.invoker().execute(id, CampaignCommand::Stop))
}

#[derive(Debug, Deserialize)]
pub struct RecipientIdsRequest {
    pub ids: Vec<Uuid>,
}

pub async fn add_recipients(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<RecipientIdsRequest>,
) -> Result<Json<ApiResponse<usize>>, HandlerError> {
    count_response(
        state
            .invoker()
            .execute(id, CampaignCommand::AddRecipients { ids: request.ids }),
    )
}

pub async fn remove_recipients(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<RecipientIdsRequest>,
) -> Result<Json<ApiResponse<usize>>, HandlerError> {
    count_response(
        state
            .invoker()
            .execute(id, CampaignCommand::RemoveRecipients { ids: request.ids }),
    )
}

#[derive(Debug, Deserialize)]
pub struct CreateSegmentsRequest {
    pub count: usize,
}

pub async fn create_segments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<CreateSegmentsRequest>,
) -> Result<Json<ApiResponse<Vec<Segment>>>, HandlerError> {
    state
        .segments()
        .create_segments(id, request.count)
        .map(|segments| Json(ApiResponse::ok(segments)))
        .map_err(map_control_error)
}

pub async fn delete_segments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<usize>>, HandlerError> {
    state
        .segments()
        .delete_segments(id)
        .map(|deleted| Json(ApiResponse::ok(deleted)))
        .map_err(map_control_error)
}

pub async fn send_segment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, HandlerError> {
    state
        .segments()
        .send_segment(id)
        .map(|()| {
            Json(ApiResponse {
                success: true,
                data: None,
                message: Some("segment sending".to_string()),
            })
        })
        .map_err(map_control_error)
}

#[derive(Debug, Deserialize)]
pub struct UpdateSegmentRequest {
    pub subject_override: Option<String>,
    pub body_override: Option<String>,
}

pub async fn update_segment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSegmentRequest>,
) -> Result<Json<ApiResponse<Segment>>, HandlerError> {
    state
        .segments()
        .update_segment(id, request.subject_override, request.body_override)
        .map(|segment| Json(ApiResponse::ok(segment)))
        .map_err(map_control_error)
}
