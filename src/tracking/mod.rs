//! Open/click tracking and delivery-status ingestion: token-guarded pixel
//! and redirect endpoints, content injection used by the delivery pipeline,
//! and the provider webhook.

pub mod events;
pub mod tokens;

use crate::shared::models::ApiResponse;
use crate::shared::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use events::{EventContext, EventKind};
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tokens::TokenSigner;
use uuid::Uuid;

const TRACKING_PIXEL: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0xFF, 0xFF, 0xFF,
    0x00, 0x00, 0x00, 0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3B,
];

static HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href\s*=\s*"([^"]+)""#).expect("href regex"));

pub fn configure_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/track/open/{campaign_id}/{contact_id}/{token}",
            get(serve_open_pixel),
        )
        .route(
            "/track/click/{campaign_id}/{contact_id}/{token}",
            get(click_redirect),
        )
        .route("/webhooks/delivery", post(delivery_webhook))
}

// ===== Content injection =====

pub fn pixel_url(
    public_url: &str,
    campaign_id: Uuid,
    contact_id: Uuid,
    signer: &TokenSigner,
) -> String {
    let token = signer.mint(campaign_id, contact_id);
    format!("{public_url}/track/open/{campaign_id}/{contact_id}/{token}")
}

pub fn click_url(
    public_url: &str,
    campaign_id: Uuid,
    contact_id: Uuid,
    signer: &TokenSigner,
    destination: &str,
) -> String {
    let token = signer.mint(campaign_id, contact_id);
    let encoded = URL_SAFE_NO_PAD.encode(destination);
    format!("{public_url}/track/click/{campaign_id}/{contact_id}/{token}?url={encoded}")
}

/// Appends the invisible open-tracking pixel, inside `</body>` when present.
pub fn inject_pixel(
    html: &str,
    campaign_id: Uuid,
    contact_id: Uuid,
    signer: &TokenSigner,
    public_url: &str,
) -> String {
    let url = pixel_url(public_url, campaign_id, contact_id, signer);
    let pixel = format!(
        r#"<img src="{url}" width="1" height="1" style="display:none;visibility:hidden;width:1px;height:1px;border:0;" alt="" />"#
    );
    if html.to_lowercase().contains("</body>") {
        html.replace("</body>", &format!("{pixel}</body>"))
            .replace("</BODY>", &format!("{pixel}</BODY>"))
    } else {
        format!("{html}{pixel}")
    }
}

/// Rewrites every href to the click-redirect endpoint, except mailto links.
pub fn rewrite_links(
    html: &str,
    campaign_id: Uuid,
    contact_id: Uuid,
    signer: &TokenSigner,
    public_url: &str,
) -> String {
    HREF_RE
        .replace_all(html, |caps: &regex::Captures<'_>| {
            let destination = &caps[1];
            if destination.starts_with("mailto:") {
                return caps[0].to_string();
            }
            let redirect = click_url(public_url, campaign_id, contact_id, signer, destination);
            format!(r#"href="{redirect}""#)
        })
        .into_owned()
}

// ===== Endpoints =====

fn client_meta(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        });
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    (ip, user_agent)
}

pub async fn serve_open_pixel(
    Path((campaign_id, contact_id, token)): Path<(Uuid, Uuid, String)>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if !state.signer.verify(campaign_id, contact_id, &token) {
        warn!("rejected open-tracking token for campaign {campaign_id}, contact {contact_id}");
        return (StatusCode::FORBIDDEN, "invalid token").into_response();
    }

    let (ip, user_agent) = client_meta(&headers);
    if let Err(e) = state.recorder().record_campaign_event(
        campaign_id,
        contact_id,
        EventKind::Open,
        EventContext {
            ip: ip.clone(),
            user_agent,
            payload: serde_json::json!({}),
        },
    ) {
        error!("failed to record open event: {e}");
    }
    info!("open tracked: campaign {campaign_id}, contact {contact_id}, ip {ip:?}");

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/gif"),
            (
                header::CACHE_CONTROL,
                "no-store, no-cache, must-revalidate, max-age=0",
            ),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        TRACKING_PIXEL.to_vec(),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ClickQuery {
    pub url: String,
}

pub async fn click_redirect(
    Path((campaign_id, contact_id, token)): Path<(Uuid, Uuid, String)>,
    Query(query): Query<ClickQuery>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if !state.signer.verify(campaign_id, contact_id, &token) {
        warn!("rejected click token for campaign {campaign_id}, contact {contact_id}");
        return (StatusCode::FORBIDDEN, "invalid token").into_response();
    }

    let destination = match URL_SAFE_NO_PAD
        .decode(query.url.as_bytes())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
    {
        Some(url) => url,
        None => {
            error!("undecodable click destination for campaign {campaign_id}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "bad destination").into_response();
        }
    };

    let (ip, user_agent) = client_meta(&headers);
    if let Err(e) = state.recorder().record_campaign_event(
        campaign_id,
        contact_id,
        EventKind::Click,
        EventContext {
            ip,
            user_agent,
            payload: serde_json::json!({ "url": destination }),
        },
    ) {
        error!("failed to record click event: {e}");
    }

    (StatusCode::FOUND, [(header::LOCATION, destination)]).into_response()
}

// ===== Delivery-status webhook =====

fn tag_value(message: &serde_json::Value, tag: &str) -> Option<String> {
    let tags = message.get("mail")?.get("tags")?;
    match tags.get(tag)? {
        serde_json::Value::Array(values) => values.first()?.as_str().map(|s| s.to_string()),
        serde_json::Value::String(value) => Some(value.clone()),
        _ => None,
    }
}

pub async fn delivery_webhook(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<serde_json::Value>,
) -> Response {
    let kind = envelope.get("Type").and_then(|v| v.as_str());
    match kind {
        Some("SubscriptionConfirmation") => {
            let Some(url) = envelope.get("SubscribeURL").and_then(|v| v.as_str()) else {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::<()>::rejected("missing SubscribeURL")),
                )
                    .into_response();
            };
            match reqwest::get(url).await {
                Ok(response) => info!("confirmed webhook subscription: {}", response.status()),
                Err(e) => error!("webhook subscription confirmation failed: {e}"),
            }
            Json(ApiResponse::ok(())).into_response()
        }
        Some("Notification") => {
            let Some(message) = envelope
                .get("Message")
                .and_then(|v| v.as_str())
                .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            else {
                // Unparseable notifications are acknowledged so the sender
                // does not retry-storm us.
                debug!("ignoring unparseable delivery notification");
                return Json(ApiResponse::<()>::rejected("unrecognized notification"))
                    .into_response();
            };

            let event = match message.get("notificationType").and_then(|v| v.as_str()) {
                Some("Delivery") => EventKind::Delivery,
                Some("Bounce") => EventKind::Bounce,
                Some("Complaint") => EventKind::Complaint,
                other => {
                    debug!("ignoring delivery notification type {other:?}");
                    return Json(ApiResponse::<()>::rejected("unrecognized notification"))
                        .into_response();
                }
            };

            let ctx = EventContext {
                ip: None,
                user_agent: None,
                payload: message.clone(),
            };

            let campaign_pair = tag_value(&message, "campaign_id")
                .and_then(|c| Uuid::parse_str(&c).ok())
                .zip(tag_value(&message, "contact_id").and_then(|c| Uuid::parse_str(&c).ok()));
            let sequence_email =
                tag_value(&message, "sequence_email_id").and_then(|c| Uuid::parse_str(&c).ok());

            let recorded = if let Some((campaign_id, contact_id)) = campaign_pair {
                state
                    .recorder()
                    .record_campaign_event(campaign_id, contact_id, event, ctx)
            } else if let Some(email_id) = sequence_email {
                state.recorder().record_sequence_event(email_id, event, ctx)
            } else {
                debug!("delivery notification without routable tags");
                return Json(ApiResponse::<()>::rejected("unrecognized notification"))
                    .into_response();
            };

            match recorded {
                Ok(()) => Json(ApiResponse::ok(())).into_response(),
                Err(e) => {
                    error!("failed to record delivery notification: {e}");
                    (StatusCode::INTERNAL_SERVER_ERROR, "event recording failed").into_response()
                }
            }
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::rejected("unrecognized payload")),
        )
            .into_response(),
    }
}
