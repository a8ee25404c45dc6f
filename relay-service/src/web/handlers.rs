//! HTTP endpoint handlers.
//!
//! The webhook handler hands the raw body bytes to the [`Relay`] so the
//! signature is checked before anything is parsed. Admin handlers read and
//! write the store directly.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::relay::{Relay, RelayOutcome};
use crate::store::{LogRecord, RelayConfig};
use crate::web::signature::constant_time_compare;
use crate::Config;

/// Header checked on admin routes when an admin token is configured.
pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: Relay,
}

impl AppState {
    pub fn new(config: Config, relay: Relay) -> Self {
        Self {
            config: Arc::new(config),
            relay,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// CRM Webhook
// =============================================================================

/// Webhook response.
///
/// Processed events answer `{"success": true}` even when both destinations
/// failed; per-destination results are only visible in the admin log view.
#[derive(Debug, Default, Serialize)]
pub struct WebhookResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<bool>,
}

impl WebhookResponse {
    fn status(status: &'static str) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// CRM webhook endpoint.
pub async fn crm_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers
        .get(state.config.signature_header.as_str())
        .and_then(|v| v.to_str().ok());

    let outcome = match state.relay.handle(&body, signature).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "relay_config_read_failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookResponse::status("error")),
            )
                .into_response();
        }
    };

    let (code, response) = match outcome {
        RelayOutcome::Unauthorized => (StatusCode::FORBIDDEN, WebhookResponse::status("forbidden")),
        RelayOutcome::Disabled => (StatusCode::SERVICE_UNAVAILABLE, WebhookResponse::status("disabled")),
        RelayOutcome::InvalidPayload(_) => (StatusCode::BAD_REQUEST, WebhookResponse::status("invalid_payload")),
        RelayOutcome::Ignored { .. } => (
            StatusCode::OK,
            WebhookResponse {
                ignored: Some(true),
                ..Default::default()
            },
        ),
        RelayOutcome::Processed(_) => (
            StatusCode::OK,
            WebhookResponse {
                success: Some(true),
                ..Default::default()
            },
        ),
    };

    (code, Json(response)).into_response()
}

// =============================================================================
// Admin
// =============================================================================

#[derive(Debug, Serialize)]
pub struct AdminError {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AdminLogsResponse {
    pub enabled: bool,
    pub logs: Vec<LogRecord>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// Reject the request unless it carries the configured admin token.
fn authorize_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Ok(());
    };

    let provided = headers.get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok());

    match provided {
        Some(token) if constant_time_compare(token, expected) => Ok(()),
        Some(_) => {
            warn!("admin_auth_invalid");
            Err(admin_error(StatusCode::UNAUTHORIZED, "unauthorized"))
        }
        None => {
            warn!("admin_auth_missing");
            Err(admin_error(StatusCode::UNAUTHORIZED, "unauthorized"))
        }
    }
}

fn admin_error(code: StatusCode, status: &'static str) -> Response {
    (code, Json(AdminError { status })).into_response()
}

fn store_error(e: impl std::fmt::Display) -> Response {
    error!(error = %e, "admin_store_error");
    admin_error(StatusCode::INTERNAL_SERVER_ERROR, "error")
}

/// Recent log records (newest first) and the enabled flag.
pub async fn admin_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LogsQuery>,
) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers) {
        return resp;
    }

    let store = state.relay.store();
    let limit = query.limit.unwrap_or(state.config.recent_log_limit);

    let config = match store.read_config().await {
        Ok(c) => c,
        Err(e) => return store_error(e),
    };
    let logs = match store.recent_logs(limit).await {
        Ok(l) => l,
        Err(e) => return store_error(e),
    };

    Json(AdminLogsResponse {
        enabled: config.enabled,
        logs,
    })
    .into_response()
}

/// Current enabled flag.
pub async fn admin_config(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers) {
        return resp;
    }

    match state.relay.store().read_config().await {
        Ok(config) => Json(config).into_response(),
        Err(e) => store_error(e),
    }
}

/// Flip the enabled flag.
pub async fn admin_toggle(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers) {
        return resp;
    }

    match state.relay.store().toggle_enabled().await {
        Ok(config) => {
            info!(enabled = config.enabled, "relay_toggled");
            Json(config).into_response()
        }
        Err(e) => store_error(e),
    }
}

/// Set the enabled flag explicitly.
pub async fn admin_set_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RelayConfig>,
) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers) {
        return resp;
    }

    match state.relay.store().set_enabled(body.enabled).await {
        Ok(config) => {
            info!(enabled = config.enabled, "relay_config_set");
            Json(config).into_response()
        }
        Err(e) => store_error(e),
    }
}
