//! Web server module.
//!
//! - `POST /webhook` receives signed CRM events and relays them
//! - `/admin/*` exposes the outcome log and the enabled switch
//! - `GET /health` for liveness probes

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    admin_config, admin_logs, admin_set_config, admin_toggle, crm_webhook, health, AppState,
    HealthResponse, WebhookResponse, ADMIN_TOKEN_HEADER,
};
pub use signature::{compute_signature, verify_signature};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(crm_webhook))
        .route("/admin/logs", get(admin_logs))
        .route("/admin/config", get(admin_config).put(admin_set_config))
        .route("/admin/toggle", post(admin_toggle))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
