//! Billing surface: plans/status/checkout/portal/webhook. The payment processor is an
//! external collaborator (spec §1); these handlers specify the interface a provider
//! integration would sit behind rather than reimplementing Stripe-equivalent logic.

use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;

use crate::{auth::AuthUser, AppError, AppState, ApiResponse};

async fn plans() -> Json<ApiResponse<serde_json::Value>> {
    ApiResponse::ok(json!({
        "plans": [
            { "id": "monthly", "name": "Monthly", "price_usd": 49 },
            { "id": "annual", "name": "Annual", "price_usd": 470 },
        ]
    }))
}

async fn status(user: AuthUser) -> Json<ApiResponse<serde_json::Value>> {
    ApiResponse::ok(json!({ "subscription_status": user.subscription_status }))
}

async fn checkout(_state: State<AppState>, _user: AuthUser) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    Err(AppError::BadRequest("billing provider not configured in this deployment".into()))
}

async fn portal(_state: State<AppState>, _user: AuthUser) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    Err(AppError::BadRequest("billing provider not configured in this deployment".into()))
}

/// Webhook receiver for the external payment processor. Accepts and acknowledges
/// without verifying a signature, since no provider is wired up — a real deployment
/// replaces this with signature verification against the configured provider secret.
async fn webhook(_state: State<AppState>, body: String) -> Json<serde_json::Value> {
    tracing::info!(bytes = body.len(), "billing webhook received (no provider configured; ignored)");
    Json(json!({ "received": true }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/billing/plans", get(plans))
        .route("/api/billing/status", get(status))
        .route("/api/billing/checkout", axum::routing::post(checkout))
        .route("/api/billing/portal", axum::routing::post(portal))
        .route("/api/billing/webhook", axum::routing::post(webhook))
}
