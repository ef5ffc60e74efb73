//! User feedback submission/listing.

use axum::{extract::State, routing::get, Json, Router};
use insider_core::time::utcnow_iso;
use serde::{Deserialize, Serialize};

use crate::{auth::AuthUser, AppError, AppState, ApiResponse};

#[derive(Deserialize)]
pub struct SubmitFeedbackRequest {
    pub message: String,
    pub category: Option<String>,
}

#[derive(Serialize, sqlx::FromRow)]
pub struct FeedbackItem {
    pub feedback_id: i64,
    pub user_id: Option<i64>,
    pub message: String,
    pub category: Option<String>,
    pub created_at: String,
}

async fn submit(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<SubmitFeedbackRequest>,
) -> Result<Json<ApiResponse<FeedbackItem>>, AppError> {
    if req.message.trim().is_empty() {
        return Err(AppError::BadRequest("message must not be empty".into()));
    }

    let now = utcnow_iso();
    let item: FeedbackItem = sqlx::query_as(
        r#"
        INSERT INTO user_feedback (user_id, message, category, created_at)
        VALUES ($1,$2,$3,$4)
        RETURNING feedback_id, user_id, message, category, created_at
        "#,
    )
    .bind(user.user_id)
    .bind(req.message.trim())
    .bind(&req.category)
    .bind(&now)
    .fetch_one(&state.pool)
    .await?;

    Ok(ApiResponse::ok(item))
}

/// Admins see every submission; everyone else sees only their own.
async fn list(State(state): State<AppState>, user: AuthUser) -> Result<Json<ApiResponse<Vec<FeedbackItem>>>, AppError> {
    let items: Vec<FeedbackItem> = if user.is_admin {
        sqlx::query_as("SELECT feedback_id, user_id, message, category, created_at FROM user_feedback ORDER BY feedback_id DESC LIMIT 200")
            .fetch_all(&state.pool)
            .await?
    } else {
        sqlx::query_as(
            "SELECT feedback_id, user_id, message, category, created_at FROM user_feedback WHERE user_id = $1 ORDER BY feedback_id DESC LIMIT 200",
        )
        .bind(user.user_id)
        .fetch_all(&state.pool)
        .await?
    };

    Ok(ApiResponse::ok(items))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/feedback", get(list).post(submit))
}
