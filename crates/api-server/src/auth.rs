//! Session auth: bearer token or httpOnly cookie, backed by `app_sessions`. Password
//! hashing and the identity/billing provider this would sit in front of in production
//! are treated as external collaborators (spec §1 scopes full user management out);
//! this module specifies only the interface the read/admin routes need to call.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap},
    response::IntoResponse,
    Json, Router,
};
use insider_core::time::{iso_after_seconds, utcnow_iso};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{AppError, AppState};

const SESSION_COOKIE_NAME: &str = "session_token";
const SESSION_TTL_SECONDS: i64 = 60 * 60 * 24 * 14;

#[cfg(test)]
#[path = "auth_tests.rs"]
mod auth_tests;

/// Authenticated request identity, extracted from the bearer token or session cookie.
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
    pub is_admin: bool,
    pub subscription_status: String,
}

/// Gates non-admin access to paid read endpoints. The default implementation follows
/// spec §6's "optional dev bypass": with `AUTH_DEV_BYPASS_SUBSCRIPTION=true` every
/// authenticated user passes, otherwise only `active`/`trialing` subscriptions do.
/// A real deployment swaps this for a trait object backed by the billing provider.
pub trait SubscriptionGate: Send + Sync {
    fn is_active(&self, user: &AuthUser) -> bool;
}

pub struct DefaultSubscriptionGate;

impl SubscriptionGate for DefaultSubscriptionGate {
    fn is_active(&self, user: &AuthUser) -> bool {
        if user.is_admin {
            return true;
        }
        if std::env::var("AUTH_DEV_BYPASS_SUBSCRIPTION").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
        {
            return true;
        }
        matches!(user.subscription_status.as_str(), "active" | "trialing")
    }
}

pub fn require_subscription(user: &AuthUser) -> Result<(), AppError> {
    if DefaultSubscriptionGate.is_active(user) {
        Ok(())
    } else {
        Err(AppError::SubscriptionRequired)
    }
}

/// Hashes with Argon2id and a fresh random salt per call, encoded as a self-describing
/// PHC string (algorithm + params + salt + hash all in one field) so `verify_password`
/// never needs the caller to remember which parameters a given row was hashed with.
fn hash_password(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .expect("argon2 hashing with a freshly generated salt cannot fail")
        .to_string()
}

fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get("Authorization") {
        if let Ok(s) = auth.to_str() {
            if let Some(token) = s.strip_prefix("Bearer ") {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    headers.get("cookie").and_then(|v| v.to_str().ok()).and_then(|cookie_header| {
        cookie_header.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE_NAME).then(|| value.to_string())
        })
    })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers).ok_or(AppError::Unauthorized)?;

        let row: Option<(i64, String, bool, String, String)> = sqlx::query_as(
            r#"
            SELECT u.user_id, u.email, u.is_admin <> 0, u.subscription_status, s.expires_at
            FROM app_sessions s JOIN app_users u ON u.user_id = s.user_id
            WHERE s.token = $1
            "#,
        )
        .bind(&token)
        .fetch_optional(&state.pool)
        .await?;

        let Some((user_id, email, is_admin, subscription_status, expires_at)) = row else {
            return Err(AppError::Unauthorized);
        };

        if expires_at < utcnow_iso() {
            return Err(AppError::Unauthorized);
        }

        Ok(AuthUser { user_id, email, is_admin, subscription_status })
    }
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
struct SessionResponse {
    token: String,
    expires_at: String,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<crate::ApiResponse<SessionResponse>>, AppError> {
    if req.email.trim().is_empty() || req.password.len() < 8 {
        return Err(AppError::BadRequest("email required and password must be at least 8 characters".into()));
    }

    let now = utcnow_iso();
    let password_hash = hash_password(&req.password);

    let user_id: Option<(i64,)> = sqlx::query_as(
        "INSERT INTO app_users (email, password_hash, is_admin, subscription_status, created_at) VALUES ($1,$2,0,'none',$3) ON CONFLICT (email) DO NOTHING RETURNING user_id",
    )
    .bind(req.email.trim())
    .bind(&password_hash)
    .bind(&now)
    .fetch_optional(&state.pool)
    .await?;

    let Some((user_id,)) = user_id else {
        return Err(AppError::Conflict("an account with that email already exists".into()));
    };

    issue_session(&state, user_id).await
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<crate::ApiResponse<SessionResponse>>, AppError> {
    let ip = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()).unwrap_or("unknown").to_string();

    if state.brute_force.is_locked(&ip) {
        return Err(AppError::Forbidden("too many failed login attempts; try again later".into()));
    }

    let row: Option<(i64, String)> = sqlx::query_as("SELECT user_id, password_hash FROM app_users WHERE email = $1")
        .bind(req.email.trim())
        .fetch_optional(&state.pool)
        .await?;

    let Some((user_id, password_hash)) = row else {
        state.brute_force.record_failure(&ip);
        return Err(AppError::Unauthorized);
    };

    if !verify_password(&req.password, &password_hash) {
        state.brute_force.record_failure(&ip);
        return Err(AppError::Unauthorized);
    }

    state.brute_force.record_success(&ip);
    issue_session(&state, user_id).await
}

async fn issue_session(state: &AppState, user_id: i64) -> Result<Json<crate::ApiResponse<SessionResponse>>, AppError> {
    let token = Uuid::new_v4().to_string();
    let now = utcnow_iso();
    let expires_at = iso_after_seconds(SESSION_TTL_SECONDS);

    sqlx::query("INSERT INTO app_sessions (token, user_id, created_at, expires_at) VALUES ($1,$2,$3,$4)")
        .bind(&token)
        .bind(user_id)
        .bind(&now)
        .bind(&expires_at)
        .execute(&state.pool)
        .await?;

    Ok(crate::ApiResponse::ok(SessionResponse { token, expires_at }))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    if let Some(token) = extract_token(&headers) {
        sqlx::query("DELETE FROM app_sessions WHERE token = $1").bind(token).execute(&state.pool).await?;
    }
    Ok(Json(json!({ "success": true })))
}

async fn me(user: AuthUser) -> Json<crate::ApiResponse<AuthUser>> {
    crate::ApiResponse::ok(user)
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub is_admin: bool,
}

pub async fn admin_create_user(
    State(state): State<AppState>,
    _admin: AuthUser,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<crate::ApiResponse<serde_json::Value>>, AppError> {
    let now = utcnow_iso();
    let password_hash = hash_password(&req.password);

    let row: Option<(i64,)> = sqlx::query_as(
        "INSERT INTO app_users (email, password_hash, is_admin, subscription_status, created_at) VALUES ($1,$2,$3,'none',$4) ON CONFLICT (email) DO NOTHING RETURNING user_id",
    )
    .bind(req.email.trim())
    .bind(&password_hash)
    .bind(req.is_admin as i32)
    .bind(&now)
    .fetch_optional(&state.pool)
    .await?;

    let Some((user_id,)) = row else {
        return Err(AppError::Conflict("an account with that email already exists".into()));
    };

    Ok(crate::ApiResponse::ok(json!({ "user_id": user_id })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", axum::routing::post(register))
        .route("/api/auth/login", axum::routing::post(login))
        .route("/api/auth/logout", axum::routing::post(logout))
        .route("/api/auth/me", axum::routing::get(me))
}
