//! Account and session endpoints.
//!
//! - `POST /token`: exchange credentials for an access token (also set as a
//!   cookie) plus a `refresh_token` cookie
//! - `POST /refresh`: trade the `refresh_token` cookie for a new pair
//! - `POST /create`: self-service registration (accounts start disabled)
//! - `POST /revoke`: revoke the presented tokens
//! - `GET /me`, `DELETE /me`: the caller's own account

use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::authz;
use crate::api::error::{ApiError, FieldError};
use crate::api::request_context::{cookie_value, RequestContext, REFRESH_COOKIE, TOKEN_COOKIE};
use crate::auth::{self, hash_password, Session, REFRESH_TOKEN_LIFETIME_DAYS};
use crate::db::User;
use crate::state::AppState;

const USERNAME_MIN_LEN: usize = 3;
const USERNAME_MAX_LEN: usize = 64;
const PASSWORD_MIN_LEN: usize = 8;

/// The refresh cookie is only sent to the session endpoints.
const REFRESH_COOKIE_PATH: &str = "/v1/system";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/token", post(login))
        .route("/refresh", post(refresh))
        .route("/create", post(create_account))
        .route("/revoke", post(revoke))
        .route("/me", get(get_me).delete(delete_me))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Token lifetime in seconds.
    pub expire_time: i64,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

// =============================================================================
// Handlers
// =============================================================================

async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CredentialsRequest>,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id.clone();

    let user = auth::authenticate(&state.db().users(), req.username.trim(), &req.password)
        .await
        .map_err(|e| ApiError::from_auth(e, &request_id))?;

    if user.disabled {
        return Err(ApiError::bad_request("disabled_account", "Disabled account")
            .with_request_id(request_id));
    }

    let session = state
        .db()
        .tokens()
        .create_session(user.id, state.config().token_lifetime)
        .await
        .map_err(|e| ApiError::from_auth(e, &request_id))?;

    tracing::info!(
        request_id = %request_id,
        user_id = %user.id,
        token_id = %session.access.token_id,
        "Access token issued"
    );
    session_response(&state, session, &request_id)
}

async fn refresh(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id.clone();

    let Some(refresh_token) = cookie_value(&headers, REFRESH_COOKIE) else {
        return Err(
            ApiError::unauthorized("missing_refresh_token", "No refresh token")
                .with_request_id(request_id),
        );
    };

    let session = state
        .db()
        .tokens()
        .rotate(&refresh_token, state.config().token_lifetime)
        .await
        .map_err(|e| ApiError::from_auth(e, &request_id))?;

    tracing::info!(
        request_id = %request_id,
        user_id = %session.user_id,
        token_id = %session.access.token_id,
        "Access token refreshed"
    );
    session_response(&state, session, &request_id)
}

async fn create_account(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let username = req.username.trim();

    let errors = validate_credentials(username, &req.password);
    if !errors.is_empty() {
        return Err(
            ApiError::bad_request("invalid_request", "Invalid account details")
                .with_details(errors)
                .with_request_id(request_id),
        );
    }

    let hashed = hash_password(&req.password).map_err(|e| ApiError::from_auth(e, &request_id))?;
    let user = state
        .db()
        .users()
        .create(username, &hashed, true)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;

    tracing::info!(request_id = %request_id, user_id = %user.id, "User account created");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn revoke(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id.clone();
    let user = authz::require_user(&state, &ctx).await?;

    let tokens = state.db().tokens();
    if let Some(token) = ctx.token.as_deref() {
        tokens
            .revoke(token)
            .await
            .map_err(|e| ApiError::from_auth(e, &request_id))?;
    }
    if let Some(refresh_token) = cookie_value(&headers, REFRESH_COOKIE) {
        tokens
            .revoke_refresh(&refresh_token)
            .await
            .map_err(|e| ApiError::from_auth(e, &request_id))?;
    }

    tracing::info!(request_id = %request_id, user_id = %user.id, "Access token revoked");

    let dev_mode = state.config().dev_mode();
    let cleared_access = cookie_header(&session_cookie("", 0, dev_mode), &request_id)?;
    let cleared_refresh = cookie_header(&refresh_cookie("", 0, dev_mode), &request_id)?;
    let body = MessageResponse {
        message: "Logout successful".to_string(),
    };
    Ok((
        AppendHeaders([(SET_COOKIE, cleared_access), (SET_COOKIE, cleared_refresh)]),
        Json(body),
    )
        .into_response())
}

async fn get_me(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<User>, ApiError> {
    let user = authz::require_active_user(&state, &ctx).await?;
    Ok(Json(user))
}

async fn delete_me(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let user = authz::require_active_user(&state, &ctx).await?;

    state
        .db()
        .users()
        .delete(user.id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;

    tracing::info!(request_id = %request_id, user_id = %user.id, "User deleted own account");
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Helpers
// =============================================================================

fn validate_credentials(username: &str, password: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&username.len()) {
        errors.push(FieldError::new(
            "username",
            format!("must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters"),
        ));
    } else if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        errors.push(FieldError::new(
            "username",
            "may only contain letters, digits, '_', '.' and '-'",
        ));
    }

    if password.chars().count() < PASSWORD_MIN_LEN {
        errors.push(FieldError::new(
            "password",
            format!("must be at least {PASSWORD_MIN_LEN} characters"),
        ));
    }

    errors
}

/// Token response carrying both cookies of a freshly issued session.
fn session_response(
    state: &AppState,
    session: Session,
    request_id: &str,
) -> Result<Response, ApiError> {
    let dev_mode = state.config().dev_mode();
    let lifetime = state.config().token_lifetime;

    let access_header = cookie_header(
        &session_cookie(&session.access.token, lifetime.num_seconds(), dev_mode),
        request_id,
    )?;
    let refresh_header = cookie_header(
        &refresh_cookie(
            &session.refresh.token,
            REFRESH_TOKEN_LIFETIME_DAYS * 24 * 60 * 60,
            dev_mode,
        ),
        request_id,
    )?;

    let body = TokenResponse {
        expire_time: (session.access.expires_at - Utc::now()).num_seconds().max(0),
        access_token: session.access.token,
        token_type: "bearer".to_string(),
    };
    Ok((
        AppendHeaders([(SET_COOKIE, access_header), (SET_COOKIE, refresh_header)]),
        Json(body),
    )
        .into_response())
}

fn cookie_header(cookie: &str, request_id: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(cookie).map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, "Failed to encode session cookie");
        ApiError::internal("internal_error", "Failed to issue token")
            .with_request_id(request_id.to_string())
    })
}

/// `Set-Cookie` value for the session token. An empty token with a zero
/// max-age clears the cookie.
fn session_cookie(token: &str, max_age_seconds: i64, dev_mode: bool) -> String {
    build_cookie(TOKEN_COOKIE, token, "/", max_age_seconds, dev_mode)
}

fn refresh_cookie(token: &str, max_age_seconds: i64, dev_mode: bool) -> String {
    build_cookie(REFRESH_COOKIE, token, REFRESH_COOKIE_PATH, max_age_seconds, dev_mode)
}

fn build_cookie(name: &str, value: &str, path: &str, max_age_seconds: i64, dev_mode: bool) -> String {
    let same_site = if dev_mode { "Lax" } else { "Strict" };
    let secure = if dev_mode { "" } else { "; Secure" };
    format!(
        "{name}={value}; Path={path}; HttpOnly; Max-Age={max_age_seconds}; SameSite={same_site}{secure}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("alice", "password1", 0)]
    #[case("al", "password1", 1)]
    #[case("bad name", "password1", 1)]
    #[case("alice", "short", 1)]
    #[case("x", "y", 2)]
    fn test_validate_credentials(
        #[case] username: &str,
        #[case] password: &str,
        #[case] expected_errors: usize,
    ) {
        assert_eq!(validate_credentials(username, password).len(), expected_errors);
    }

    #[test]
    fn test_username_max_length() {
        let long = "a".repeat(USERNAME_MAX_LEN + 1);
        let errors = validate_credentials(&long, "password1");
        assert_eq!(errors[0].field, "username");
        assert!(validate_credentials(&long[..USERNAME_MAX_LEN], "password1").is_empty());
    }

    #[test]
    fn test_session_cookie_attributes() {
        let prod = session_cookie("smat_x", 1800, false);
        assert!(prod.starts_with("token=smat_x;"));
        assert!(prod.contains("HttpOnly"));
        assert!(prod.contains("Max-Age=1800"));
        assert!(prod.contains("SameSite=Strict"));
        assert!(prod.ends_with("; Secure"));

        let dev = session_cookie("smat_x", 1800, true);
        assert!(dev.contains("SameSite=Lax"));
        assert!(!dev.contains("Secure"));
    }

    #[test]
    fn test_refresh_cookie_is_scoped_to_session_endpoints() {
        let cookie = refresh_cookie("smrt_x", REFRESH_TOKEN_LIFETIME_DAYS * 86_400, false);
        assert!(cookie.starts_with("refresh_token=smrt_x;"));
        assert!(cookie.contains("Path=/v1/system;"));
        assert!(cookie.contains("Max-Age=2592000"));
        assert!(cookie.contains("HttpOnly"));
    }

    #[test]
    fn test_cleared_cookie() {
        let cleared = session_cookie("", 0, true);
        assert!(cleared.starts_with("token=;"));
        assert!(cleared.contains("Max-Age=0"));
    }
}
