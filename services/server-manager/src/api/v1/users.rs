//! User administration endpoints (admin only).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sm_id::UserId;

use crate::api::authz;
use crate::api::error::{ApiError, FieldError};
use crate::api::request_context::RequestContext;
use crate::auth::hash_password;
use crate::db::{AccountUpdate, UpdatedAccount, User};
use crate::state::AppState;

use super::parse_id;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route(
            "/{user_id}",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub disabled: Option<bool>,
    pub admin: Option<bool>,
    /// New password; existing tokens of the user are revoked.
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListUsersResponse {
    pub items: Vec<User>,
}

async fn list_users(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<ListUsersResponse>, ApiError> {
    authz::require_active_admin(&state, &ctx).await?;

    let items = state
        .db()
        .users()
        .list()
        .await
        .map_err(|e| ApiError::from_db(e, &ctx.request_id))?;
    Ok(Json(ListUsersResponse { items }))
}

async fn get_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(user_id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let request_id = ctx.request_id.clone();
    authz::require_active_admin(&state, &ctx).await?;
    let user_id: UserId = parse_id(&user_id, &request_id)?;

    let user = state
        .db()
        .users()
        .get(user_id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?
        .ok_or_else(|| {
            ApiError::not_found("user_not_found", "User not found").with_request_id(request_id)
        })?;
    Ok(Json(user))
}

async fn update_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(user_id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    let request_id = ctx.request_id.clone();
    let caller = authz::require_active_admin(&state, &ctx).await?;
    let user_id: UserId = parse_id(&user_id, &request_id)?;

    if user_id == caller.id && (req.disabled == Some(true) || req.admin == Some(false)) {
        return Err(ApiError::bad_request(
            "self_lockout",
            "Admins cannot disable or demote themselves",
        )
        .with_request_id(request_id));
    }

    let hashed_password = match req.password.as_deref() {
        Some(password) if password.chars().count() < 8 => {
            return Err(ApiError::bad_request("invalid_request", "Invalid password")
                .with_details(vec![FieldError::new(
                    "password",
                    "must be at least 8 characters",
                )])
                .with_request_id(request_id));
        }
        Some(password) => {
            Some(hash_password(password).map_err(|e| ApiError::from_auth(e, &request_id))?)
        }
        None => None,
    };

    let UpdatedAccount {
        user,
        revoked_tokens,
    } = state
        .db()
        .users()
        .update_account(
            user_id,
            AccountUpdate {
                disabled: req.disabled,
                admin: req.admin,
                hashed_password,
            },
        )
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;

    if let Some(revoked) = revoked_tokens {
        tracing::info!(request_id = %request_id, user_id = %user_id, revoked, "Revoked user tokens");
    }

    tracing::info!(
        request_id = %request_id,
        actor_id = %caller.id,
        user_id = %user_id,
        disabled = user.disabled,
        admin = user.admin,
        "User updated"
    );
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let caller = authz::require_active_admin(&state, &ctx).await?;
    let user_id: UserId = parse_id(&user_id, &request_id)?;

    if user_id == caller.id {
        return Err(ApiError::bad_request(
            "self_lockout",
            "Admins cannot delete their own account here",
        )
        .with_request_id(request_id));
    }

    state
        .db()
        .users()
        .delete(user_id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;

    tracing::info!(request_id = %request_id, actor_id = %caller.id, user_id = %user_id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}
