//! Authorization helpers.
//!
//! Every protected handler resolves the caller first, then applies the
//! narrower checks it needs (active account, admin, server access).

use sm_id::ServerId;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::db::{Server, User};
use crate::state::AppState;

/// Resolve the presented token to its user. Disabled users pass.
pub async fn require_user(state: &AppState, ctx: &RequestContext) -> Result<User, ApiError> {
    let request_id = &ctx.request_id;
    let Some(token) = ctx.token.as_deref() else {
        return Err(
            ApiError::unauthorized("unauthorized", "Not authenticated")
                .with_request_id(request_id.clone()),
        );
    };

    let validated = state
        .db()
        .tokens()
        .validate(token)
        .await
        .map_err(|e| ApiError::from_auth(e, request_id))?;

    let user = state
        .db()
        .users()
        .get(validated.user_id)
        .await
        .map_err(|e| ApiError::from_db(e, request_id))?;

    user.ok_or_else(|| {
        ApiError::unauthorized("invalid_token", "Could not validate credentials")
            .with_request_id(request_id.clone())
    })
}

/// Resolve the caller and reject disabled accounts.
pub async fn require_active_user(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<User, ApiError> {
    let user = require_user(state, ctx).await?;
    if user.disabled {
        return Err(ApiError::bad_request("disabled_account", "Disabled account")
            .with_request_id(ctx.request_id.clone()));
    }
    Ok(user)
}

pub fn require_admin(user: &User, request_id: &str) -> Result<(), ApiError> {
    if !user.admin {
        return Err(ApiError::forbidden(
            "forbidden",
            "Admin privileges required for this operation",
        )
        .with_request_id(request_id.to_string()));
    }
    Ok(())
}

/// Resolve the caller as an active admin.
pub async fn require_active_admin(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<User, ApiError> {
    let user = require_active_user(state, ctx).await?;
    require_admin(&user, &ctx.request_id)?;
    Ok(user)
}

/// Load a server the user may see. Admins see every server; other users
/// need a link. Missing and hidden servers are indistinguishable.
pub async fn require_server_access(
    state: &AppState,
    user: &User,
    server_id: ServerId,
    request_id: &str,
) -> Result<Server, ApiError> {
    let servers = state.db().servers();
    let not_found = || {
        ApiError::not_found("server_not_found", "Server not found")
            .with_request_id(request_id.to_string())
    };

    let server = servers
        .get(server_id)
        .await
        .map_err(|e| ApiError::from_db(e, request_id))?
        .ok_or_else(not_found)?;

    if user.admin {
        return Ok(server);
    }

    let linked = servers
        .user_has_access(server_id, user.id)
        .await
        .map_err(|e| ApiError::from_db(e, request_id))?;
    if !linked {
        return Err(not_found());
    }

    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use sm_id::UserId;

    fn user(admin: bool) -> User {
        User {
            id: UserId::new(5),
            username: "u".into(),
            disabled: false,
            admin,
            hashed_password: String::new(),
        }
    }

    #[test]
    fn test_require_admin() {
        assert!(require_admin(&user(true), "req").is_ok());
        let err = require_admin(&user(false), "req").unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }
}
