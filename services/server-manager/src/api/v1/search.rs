//! Name lookup endpoints: each returns `{"items": {name: id}}`.

use std::collections::BTreeMap;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::api::authz;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(search_users))
        .route("/servers", get(search_servers))
        .route("/nodes", get(search_nodes))
        .route("/templates", get(search_templates))
}

#[derive(Debug, Serialize)]
pub struct NameIndexResponse<Id: Serialize> {
    pub items: BTreeMap<String, Id>,
}

type SearchResult<Id> = Result<Json<NameIndexResponse<Id>>, ApiError>;

async fn search_users(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> SearchResult<sm_id::UserId> {
    authz::require_active_user(&state, &ctx).await?;
    let items = state
        .db()
        .users()
        .list_names()
        .await
        .map_err(|e| ApiError::from_db(e, &ctx.request_id))?;
    Ok(Json(NameIndexResponse { items }))
}

/// Only servers visible to the caller are listed.
async fn search_servers(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> SearchResult<sm_id::ServerId> {
    let caller = authz::require_active_user(&state, &ctx).await?;
    let linked_to = (!caller.admin).then_some(caller.id);
    let items = state
        .db()
        .servers()
        .list_names(linked_to)
        .await
        .map_err(|e| ApiError::from_db(e, &ctx.request_id))?;
    Ok(Json(NameIndexResponse { items }))
}

async fn search_nodes(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> SearchResult<sm_id::NodeId> {
    authz::require_active_user(&state, &ctx).await?;
    let items = state
        .db()
        .nodes()
        .list_names()
        .await
        .map_err(|e| ApiError::from_db(e, &ctx.request_id))?;
    Ok(Json(NameIndexResponse { items }))
}

async fn search_templates(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> SearchResult<sm_id::TemplateId> {
    authz::require_active_user(&state, &ctx).await?;
    let items = state
        .db()
        .templates()
        .list_names()
        .await
        .map_err(|e| ApiError::from_db(e, &ctx.request_id))?;
    Ok(Json(NameIndexResponse { items }))
}
