//! Node endpoints. Reads need an active account; writes need an admin.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use sm_id::NodeId;

use crate::api::authz;
use crate::api::error::{ApiError, FieldError};
use crate::api::request_context::RequestContext;
use crate::db::{NewNode, Node, NodeUsage};
use crate::state::AppState;

use super::parse_id;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_nodes).post(create_node))
        .route("/{node_id}", get(get_node).delete(delete_node))
        .route("/{node_id}/usage", get(node_usage))
}

#[derive(Debug, Serialize)]
pub struct ListNodesResponse {
    pub items: Vec<Node>,
}

async fn create_node(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<NewNode>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let caller = authz::require_active_admin(&state, &ctx).await?;

    let errors = validate_node(&req);
    if !errors.is_empty() {
        return Err(ApiError::bad_request("invalid_request", "Invalid node")
            .with_details(errors)
            .with_request_id(request_id));
    }

    let node = state
        .db()
        .nodes()
        .create(req)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;

    tracing::info!(
        request_id = %request_id,
        actor_id = %caller.id,
        node_id = %node.id,
        cpus = node.cpus,
        disk = node.disk,
        memory = node.memory,
        "Node registered"
    );
    Ok((StatusCode::CREATED, Json(node)))
}

async fn list_nodes(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<ListNodesResponse>, ApiError> {
    authz::require_active_user(&state, &ctx).await?;

    let items = state
        .db()
        .nodes()
        .list()
        .await
        .map_err(|e| ApiError::from_db(e, &ctx.request_id))?;
    Ok(Json(ListNodesResponse { items }))
}

async fn get_node(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(node_id): Path<String>,
) -> Result<Json<Node>, ApiError> {
    let request_id = ctx.request_id.clone();
    authz::require_active_user(&state, &ctx).await?;
    let node_id: NodeId = parse_id(&node_id, &request_id)?;

    let node = state
        .db()
        .nodes()
        .get(node_id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?
        .ok_or_else(|| {
            ApiError::not_found("node_not_found", "Node not found").with_request_id(request_id)
        })?;
    Ok(Json(node))
}

async fn delete_node(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let caller = authz::require_active_admin(&state, &ctx).await?;
    let node_id: NodeId = parse_id(&node_id, &request_id)?;

    state
        .db()
        .nodes()
        .delete(node_id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;

    tracing::info!(request_id = %request_id, actor_id = %caller.id, node_id = %node_id, "Node deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn node_usage(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(node_id): Path<String>,
) -> Result<Json<NodeUsage>, ApiError> {
    let request_id = ctx.request_id.clone();
    authz::require_active_user(&state, &ctx).await?;
    let node_id: NodeId = parse_id(&node_id, &request_id)?;

    let usage = state
        .db()
        .nodes()
        .usage(node_id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;
    Ok(Json(usage))
}

fn validate_node(req: &NewNode) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if req.name.trim().is_empty() {
        errors.push(FieldError::new("name", "cannot be empty"));
    }
    for (field, value) in [
        ("cpus", req.cpus),
        ("disk", req.disk),
        ("memory", req.memory),
        ("max_hz", req.max_hz),
    ] {
        if value < 0 {
            errors.push(FieldError::new(field, "must not be negative"));
        }
    }
    errors
}
