//! Server endpoints.
//!
//! Any active account may create servers and is linked to what it creates.
//! Non-admins only see, change and share servers they are linked to. Hidden
//! servers answer 404 exactly like missing ones.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sm_id::{NodeId, ServerId, TemplateId, UserId};

use crate::api::authz;
use crate::api::error::{ApiError, FieldError};
use crate::api::request_context::RequestContext;
use crate::db::capacity::check_template_minimums;
use crate::db::{DbError, NewServer, Resources, Server, ServerUpdate, Template, User};
use crate::state::AppState;

use super::parse_id;

/// Upper bound for `GET /ports/available?count=`.
const MAX_PORTS_PER_QUERY: usize = 64;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_servers).post(create_server))
        .route("/ports/available", get(available_ports))
        .route(
            "/{server_id}",
            get(get_server).patch(update_server).delete(delete_server),
        )
        .route(
            "/{server_id}/users",
            get(list_server_users).post(add_server_user),
        )
        .route("/{server_id}/users/{user_id}", delete(remove_server_user))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    /// Defaults to `sm-<name>`.
    pub container_name: Option<String>,
    pub template_id: TemplateId,
    pub node_id: NodeId,
    /// Overlays the template's `default_env`.
    pub env: Option<BTreeMap<String, String>>,
    pub cpu: i32,
    pub disk: i32,
    pub memory: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateServerRequest {
    pub env: Option<BTreeMap<String, String>>,
    pub cpu: Option<i32>,
    pub disk: Option<i32>,
    pub memory: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct AddServerUserRequest {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct AvailablePortsQuery {
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ListServersResponse {
    pub items: Vec<Server>,
}

#[derive(Debug, Serialize)]
pub struct ListServerUsersResponse {
    pub items: Vec<User>,
}

#[derive(Debug, Serialize)]
pub struct AvailablePortsResponse {
    pub items: Vec<u16>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn create_server(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateServerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let caller = authz::require_active_user(&state, &ctx).await?;

    let name = req.name.trim().to_string();
    let container_name = req
        .container_name
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .unwrap_or_else(|| default_container_name(&name));

    let mut errors = Vec::new();
    if name.is_empty() {
        errors.push(FieldError::new("name", "cannot be empty"));
    }
    errors.extend(negative_resources(Some(req.cpu), Some(req.disk), Some(req.memory)));
    if !errors.is_empty() {
        return Err(ApiError::bad_request("invalid_request", "Invalid server")
            .with_details(errors)
            .with_request_id(request_id));
    }

    let db = state.db();
    let template = db
        .templates()
        .get(req.template_id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?
        .ok_or_else(|| {
            ApiError::not_found("template_not_found", "Template not found")
                .with_request_id(request_id.clone())
        })?;

    if db
        .nodes()
        .get(req.node_id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?
        .is_none()
    {
        return Err(ApiError::not_found("node_not_found", "Node not found")
            .with_request_id(request_id));
    }

    if db
        .servers()
        .get_by_name(&name)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?
        .is_some()
    {
        return Err(ApiError::conflict(
            "server_exists",
            "Server with that name already exists",
        )
        .with_request_id(request_id));
    }

    let requested = Resources::new(req.cpu, req.disk, req.memory);
    reject_below_minimums(&template, requested, &request_id)?;

    let env = effective_env(&template, req.env);
    let server = db
        .servers()
        .create(NewServer {
            name,
            container_name,
            template_id: template.id,
            node_id: req.node_id,
            env: (!env.is_empty()).then_some(env),
            cpu: req.cpu,
            disk: req.disk,
            memory: req.memory,
            creator: Some(caller.id),
        })
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;

    tracing::info!(
        request_id = %request_id,
        actor_id = %caller.id,
        server_id = %server.id,
        node_id = %server.node_id,
        template_id = %server.template_id,
        "Server created"
    );
    Ok((StatusCode::CREATED, Json(server)))
}

async fn list_servers(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<ListServersResponse>, ApiError> {
    let caller = authz::require_active_user(&state, &ctx).await?;
    let servers = state.db().servers();

    let items = if caller.admin {
        servers.list_all().await
    } else {
        servers.list_for_user(caller.id).await
    }
    .map_err(|e| ApiError::from_db(e, &ctx.request_id))?;

    Ok(Json(ListServersResponse { items }))
}

async fn get_server(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(server_id): Path<String>,
) -> Result<Json<Server>, ApiError> {
    let request_id = ctx.request_id.clone();
    let caller = authz::require_active_user(&state, &ctx).await?;
    let server_id: ServerId = parse_id(&server_id, &request_id)?;

    let server = authz::require_server_access(&state, &caller, server_id, &request_id).await?;
    Ok(Json(server))
}

async fn update_server(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(server_id): Path<String>,
    Json(req): Json<UpdateServerRequest>,
) -> Result<Json<Server>, ApiError> {
    let request_id = ctx.request_id.clone();
    let caller = authz::require_active_user(&state, &ctx).await?;
    let server_id: ServerId = parse_id(&server_id, &request_id)?;
    let current = authz::require_server_access(&state, &caller, server_id, &request_id).await?;

    let errors = negative_resources(req.cpu, req.disk, req.memory);
    if !errors.is_empty() {
        return Err(ApiError::bad_request("invalid_request", "Invalid server update")
            .with_details(errors)
            .with_request_id(request_id));
    }

    let update = ServerUpdate {
        env: req.env,
        cpu: req.cpu,
        disk: req.disk,
        memory: req.memory,
    };

    if update.changes_resources() {
        let template = state
            .db()
            .templates()
            .get(current.template_id)
            .await
            .map_err(|e| ApiError::from_db(e, &request_id))?
            .ok_or_else(|| {
                ApiError::not_found("template_not_found", "Template not found")
                    .with_request_id(request_id.clone())
            })?;
        reject_below_minimums(&template, update.resources_for(&current), &request_id)?;
    }

    let server = state
        .db()
        .servers()
        .update(server_id, update)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;

    tracing::info!(request_id = %request_id, actor_id = %caller.id, server_id = %server_id, "Server updated");
    Ok(Json(server))
}

async fn delete_server(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(server_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let caller = authz::require_active_user(&state, &ctx).await?;
    let server_id: ServerId = parse_id(&server_id, &request_id)?;
    authz::require_server_access(&state, &caller, server_id, &request_id).await?;

    state
        .db()
        .servers()
        .delete(server_id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;

    tracing::info!(request_id = %request_id, actor_id = %caller.id, server_id = %server_id, "Server deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_server_users(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(server_id): Path<String>,
) -> Result<Json<ListServerUsersResponse>, ApiError> {
    let request_id = ctx.request_id.clone();
    let caller = authz::require_active_user(&state, &ctx).await?;
    let server_id: ServerId = parse_id(&server_id, &request_id)?;
    authz::require_server_access(&state, &caller, server_id, &request_id).await?;

    let items = state
        .db()
        .servers()
        .list_users(server_id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;
    Ok(Json(ListServerUsersResponse { items }))
}

async fn add_server_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(server_id): Path<String>,
    Json(req): Json<AddServerUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let caller = authz::require_active_user(&state, &ctx).await?;
    let server_id: ServerId = parse_id(&server_id, &request_id)?;
    authz::require_server_access(&state, &caller, server_id, &request_id).await?;

    state
        .db()
        .servers()
        .add_user(server_id, req.user_id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;

    tracing::info!(
        request_id = %request_id,
        actor_id = %caller.id,
        server_id = %server_id,
        user_id = %req.user_id,
        "Server access granted"
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_server_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((server_id, user_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let caller = authz::require_active_user(&state, &ctx).await?;
    let server_id: ServerId = parse_id(&server_id, &request_id)?;
    let user_id: UserId = parse_id(&user_id, &request_id)?;
    authz::require_server_access(&state, &caller, server_id, &request_id).await?;

    let removed = state
        .db()
        .servers()
        .remove_user(server_id, user_id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;
    if !removed {
        return Err(
            ApiError::not_found("link_not_found", "User is not linked to this server")
                .with_request_id(request_id),
        );
    }

    tracing::info!(
        request_id = %request_id,
        actor_id = %caller.id,
        server_id = %server_id,
        user_id = %user_id,
        "Server access revoked"
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn available_ports(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<AvailablePortsQuery>,
) -> Result<Json<AvailablePortsResponse>, ApiError> {
    let request_id = ctx.request_id.clone();
    authz::require_active_user(&state, &ctx).await?;

    let count = query.count.unwrap_or(1);
    if !(1..=MAX_PORTS_PER_QUERY).contains(&count) {
        return Err(ApiError::bad_request(
            "invalid_count",
            format!("count must be between 1 and {MAX_PORTS_PER_QUERY}"),
        )
        .with_request_id(request_id));
    }

    let items = state
        .db()
        .servers()
        .unused_ports(count)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;
    Ok(Json(AvailablePortsResponse { items }))
}

// =============================================================================
// Helpers
// =============================================================================

fn default_container_name(name: &str) -> String {
    format!("sm-{name}")
}

/// Template defaults with the request's entries layered on top.
fn effective_env(
    template: &Template,
    overrides: Option<BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut env = template.default_env.clone();
    env.extend(overrides.unwrap_or_default());
    env
}

fn negative_resources(cpu: Option<i32>, disk: Option<i32>, memory: Option<i32>) -> Vec<FieldError> {
    [("cpu", cpu), ("disk", disk), ("memory", memory)]
        .into_iter()
        .filter(|(_, value)| value.is_some_and(|v| v < 0))
        .map(|(field, _)| FieldError::new(field, "must not be negative"))
        .collect()
}

fn reject_below_minimums(
    template: &Template,
    requested: Resources,
    request_id: &str,
) -> Result<(), ApiError> {
    let violations = check_template_minimums(&template.minimums(), requested);
    if violations.is_empty() {
        return Ok(());
    }
    Err(ApiError::from_db(DbError::BelowTemplateMinimum(violations), request_id))
}
