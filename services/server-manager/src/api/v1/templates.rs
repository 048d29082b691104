//! Template endpoints. Reads need an active account; writes need an admin.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use sm_id::TemplateId;

use crate::api::authz;
use crate::api::error::{ApiError, FieldError};
use crate::api::request_context::RequestContext;
use crate::db::{NewTemplate, Template, TemplateUpdate};
use crate::state::AppState;

use super::parse_id;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_templates).post(create_template))
        .route(
            "/{template_id}",
            get(get_template)
                .patch(update_template)
                .delete(delete_template),
        )
}

#[derive(Debug, Serialize)]
pub struct ListTemplatesResponse {
    pub items: Vec<Template>,
}

async fn create_template(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<NewTemplate>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let caller = authz::require_active_admin(&state, &ctx).await?;

    let mut errors = Vec::new();
    if req.name.trim().is_empty() {
        errors.push(FieldError::new("name", "cannot be empty"));
    }
    if req.image.trim().is_empty() {
        errors.push(FieldError::new("image", "cannot be empty"));
    }
    errors.extend(validate_shape(
        &req.exposed_port,
        [req.resource_min_cpu, req.resource_min_disk, req.resource_min_mem],
    ));
    if !errors.is_empty() {
        return Err(
            ApiError::bad_request("invalid_request", "Invalid template")
                .with_details(errors)
                .with_request_id(request_id),
        );
    }

    let template = state
        .db()
        .templates()
        .create(req)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;

    tracing::info!(
        request_id = %request_id,
        actor_id = %caller.id,
        template_id = %template.id,
        name = %template.name,
        "Template created"
    );
    Ok((StatusCode::CREATED, Json(template)))
}

async fn list_templates(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<ListTemplatesResponse>, ApiError> {
    authz::require_active_user(&state, &ctx).await?;

    let items = state
        .db()
        .templates()
        .list()
        .await
        .map_err(|e| ApiError::from_db(e, &ctx.request_id))?;
    Ok(Json(ListTemplatesResponse { items }))
}

async fn get_template(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(template_id): Path<String>,
) -> Result<Json<Template>, ApiError> {
    let request_id = ctx.request_id.clone();
    authz::require_active_user(&state, &ctx).await?;
    let template_id: TemplateId = parse_id(&template_id, &request_id)?;

    let template = state
        .db()
        .templates()
        .get(template_id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?
        .ok_or_else(|| {
            ApiError::not_found("template_not_found", "Template not found")
                .with_request_id(request_id)
        })?;
    Ok(Json(template))
}

async fn update_template(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(template_id): Path<String>,
    Json(req): Json<TemplateUpdate>,
) -> Result<Json<Template>, ApiError> {
    let request_id = ctx.request_id.clone();
    let caller = authz::require_active_admin(&state, &ctx).await?;
    let template_id: TemplateId = parse_id(&template_id, &request_id)?;

    let mut errors = Vec::new();
    if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        errors.push(FieldError::new("name", "cannot be empty"));
    }
    errors.extend(validate_shape(
        req.exposed_port.as_deref().unwrap_or_default(),
        [req.resource_min_cpu, req.resource_min_disk, req.resource_min_mem],
    ));
    if !errors.is_empty() {
        return Err(
            ApiError::bad_request("invalid_request", "Invalid template")
                .with_details(errors)
                .with_request_id(request_id),
        );
    }

    let template = state
        .db()
        .templates()
        .update(template_id, req)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;

    tracing::info!(request_id = %request_id, actor_id = %caller.id, template_id = %template_id, "Template updated");
    Ok(Json(template))
}

async fn delete_template(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(template_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let caller = authz::require_active_admin(&state, &ctx).await?;
    let template_id: TemplateId = parse_id(&template_id, &request_id)?;

    state
        .db()
        .templates()
        .delete(template_id)
        .await
        .map_err(|e| ApiError::from_db(e, &request_id))?;

    tracing::info!(request_id = %request_id, actor_id = %caller.id, template_id = %template_id, "Template deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Container ports must be valid TCP/UDP ports; minimums must be non-negative.
fn validate_shape(exposed_port: &[i32], minimums: [Option<i32>; 3]) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if let Some(port) = exposed_port.iter().find(|p| !(1..=65535).contains(*p)) {
        errors.push(FieldError::new(
            "exposed_port",
            format!("{port} is not a valid port"),
        ));
    }

    let fields = ["resource_min_cpu", "resource_min_disk", "resource_min_mem"];
    for (field, value) in fields.into_iter().zip(minimums) {
        if value.is_some_and(|v| v < 0) {
            errors.push(FieldError::new(field, "must not be negative"));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_shape_accepts_valid_template() {
        assert!(validate_shape(&[25565, 25575], [Some(2), None, Some(1024)]).is_empty());
    }

    #[test]
    fn test_validate_shape_rejects_bad_values() {
        let errors = validate_shape(&[0, 80], [Some(-1), None, Some(-5)]);
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["exposed_port", "resource_min_cpu", "resource_min_mem"]
        );
    }
}
