use axum::{
    http::{
        header::{CONTENT_TYPE, WWW_AUTHENTICATE},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::auth::AuthError;
use crate::db::{DbError, MinimumViolation};

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub code: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<&MinimumViolation> for FieldError {
    fn from(violation: &MinimumViolation) -> Self {
        Self::new(
            violation.dimension.as_str(),
            format!(
                "{} is below the template minimum of {}",
                violation.requested, violation.minimum
            ),
        )
    }
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("urn:server-manager:problem:{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            instance: None,
            code,
            request_id: "unknown".to_string(),
            details: None,
        }
    }

    fn set_request_id(&mut self, request_id: impl Into<String>) {
        let request_id = request_id.into();
        self.request_id = request_id.clone();
        if self.instance.is_none() {
            self.instance = Some(request_id);
        }
    }

    fn set_details(&mut self, details: Vec<FieldError>) {
        self.details = Some(details);
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub fn unauthorized(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn forbidden(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, code, message)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.problem.set_request_id(request_id);
        self
    }

    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.problem.set_details(details);
        self
    }

    /// Map a persistence error, logging anything that is not the caller's fault.
    pub fn from_db(err: DbError, request_id: &str) -> Self {
        Self::from(err).with_request_id(request_id.to_string())
    }

    /// Map an authentication error.
    pub fn from_auth(err: AuthError, request_id: &str) -> Self {
        Self::from(err).with_request_id(request_id.to_string())
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, .. } => {
                let mut label = entity.to_string();
                if let Some(first) = label.get_mut(..1) {
                    first.make_ascii_uppercase();
                }
                Self::not_found(format!("{entity}_not_found"), format!("{label} not found"))
            }
            DbError::Conflict(message) => Self::conflict("conflict", message),
            DbError::CapacityExceeded(exceeded) => Self::conflict(
                "capacity_exceeded",
                format!(
                    "Node {} has {} {} free, {} requested",
                    exceeded.node_id,
                    (exceeded.capacity - exceeded.reserved).max(0),
                    exceeded.dimension.as_str(),
                    exceeded.requested
                ),
            ),
            DbError::BelowTemplateMinimum(violations) => Self::bad_request(
                "below_template_minimum",
                "Requested resources are below the template minimums",
            )
            .with_details(violations.iter().map(FieldError::from).collect()),
            DbError::PortsExhausted {
                requested,
                available,
                start,
                end,
            } => Self::conflict(
                "ports_exhausted",
                format!("Requested {requested} ports but only {available} are free in {start}-{end}"),
            ),
            other => {
                tracing::error!(error = %other, "Database operation failed");
                Self::internal("internal_error", "Internal server error")
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => {
                Self::unauthorized("invalid_credentials", "Incorrect username or password")
            }
            AuthError::InvalidToken => Self::unauthorized("invalid_token", "Invalid or expired token"),
            AuthError::TokenExpired => Self::unauthorized("token_expired", "Token has expired"),
            AuthError::TokenRevoked => Self::unauthorized("token_revoked", "Token has been revoked"),
            AuthError::AccountDisabled => Self::bad_request("disabled_account", "Disabled account"),
            AuthError::Db(err) => Self::from(err),
            AuthError::Hash(message) => {
                tracing::error!(error = %message, "Password hashing failed");
                Self::internal("internal_error", "Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        let mut response = (status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CapacityExceeded, ResourceDimension};
    use sm_id::NodeId;

    #[test]
    fn test_not_found_detail_names_entity() {
        let err = ApiError::from(DbError::not_found("template", 4));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.problem.detail, "Template not found");
        assert_eq!(err.problem.code, "template_not_found");
    }

    #[test]
    fn test_capacity_exceeded_is_conflict() {
        let err = ApiError::from(DbError::CapacityExceeded(CapacityExceeded {
            node_id: NodeId::new(1),
            dimension: ResourceDimension::Memory,
            capacity: 8192,
            reserved: 6144,
            requested: 4096,
        }));
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.problem.code, "capacity_exceeded");
        assert!(err.problem.detail.contains("2048 memory free"));
    }

    #[test]
    fn test_query_errors_are_hidden() {
        let err = ApiError::from(DbError::Query(sqlx::Error::RowNotFound));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.problem.detail, "Internal server error");
    }

    #[test]
    fn test_unauthorized_sets_www_authenticate() {
        let response = ApiError::from(AuthError::InvalidCredentials).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(WWW_AUTHENTICATE).unwrap(),
            HeaderValue::from_static("Bearer")
        );
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            HeaderValue::from_static("application/problem+json")
        );
    }

    #[test]
    fn test_request_id_fills_instance() {
        let err = ApiError::bad_request("invalid", "bad").with_request_id("req_1");
        assert_eq!(err.problem.request_id, "req_1");
        assert_eq!(err.problem.instance.as_deref(), Some("req_1"));
    }
}
