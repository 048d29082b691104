//! API v1 routes.

mod nodes;
mod search;
mod servers;
mod system;
mod templates;
mod users;

use std::str::FromStr;

use axum::Router;
use sm_id::IdError;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/system", system::routes())
        .nest("/users", users::routes())
        .nest("/templates", templates::routes())
        .nest("/nodes", nodes::routes())
        .nest("/servers", servers::routes())
        .nest("/search", search::routes())
}

/// Parse a path id, answering 400 on garbage.
fn parse_id<T>(raw: &str, request_id: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = IdError>,
{
    raw.parse().map_err(|e: IdError| {
        ApiError::bad_request("invalid_id", e.to_string()).with_request_id(request_id.to_string())
    })
}
