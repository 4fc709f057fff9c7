//! Caller identity.
//!
//! Authentication happens upstream; by the time a request reaches the server
//! the authentication layer has put the caller's id in the `x-caller-id`
//! header. WebSocket clients that cannot set headers pass `?caller=<id>`.

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use proctor_model::ErrorResponse;
use serde::Deserialize;

/// Header carrying the authenticated caller id.
pub const CALLER_HEADER: &str = "x-caller-id";

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub String);

impl CallerIdentity {
    /// The caller id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Deserialize)]
struct CallerQuery {
    caller: Option<String>,
}

/// Rejection when a request carries no identity.
#[derive(Debug, Clone, Copy)]
pub struct MissingIdentity;

impl IntoResponse for MissingIdentity {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: "Missing caller identity".to_string(),
        });
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = MissingIdentity;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let caller = from_header.or_else(|| {
            Query::<CallerQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(query)| query.caller)
                .filter(|id| !id.trim().is_empty())
        });

        caller.map(Self).ok_or(MissingIdentity)
    }
}
