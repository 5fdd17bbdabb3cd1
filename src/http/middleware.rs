//! Admission middleware wrapping request dispatch.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::gate::{AdmissionGate, Decision};

/// Message returned to throttled clients.
pub const RATE_LIMIT_EXCEEDED_MESSAGE: &str = "rate limit exceeded";

/// JSON error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Run every request through the admission gate.
///
/// Rejected requests get a 429 and never reach the inner handler.
pub async fn admission_middleware(
    State(gate): State<Arc<AdmissionGate>>,
    request: Request,
    next: Next,
) -> Response {
    match gate.admit(&request) {
        Decision::Proceed => next.run(request).await,
        Decision::Reject => {
            warn!(
                method = %request.method(),
                path = %request.uri().path(),
                "Rate limit exceeded, rejecting request"
            );
            rate_limit_exceeded_response()
        }
    }
}

/// Build the "too many requests" response.
pub fn rate_limit_exceeded_response() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorBody {
            error: RATE_LIMIT_EXCEEDED_MESSAGE.to_string(),
        }),
    )
        .into_response()
}
