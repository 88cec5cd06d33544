use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use peerlink_core::PeerlinkError;

/// Wrapper turning [`PeerlinkError`] into an HTTP response.
///
/// The body is always `{"error": "..."}` with the error's display text;
/// the status code reflects the failure class.
#[derive(Debug)]
pub struct ApiError(pub PeerlinkError);

impl From<PeerlinkError> for ApiError {
    fn from(err: PeerlinkError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            PeerlinkError::AgentNotFound(_) | PeerlinkError::TaskNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            PeerlinkError::DuplicateEndpoint(_) | PeerlinkError::AlreadyTerminal(_) => {
                StatusCode::CONFLICT
            }
            PeerlinkError::InvalidDescriptor(_)
            | PeerlinkError::NoCapableAgent(_)
            | PeerlinkError::AllCandidatesExcluded
            | PeerlinkError::Json(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PeerlinkError::QueueFull(_) => StatusCode::TOO_MANY_REQUESTS,
            PeerlinkError::Timeout(_)
            | PeerlinkError::Unreachable(_)
            | PeerlinkError::Rejected(_) => StatusCode::BAD_GATEWAY,
            PeerlinkError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
