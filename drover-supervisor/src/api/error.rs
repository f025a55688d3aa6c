use crate::SupervisorError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

/// A [`SupervisorError`] rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub SupervisorError);

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            SupervisorError::InvalidRequest(_) | SupervisorError::ConfirmationRequired { .. } => {
                StatusCode::BAD_REQUEST
            }
            SupervisorError::WorkerNotFound(_) => StatusCode::NOT_FOUND,
            SupervisorError::NoRunningWorker | SupervisorError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
