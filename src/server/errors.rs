//! Maps [`PipelineError`] to an HTTP response, giving every fatal pipeline
//! error a stable status code and machine-readable tag.

use crate::error::PipelineError;
use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use tracing::error;

pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(PipelineError::Internal(err.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, tag = self.0.tag(), "request failed");
        }
        let body = Json(json!({
            "success": false,
            "error": self.0.to_string(),
            "error_tag": self.0.tag(),
        }));
        (status, body).into_response()
    }
}

fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::InputInvalid => StatusCode::BAD_REQUEST,
        PipelineError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::TemplateInvalid { .. } => StatusCode::BAD_REQUEST,
        PipelineError::ProviderNotConfigured { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::EngineFailed { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::DecodeFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Cancelled => StatusCode::REQUEST_TIMEOUT,
        PipelineError::BlobStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PipelineError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
