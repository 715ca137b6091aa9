//! HTTP mapping for crate errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use crate::error::Error;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::JobNotFound(_) => (StatusCode::NOT_FOUND, "Job not found"),
            Error::ArchiveNotFound(_) => (StatusCode::NOT_FOUND, "File not found"),
            Error::Spawn { .. }
            | Error::MissingOutputDirectory(_)
            | Error::Io(_)
            | Error::Zip(_)
            | Error::InvalidHeader(_)
            | Error::Task(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };

        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            debug!(error = %self, "Request rejected");
        }

        (status, message).into_response()
    }
}
