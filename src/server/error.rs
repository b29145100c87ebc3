//! JSON error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::download_manager::DownloadManagerError;
use crate::metadata::MetadataError;

/// Every failed request answers `{"error": message}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    BadGateway(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<MetadataError> for ApiError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(_) => ApiError::NotFound(err.to_string()),
            MetadataError::Upstream(_) => ApiError::BadGateway(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<DownloadManagerError>() {
            Some(DownloadManagerError::AlbumNotFound(_)) => ApiError::NotFound(err.to_string()),
            Some(DownloadManagerError::NoTracks(_)) => ApiError::BadRequest(err.to_string()),
            None => ApiError::Internal(format!("{:#}", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_domain_errors_to_status_codes() {
        let err: ApiError = MetadataError::NotFound("Artist \"x\"".into()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Artist \"x\" not found");

        let err: ApiError = MetadataError::Upstream("timeout".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let err: ApiError =
            anyhow::Error::from(DownloadManagerError::AlbumNotFound("a1".into())).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ApiError = anyhow::anyhow!("disk full").into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
