//! Error types for the facade

use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::error::StoreError;

#[derive(Error, Debug)]
pub enum FacadeError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Tracking store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Tracking store did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tracking store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FacadeError {
    pub fn status(&self) -> StatusCode {
        match self {
            FacadeError::NotFound(_) => StatusCode::NOT_FOUND,
            FacadeError::InvalidValue(_) => StatusCode::UNPROCESSABLE_ENTITY,
            FacadeError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            FacadeError::StoreUnavailable(_) | FacadeError::Store(_) => StatusCode::BAD_GATEWAY,
            FacadeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            FacadeError::Io(_) | FacadeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for FacadeError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::DoesNotExist(what) => FacadeError::NotFound(what),
            StoreError::InvalidValue(msg) => FacadeError::InvalidValue(msg),
            StoreError::Unavailable(msg) => FacadeError::StoreUnavailable(msg),
            StoreError::Io(e) => FacadeError::Io(e),
            StoreError::AlreadyExists(_) | StoreError::Unsupported(_) => FacadeError::Store(error.to_string()),
            StoreError::Storage(e) => FacadeError::Store(format!("{:#}", e)),
        }
    }
}

impl FacadeError {
    fn rejected(status: StatusCode, text: String) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            FacadeError::PayloadTooLarge(text)
        } else {
            FacadeError::InvalidValue(text)
        }
    }
}

impl From<JsonRejection> for FacadeError {
    fn from(rejection: JsonRejection) -> Self {
        Self::rejected(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartRejection> for FacadeError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::rejected(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartError> for FacadeError {
    fn from(error: MultipartError) -> Self {
        Self::rejected(error.status(), error.body_text())
    }
}

impl IntoResponse for FacadeError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            FacadeError::Io(e) => tracing::error!(detail = %e, "IO error"),
            FacadeError::Internal(msg) => tracing::error!(detail = %msg, "Internal facade error"),
            FacadeError::StoreUnavailable(_) | FacadeError::Store(_) | FacadeError::Timeout(_) => {
                tracing::warn!(error = %self, "Tracking store call failed")
            }
            FacadeError::NotFound(_) | FacadeError::InvalidValue(_) | FacadeError::PayloadTooLarge(_) => {}
        }

        let body = Json(crate::client::ErrorBody {
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, FacadeError>;
