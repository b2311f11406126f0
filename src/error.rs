//! Caller-facing error taxonomy and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::auth::SessionError;
use crate::persist::SaveFileError;
use crate::world::WorldError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<WorldError> for AppError {
    fn from(e: WorldError) -> Self {
        let message = e.to_string();
        match e {
            WorldError::TaskNotFound | WorldError::UserNotFound(_) => AppError::NotFound(message),
            WorldError::NotAParty | WorldError::OwnRequest | WorldError::AssignmentDenied(_) => {
                AppError::Forbidden(message)
            }
            WorldError::ActionPending(_) | WorldError::UsernameTaken | WorldError::EmailTaken => {
                AppError::Conflict(message)
            }
            WorldError::NothingPending(_)
            | WorldError::AlreadyApproved
            | WorldError::EmptyPatch
            | WorldError::InvalidField(_) => AppError::BadRequest(message),
        }
    }
}

impl From<SaveFileError> for AppError {
    fn from(e: SaveFileError) -> Self {
        tracing::error!(error = %e, "save file failure");
        AppError::Internal("storage failure".into())
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Token(_) => AppError::Unauthorized(e.to_string()),
            SessionError::Hash(_) => {
                tracing::error!(error = %e, "credential failure");
                AppError::Internal("credential failure".into())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}
