//! Handler-side error type.
//!
//! `WebError` renders as a JSON `{error, code}` body and attaches itself
//! as a [`HandledError`] so the attempt loop can still classify the
//! failure behind the rendered response.

use crate::core::TmError;
use crate::tm::HandledError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum WebError {
    #[error("{0}")]
    Transaction(#[from] TmError),

    #[error("{0}")]
    Input(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),

    #[error("{message}")]
    Custom {
        status: StatusCode,
        code: String,
        message: String,
    },
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let handled = HandledError::new(self.clone());

        let (status, message, code) = match self {
            WebError::Transaction(err @ (TmError::Conflict(_) | TmError::Transient(_))) => {
                (StatusCode::CONFLICT, err.to_string(), "conflict".to_string())
            }
            WebError::Transaction(err @ TmError::Body(_)) => (
                StatusCode::BAD_REQUEST,
                err.to_string(),
                "body_error".to_string(),
            ),
            WebError::Transaction(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                "transaction_error".to_string(),
            ),

            WebError::Input(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg,
                "input_error".to_string(),
            ),
            WebError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "not_found".to_string()),
            WebError::Conflict(msg) => (StatusCode::CONFLICT, msg, "conflict".to_string()),
            WebError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                msg,
                "internal_error".to_string(),
            ),
            WebError::Custom {
                status,
                code,
                message,
            } => (status, message, code),
        };

        let body = Json(ErrorResponse {
            error: message,
            code,
        });

        let mut response = (status, body).into_response();
        handled.attach(&mut response);
        response
    }
}

pub type Result<T> = std::result::Result<T, WebError>;
