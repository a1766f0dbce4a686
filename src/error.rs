use std::collections::BTreeMap;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::config::SERVICE_NAME;
use crate::services::query::QueryError;
use crate::services::user_store::StoreError;
use crate::utils::date::to_iso_string;

/// Field name -> messages, serialized as the `errors` object of a 422 response.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn field(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// `Ok(())` when nothing was recorded, otherwise a 422 error.
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.is_empty() {
            return Ok(());
        }
        let message = self
            .0
            .values()
            .flatten()
            .next()
            .cloned()
            .unwrap_or_else(|| "The given data was invalid.".to_string());
        Err(ApiError::Validation {
            message,
            errors: self,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Validation {
        message: String,
        errors: ValidationErrors,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn user_not_found(id: impl std::fmt::Display) -> Self {
        ApiError::NotFound(format!("User {} not found", id))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => {
                let mut errors = ValidationErrors::new();
                errors.add("email", "The email has already been taken.");
                ApiError::Validation {
                    message: "The email has already been taken.".to_string(),
                    errors,
                }
            }
            other => ApiError::Store(other),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(err.parameter(), err.to_string());
        ApiError::Validation {
            message: err.to_string(),
            errors,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Validation { message, errors } => (
                status,
                Json(serde_json::json!({ "error": message, "errors": errors })),
            )
                .into_response(),
            ApiError::BadRequest(message) | ApiError::NotFound(message) => {
                (status, Json(serde_json::json!({ "error": message }))).into_response()
            }
            ApiError::Store(_) => {
                // Only the top-level description is returned; the source chain stays in the log.
                tracing::error!(error = %error_chain(&self), "Request failed");
                error_envelope(status, &self.to_string())
            }
        }
    }
}

fn error_chain(err: &ApiError) -> String {
    let mut chain = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// The `{service, error, timestamp}` body every unexpected failure is rendered as.
pub fn error_envelope(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "service": SERVICE_NAME,
            "error": message,
            "timestamp": to_iso_string(&chrono::Utc::now()),
        })),
    )
        .into_response()
}

/// Panic handler for `CatchPanicLayer`: the envelope, never the panic payload.
pub fn panic_response(_panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    tracing::error!("Request handler panicked");
    error_envelope(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}
