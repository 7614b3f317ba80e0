//! Unified API error type with Axum `IntoResponse` support.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use sf_protocol::Command;

use crate::compiler::CompileError;
use crate::executor::ExecutionError;
use crate::service::GatewayError;
use crate::store::StoreError;

/// API error type that converts to proper HTTP responses.
///
/// Taxonomy variants carry the lower layer's message unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Soft rejection: the candidate command is returned for confirmation.
    #[error("classification ambiguous: {message}")]
    Ambiguous {
        message: String,
        command: Box<Command>,
    },

    #[error("{0}")]
    InvalidParameters(String),

    #[error("{0}")]
    TargetNotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    AlreadyApplied(String),

    #[error("{0}")]
    UnrecognizedIntent(String),

    #[error("{0}")]
    ProviderTimeout(String),

    #[error("{0}")]
    ProviderRejected(String),

    #[error("{0}")]
    ProviderUnavailable(String),

    #[error("{0}")]
    PersistenceUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Taxonomy kind reported in the `kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Ambiguous { .. } => "classification_ambiguous",
            ApiError::InvalidParameters(_) => "invalid_parameters",
            ApiError::TargetNotFound(_) => "target_not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::AlreadyApplied(_) => "already_applied",
            ApiError::UnrecognizedIntent(_) => "unrecognized_intent",
            ApiError::ProviderTimeout(_) => "provider_timeout",
            ApiError::ProviderRejected(_) => "provider_rejected",
            ApiError::ProviderUnavailable(_) => "provider_unavailable",
            ApiError::PersistenceUnavailable(_) => "persistence_unavailable",
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Ambiguous { .. }
            | ApiError::UnrecognizedIntent(_)
            | ApiError::ProviderRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InvalidParameters(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::TargetNotFound(_) | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::AlreadyApplied(_) => StatusCode::CONFLICT,
            ApiError::ProviderTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::PersistenceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "status": status.as_u16(),
        });
        if let ApiError::Ambiguous { command, .. } = &self {
            body["command"] = json!(command);
        }
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "request failed");
        }

        (status, axum::Json(body)).into_response()
    }
}

impl From<CompileError> for ApiError {
    fn from(e: CompileError) -> Self {
        let msg = e.to_string();
        match e {
            CompileError::InvalidParameters(_) => ApiError::InvalidParameters(msg),
            CompileError::Conflict(_) => ApiError::Conflict(msg),
            CompileError::TargetNotFound(_) => ApiError::TargetNotFound(msg),
            CompileError::UnrecognizedIntent => ApiError::UnrecognizedIntent(msg),
        }
    }
}

impl From<ExecutionError> for ApiError {
    fn from(e: ExecutionError) -> Self {
        let msg = e.to_string();
        match e {
            ExecutionError::Conflict { .. } | ExecutionError::TargetBusy { .. } => {
                ApiError::Conflict(msg)
            }
            ExecutionError::AlreadyApplied(_) => ApiError::AlreadyApplied(msg),
            ExecutionError::ProviderTimeout { .. } => ApiError::ProviderTimeout(msg),
            ExecutionError::ProviderRejected { .. } => ApiError::ProviderRejected(msg),
            ExecutionError::ProviderUnavailable { .. } => ApiError::ProviderUnavailable(msg),
            ExecutionError::PersistenceUnavailable(_) => ApiError::PersistenceUnavailable(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ExecutionError::from(e).into()
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Ambiguous(command) => ApiError::Ambiguous {
                message: format!(
                    "confidence {:.2} is below the confirmation threshold; resubmit with an explicit intent or parameters",
                    command.confidence
                ),
                command,
            },
            GatewayError::Compile(e) => e.into(),
            GatewayError::Execution(e) => e.into(),
            GatewayError::Store(e) => e.into(),
            GatewayError::NotFound(msg) => ApiError::NotFound(msg),
            GatewayError::BadRequest(msg) => ApiError::BadRequest(msg),
            GatewayError::InvalidState(msg) => ApiError::Conflict(msg),
        }
    }
}

/// Convenience alias.
pub type ApiResult<T> = Result<T, ApiError>;
