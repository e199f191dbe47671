use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

use crate::ledger::models::{CaseStatus, Stage};

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invoice source error: {0}")]
    Source(#[from] SourceError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Case {case_number} is {status}, dispatch refused")]
    CaseClosed {
        case_number: String,
        status: CaseStatus,
    },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: CaseStatus, to: CaseStatus },
}

impl AppError {
    /// Whether retrying the failed operation has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Source(SourceError::Transient(_)) => true,
            AppError::Delivery(DeliveryError::Transport { .. }) => true,
            AppError::Delivery(DeliveryError::Rejected { status, .. }) => {
                *status == 429 || *status >= 500
            }
            _ => false,
        }
    }
}

/// Failures talking to the external invoice system of record
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0} not found at source")]
    NotFound(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Message rendering errors
#[derive(Error, Debug, Clone)]
pub enum TemplateError {
    #[error("no message template registered for stage {0}")]
    MissingTemplate(Stage),

    #[error("invoice {0} has no due date to render against")]
    MissingDueDate(String),
}

/// Per-address delivery errors
#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    #[error("transport failure sending to {address}: {message}")]
    Transport { address: String, message: String },

    #[error("provider rejected message to {address} (HTTP {status}): {message}")]
    Rejected {
        address: String,
        status: u16,
        message: String,
    },

    #[error("every recipient of {invoice_number} failed for stage {stage}")]
    AllRecipientsFailed { invoice_number: String, stage: Stage },

    #[error("case {0} has no usable recipient address")]
    NoRecipients(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                msg,
                None,
            ),
            AppError::CaseClosed { case_number, status } => (
                StatusCode::CONFLICT,
                "CASE_CLOSED",
                format!("Case {} is already {}", case_number, status),
                Some(serde_json::json!({
                    "case_number": case_number,
                    "status": status,
                })),
            ),
            AppError::InvalidTransition { from, to } => (
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                format!("Cannot move case from {} to {}", from, to),
                None,
            ),
            AppError::Template(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "TEMPLATE_ERROR",
                e.to_string(),
                None,
            ),
            AppError::Delivery(DeliveryError::NoRecipients(case_number)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "NO_RECIPIENTS",
                format!("Case {} has no usable e-mail address", case_number),
                None,
            ),
            AppError::Delivery(e) => (
                StatusCode::BAD_GATEWAY,
                "DELIVERY_FAILED",
                e.to_string(),
                None,
            ),
            AppError::Source(e) => (
                StatusCode::BAD_GATEWAY,
                "SOURCE_UNAVAILABLE",
                e.to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::Source(SourceError::Transient(format!("HTTP request error: {:?}", error)))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
