//! Typed error for handlers and models.
//!
//! Every failure surfaces to the client as `{"error": "<CODE>"}` with a status
//! code matching the variant. Internal failures are logged and replaced by a
//! generic code so store or driver details never leak.

use std::collections::BTreeMap;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

/// Per-field validation messages, keyed by the request field name.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_insert_with(|| message.into());
    }
    #[cfg(test)]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn into_result(self) -> Result<(), AppError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed request fields, reported before any store call.
    #[error("validation failed on {} field(s)", .0.len())]
    Validation(ValidationErrors),

    #[error("bad request: {0}")]
    BadRequest(&'static str),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(&'static str),

    #[error("database: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("serialization: {0}")]
    Serialization(String),

    #[error("storage: {0}")]
    Storage(#[from] std::io::Error),

    #[error("fetch: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("export: {0}")]
    Export(String),

    #[error("token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("configuration: {0}")]
    Config(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::BadRequest(code)
            | Self::Forbidden(code)
            | Self::NotFound(code)
            | Self::Conflict(code) => code,
            Self::Unauthorized | Self::Token(_) => "UNAUTHORIZED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_FAILED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Fetch(_) => "FETCH_FAILED",
            Self::Export(_) => "EXPORT_FAILED",
            Self::Config(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<mongodb::bson::ser::Error> for AppError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<mongodb::bson::de::Error> for AppError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        Self::Export(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for AppError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        Self::Export(err.to_string())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::Token(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Fetch(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = match self {
            Self::Validation(fields) => {
                serde_json::json!({ "error": self.code(), "fields": fields })
            }
            _ => serde_json::json!({ "error": self.code() }),
        };
        HttpResponse::build(status).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_per_field_wins() {
        let mut errors = ValidationErrors::new();
        errors.add("date", "Date is required");
        errors.add("date", "Date is invalid");

        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["date"], "Date is required");
    }

    #[test]
    fn status_codes_follow_variant() {
        assert_eq!(
            AppError::NotFound("REPORT_NOT_FOUND").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Forbidden("ADMIN_ONLY").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::Validation(ValidationErrors::new()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Export("boom".to_string()).code(),
            "EXPORT_FAILED"
        );
    }

    #[test]
    fn empty_errors_pass() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }
}
