// src/core/errors.rs

//! Defines the primary error type for the entire control plane.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// The main error enum, representing all possible failures within the node process.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum XpodError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Authentication failed")]
    AuthFailed,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Pod is already on the target node")]
    AlreadyOnTarget,

    #[error("A migration is already in flight for this pod")]
    AlreadyMigrating,

    #[error("Migration cancelled")]
    Cancelled,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

impl XpodError {
    /// Maps an error kind to the HTTP status it surfaces as.
    ///
    /// `StoreError`, `Io` and anything unclassified collapse to 500; the
    /// underlying cause is logged by the response path, never echoed to the
    /// caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            XpodError::AuthRequired => StatusCode::UNAUTHORIZED,
            XpodError::AuthFailed => StatusCode::FORBIDDEN,
            XpodError::NotFound(_) => StatusCode::NOT_FOUND,
            XpodError::AlreadyExists(_) => StatusCode::CONFLICT,
            XpodError::AlreadyOnTarget
            | XpodError::AlreadyMigrating
            | XpodError::Cancelled
            | XpodError::BadRequest(_) => StatusCode::BAD_REQUEST,
            XpodError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            XpodError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            XpodError::UpstreamFailure(_) | XpodError::HttpClient(_) => StatusCode::BAD_GATEWAY,
            XpodError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            XpodError::Io(_) | XpodError::StoreError(_) | XpodError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The message returned in the response body. Server-side causes are
    /// replaced with a generic phrase.
    fn public_message(&self) -> String {
        match self {
            XpodError::Io(_) | XpodError::StoreError(_) | XpodError::Internal(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for XpodError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {self}");
        }
        let body = axum::Json(serde_json::json!({ "error": self.public_message() }));
        (status, body).into_response()
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for XpodError {
    fn clone(&self) -> Self {
        match self {
            XpodError::Io(e) => XpodError::Io(Arc::clone(e)),
            XpodError::AuthRequired => XpodError::AuthRequired,
            XpodError::AuthFailed => XpodError::AuthFailed,
            XpodError::NotFound(s) => XpodError::NotFound(s.clone()),
            XpodError::AlreadyExists(s) => XpodError::AlreadyExists(s.clone()),
            XpodError::AlreadyOnTarget => XpodError::AlreadyOnTarget,
            XpodError::AlreadyMigrating => XpodError::AlreadyMigrating,
            XpodError::Cancelled => XpodError::Cancelled,
            XpodError::BadRequest(s) => XpodError::BadRequest(s.clone()),
            XpodError::MethodNotAllowed => XpodError::MethodNotAllowed,
            XpodError::NotImplemented(s) => XpodError::NotImplemented(s.clone()),
            XpodError::UpstreamFailure(s) => XpodError::UpstreamFailure(s.clone()),
            XpodError::StoreError(s) => XpodError::StoreError(s.clone()),
            XpodError::Timeout(s) => XpodError::Timeout(s.clone()),
            XpodError::Internal(s) => XpodError::Internal(s.clone()),
            XpodError::HttpClient(s) => XpodError::HttpClient(s.clone()),
        }
    }
}

impl PartialEq for XpodError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (XpodError::Io(e1), XpodError::Io(e2)) => e1.to_string() == e2.to_string(),
            (XpodError::NotFound(s1), XpodError::NotFound(s2)) => s1 == s2,
            (XpodError::AlreadyExists(s1), XpodError::AlreadyExists(s2)) => s1 == s2,
            (XpodError::BadRequest(s1), XpodError::BadRequest(s2)) => s1 == s2,
            (XpodError::NotImplemented(s1), XpodError::NotImplemented(s2)) => s1 == s2,
            (XpodError::UpstreamFailure(s1), XpodError::UpstreamFailure(s2)) => s1 == s2,
            (XpodError::StoreError(s1), XpodError::StoreError(s2)) => s1 == s2,
            (XpodError::Timeout(s1), XpodError::Timeout(s2)) => s1 == s2,
            (XpodError::Internal(s1), XpodError::Internal(s2)) => s1 == s2,
            (XpodError::HttpClient(s1), XpodError::HttpClient(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for XpodError {
    fn from(e: std::io::Error) -> Self {
        XpodError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for XpodError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            XpodError::Timeout(e.to_string())
        } else {
            XpodError::HttpClient(e.to_string())
        }
    }
}

impl From<sqlx::Error> for XpodError {
    fn from(e: sqlx::Error) -> Self {
        XpodError::StoreError(e.to_string())
    }
}

impl From<uuid::Error> for XpodError {
    fn from(e: uuid::Error) -> Self {
        XpodError::Internal(format!("Failed to generate UUID: {e}"))
    }
}

impl From<url::ParseError> for XpodError {
    fn from(e: url::ParseError) -> Self {
        XpodError::BadRequest(format!("invalid URL: {e}"))
    }
}

impl From<serde_json::Error> for XpodError {
    fn from(e: serde_json::Error) -> Self {
        XpodError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}
