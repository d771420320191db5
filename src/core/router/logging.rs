// src/core/router/logging.rs

//! Access-log middleware for the handler chain.

use super::chain::Middleware;
use crate::core::XpodError;
use async_trait::async_trait;
use axum::http::request::Parts;
use tracing::debug;

pub struct RequestLogMiddleware;

#[async_trait]
impl Middleware for RequestLogMiddleware {
    async fn before(&self, parts: &mut Parts) -> Result<(), XpodError> {
        debug!("routing {} {}", parts.method, parts.uri);
        Ok(())
    }

    async fn after(&self, parts: &Parts, error: Option<&XpodError>) -> Result<(), XpodError> {
        if let Some(error) = error {
            debug!("routing {} {} failed: {error}", parts.method, parts.uri);
        }
        Ok(())
    }
}
