// src/core/router/chain.rs

//! The request handler chain: middleware run `before` on the way in and
//! `after` in reverse on the way out; intercepts are tried in order and the
//! first whose `can_handle` succeeds serves the request. An intercept error is
//! captured and shown to every `after` phase; an `after` error overrides the
//! absence of one.

use crate::core::XpodError;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::http::request::Parts;
use axum::response::Response;
use std::sync::Arc;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn before(&self, _parts: &mut Parts) -> Result<(), XpodError> {
        Ok(())
    }

    async fn after(&self, _parts: &Parts, _error: Option<&XpodError>) -> Result<(), XpodError> {
        Ok(())
    }
}

#[async_trait]
pub trait Intercept: Send + Sync {
    /// Inspection phase; may stash routing state into `parts.extensions` for
    /// `handle` to pick up.
    async fn can_handle(&self, parts: &mut Parts) -> bool;

    async fn handle(&self, request: Request<Body>) -> Result<Response, XpodError>;
}

pub enum Handler {
    Middleware(Arc<dyn Middleware>),
    Intercept(Arc<dyn Intercept>),
}

#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Handler>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.handlers.push(Handler::Middleware(middleware));
        self
    }

    pub fn intercept(mut self, intercept: Arc<dyn Intercept>) -> Self {
        self.handlers.push(Handler::Intercept(intercept));
        self
    }

    /// Runs the chain. `Ok(None)` means every intercept declined.
    pub async fn run(&self, request: Request<Body>) -> Result<Option<Response>, XpodError> {
        let (mut parts, body) = request.into_parts();

        let mut entered: Vec<&Arc<dyn Middleware>> = Vec::new();
        let mut error: Option<XpodError> = None;
        for handler in &self.handlers {
            if let Handler::Middleware(middleware) = handler {
                entered.push(middleware);
                if let Err(e) = middleware.before(&mut parts).await {
                    error = Some(e);
                    break;
                }
            }
        }

        let mut response = None;
        if error.is_none() {
            let mut matched = None;
            for handler in &self.handlers {
                let Handler::Intercept(intercept) = handler else {
                    continue;
                };
                if intercept.can_handle(&mut parts).await {
                    matched = Some(intercept);
                    break;
                }
            }
            if let Some(intercept) = matched {
                let request = Request::from_parts(parts.clone(), body);
                match intercept.handle(request).await {
                    Ok(handled) => response = Some(handled),
                    Err(e) => error = Some(e),
                }
            }
        }

        for middleware in entered.iter().rev() {
            if let Err(e) = middleware.after(&parts, error.as_ref()).await {
                if error.is_none() {
                    error = Some(e);
                }
            }
        }

        match error {
            Some(e) => Err(e),
            None => Ok(response),
        }
    }
}
