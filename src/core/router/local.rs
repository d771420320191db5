// src/core/router/local.rs

//! The terminal intercept: everything the routing handlers decline is handed
//! to the sibling data-plane process on this host.

use super::chain::Intercept;
use super::proxy;
use crate::core::XpodError;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::http::request::Parts;
use axum::response::Response;

pub struct LocalDataPlaneHandler {
    my_node_id: String,
    base: String,
    client: reqwest::Client,
}

impl LocalDataPlaneHandler {
    pub fn new(my_node_id: String, data_plane_addr: &str, client: reqwest::Client) -> Self {
        Self {
            my_node_id,
            base: format!("http://{data_plane_addr}"),
            client,
        }
    }
}

#[async_trait]
impl Intercept for LocalDataPlaneHandler {
    async fn can_handle(&self, _parts: &mut Parts) -> bool {
        true
    }

    async fn handle(&self, request: Request<Body>) -> Result<Response, XpodError> {
        proxy::forward(&self.client, &self.base, &self.my_node_id, None, request).await
    }
}
