// src/core/router/mod.rs

//! Request routing: the handler chain, the routing decision, and the
//! intercepts that proxy, redirect, or tunnel traffic to the owning node.

pub mod chain;
pub mod decision;
pub mod edge;
pub mod local;
pub mod logging;
pub mod pod_proxy;
pub mod proxy;
pub mod ws_gateway;

pub use chain::{Handler, HandlerChain, Intercept, Middleware};
pub use decision::{RouteDecision, decide, is_system_path};
pub use edge::EdgeDirectHandler;
pub use local::LocalDataPlaneHandler;
pub use pod_proxy::PodRoutingHandler;
pub use ws_gateway::ClusterWsGateway;
