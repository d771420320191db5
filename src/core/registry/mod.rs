// src/core/registry/mod.rs

//! The node registry: the authoritative, durable mapping of node identity to
//! reachability, access mode and liveness. All cross-node coordination goes
//! through the shared store behind the [`NodeStore`] trait.

pub mod memory;
pub mod node;
pub mod pg;
pub mod store;
pub mod token;

pub use memory::MemoryNodeStore;
pub use node::{
    AccessMode, ConnectivityStatus, NodeConnectivity, NodeModePatch, NodeRecord, NodeType,
    RegisterCenterNode, RegisteredNode,
};
pub use pg::PgNodeStore;
pub use store::NodeStore;
