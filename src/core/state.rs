// src/core/state.rs

//! Defines the central `ServerState` struct, holding all shared node-wide state.

use crate::config::Config;
use crate::core::XpodError;
use crate::core::directory::{MemoryPodStore, PgPodStore, PodStore};
use crate::core::migration::MigrationEngine;
use crate::core::registration::NodeRegistration;
use crate::core::registry::{MemoryNodeStore, NodeStore, PgNodeStore};
use crate::core::router::logging::RequestLogMiddleware;
use crate::core::router::{
    ClusterWsGateway, EdgeDirectHandler, HandlerChain, LocalDataPlaneHandler, PodRoutingHandler,
};
use crate::core::storage::{
    AccessorConfig, BucketStore, HttpBucketStore, MemoryBucketStore, RegionMigration,
    TieredAccessor,
};
use crate::core::supervisor::ServiceSupervisor;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The central struct holding all shared, node-wide state. Wrapped in an
/// `Arc` and handed to every HTTP handler and background task.
pub struct ServerState {
    pub config: Config,
    pub node_id: String,
    pub nodes: Arc<dyn NodeStore>,
    pub pods: Arc<dyn PodStore>,
    pub accessor: Option<Arc<TieredAccessor>>,
    pub migration: Arc<MigrationEngine>,
    pub supervisor: Arc<ServiceSupervisor>,
    pub registration: Arc<NodeRegistration>,
    pub router: HandlerChain,
    pub ws_gateway: ClusterWsGateway,
    pub http_client: reqwest::Client,
}

impl ServerState {
    /// Builds every component: the shared stores, the tiered accessor, this
    /// node's registration, the supervisor, and the routing chain.
    pub async fn initialize(config: Config) -> Result<Arc<Self>, XpodError> {
        let (nodes, pods) = build_stores(&config).await?;

        let accessor = build_accessor(&config).await?;

        let registration =
            Arc::new(NodeRegistration::bootstrap(&config, Arc::clone(&nodes)).await?);
        let node_id = registration.node_id().to_string();

        let supervisor = Arc::new(ServiceSupervisor::new());
        for service in &config.supervisor.services {
            supervisor.register(service.clone())?;
        }

        let migration = Arc::new(MigrationEngine::new(
            node_id.clone(),
            Arc::clone(&pods),
            Arc::clone(&nodes),
            accessor
                .clone()
                .map(|a| a as Arc<dyn RegionMigration>),
        ));

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        let router = HandlerChain::new()
            .middleware(Arc::new(RequestLogMiddleware))
            .intercept(Arc::new(PodRoutingHandler::new(
                config.cluster.enabled,
                node_id.clone(),
                config.cluster.system_prefixes.clone(),
                Arc::clone(&pods),
                Arc::clone(&nodes),
                http_client.clone(),
            )))
            .intercept(Arc::new(EdgeDirectHandler::new(
                config.cluster.enabled,
                node_id.clone(),
                config.cluster.system_prefixes.clone(),
                Arc::clone(&pods),
                Arc::clone(&nodes),
            )))
            .intercept(Arc::new(LocalDataPlaneHandler::new(
                node_id.clone(),
                &config.node.data_plane_addr,
                http_client.clone(),
            )));

        let ws_gateway =
            ClusterWsGateway::new(config.cluster.ingress_domain.clone(), Arc::clone(&nodes));

        Ok(Arc::new(Self {
            config,
            node_id,
            nodes,
            pods,
            accessor,
            migration,
            supervisor,
            registration,
            router,
            ws_gateway,
            http_client,
        }))
    }
}

async fn build_stores(
    config: &Config,
) -> Result<(Arc<dyn NodeStore>, Arc<dyn PodStore>), XpodError> {
    match &config.database.url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(url)
                .await?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| XpodError::StoreError(e.to_string()))?;
            info!("connected to the shared control-plane database");
            Ok((
                Arc::new(PgNodeStore::new(pool.clone())),
                Arc::new(PgPodStore::new(pool)),
            ))
        }
        None => {
            warn!("no database.url configured; using in-memory stores (standalone mode)");
            Ok((
                Arc::new(MemoryNodeStore::new()),
                Arc::new(MemoryPodStore::new()),
            ))
        }
    }
}

async fn build_accessor(config: &Config) -> Result<Option<Arc<TieredAccessor>>, XpodError> {
    if config.storage.primary_bucket.is_empty() {
        info!("no storage.primary_bucket configured; tiered accessor disabled");
        return Ok(None);
    }
    let store: Arc<dyn BucketStore> = if config.storage.endpoint.is_empty() {
        warn!("no storage.endpoint configured; using an in-memory object store");
        Arc::new(MemoryBucketStore::new())
    } else {
        Arc::new(HttpBucketStore::new(
            &config.storage.endpoint,
            config.storage.access_key.clone(),
            config.storage.secret_key.clone(),
            config.storage.region.clone(),
        )?)
    };
    let accessor =
        TieredAccessor::new(AccessorConfig::from_storage_config(&config.storage), store).await?;
    Ok(Some(Arc::new(accessor)))
}
