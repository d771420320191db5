// src/core/directory/memory.rs

//! In-memory `PodStore` for standalone deployments and tests.

use super::{MigrationState, Pod, PodStore};
use crate::core::XpodError;
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct MemoryPodStore {
    pods: DashMap<String, Pod>,
}

impl MemoryPodStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PodStore for MemoryPodStore {
    async fn find_by_resource_identifier(&self, url: &str) -> Result<Option<Pod>, XpodError> {
        let mut best: Option<Pod> = None;
        for pod in self.pods.iter() {
            if url.starts_with(pod.base_url.as_str())
                && best
                    .as_ref()
                    .is_none_or(|b| pod.base_url.len() > b.base_url.len())
            {
                best = Some(pod.clone());
            }
        }
        Ok(best)
    }

    async fn find_by_id(&self, pod_id: &str) -> Result<Option<Pod>, XpodError> {
        Ok(self.pods.get(pod_id).map(|p| p.clone()))
    }

    async fn list_all(&self) -> Result<Vec<Pod>, XpodError> {
        Ok(self.pods.iter().map(|p| p.clone()).collect())
    }

    async fn insert(&self, pod: Pod) -> Result<(), XpodError> {
        if self.pods.contains_key(&pod.pod_id) {
            return Err(XpodError::AlreadyExists(format!("pod '{}'", pod.pod_id)));
        }
        self.pods.insert(pod.pod_id.clone(), pod);
        Ok(())
    }

    async fn set_node_id(&self, pod_id: &str, node_id: &str) -> Result<(), XpodError> {
        let Some(mut pod) = self.pods.get_mut(pod_id) else {
            return Err(XpodError::NotFound(format!("pod '{pod_id}'")));
        };
        pod.node_id = Some(node_id.to_string());
        Ok(())
    }

    async fn set_migration_status(
        &self,
        pod_id: &str,
        state: MigrationState,
    ) -> Result<(), XpodError> {
        let Some(mut pod) = self.pods.get_mut(pod_id) else {
            return Err(XpodError::NotFound(format!("pod '{pod_id}'")));
        };
        pod.migration_status = state.status;
        pod.migration_target_node = state.target_node;
        pod.migration_progress = state.progress;
        Ok(())
    }

    async fn get_migration_status(&self, pod_id: &str) -> Result<MigrationState, XpodError> {
        let Some(pod) = self.pods.get(pod_id) else {
            return Err(XpodError::NotFound(format!("pod '{pod_id}'")));
        };
        Ok(MigrationState {
            status: pod.migration_status,
            target_node: pod.migration_target_node.clone(),
            progress: pod.migration_progress,
        })
    }
}
