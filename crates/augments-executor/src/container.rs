//! Workspace container lifecycle: create+start, stop, remove, enumerate and
//! stats, with an explicit timeout on every engine call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use augments_common::{
    ContainerEngine, ContainerSpec, ContainerSummary, EngineError, EngineResult,
    ResourceSnapshot, RestartPolicy, Result, WorkspaceError, TYPE_LABEL, TYPE_LABEL_VALUE,
    WORKSPACE_LABEL,
};
use tracing::{error, info, instrument, warn};

use crate::stats::compute_snapshot;

#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub image: String,
    pub name_prefix: String,
    pub display: String,
    pub memory_bytes: i64,
    pub cpu_shares: i64,
    pub restart_policy: RestartPolicy,
    pub engine_timeout: Duration,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: "augments-desktop:latest".to_string(),
            name_prefix: "augments-workspace".to_string(),
            display: ":0".to_string(),
            memory_bytes: 2 * 1024 * 1024 * 1024, // 2GB
            cpu_shares: 512,
            restart_policy: RestartPolicy::UnlessStopped,
            engine_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct ContainerManager {
    engine: Arc<dyn ContainerEngine>,
    config: ContainerConfig,
}

impl ContainerManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: ContainerConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// The container spec for one workspace bound to `vnc_port`.
    pub fn workspace_container_spec(&self, workspace_id: &str, vnc_port: u16) -> ContainerSpec {
        let mut labels = HashMap::new();
        labels.insert(WORKSPACE_LABEL.to_string(), workspace_id.to_string());
        labels.insert(TYPE_LABEL.to_string(), TYPE_LABEL_VALUE.to_string());

        ContainerSpec {
            name: format!("{}-{}", self.config.name_prefix, workspace_id),
            image: self.config.image.clone(),
            env: vec![
                format!("DISPLAY={}", self.config.display),
                format!("VNC_PORT={vnc_port}"),
            ],
            port: vnc_port,
            memory_bytes: self.config.memory_bytes,
            cpu_shares: self.config.cpu_shares,
            restart_policy: self.config.restart_policy,
            labels,
        }
    }

    /// Create and start the workspace container, returning its id once running.
    ///
    /// A container that was created but failed to start is force-removed before
    /// the error is returned.
    #[instrument(skip(self))]
    pub async fn create_workspace_container(
        &self,
        workspace_id: &str,
        vnc_port: u16,
    ) -> Result<String> {
        let spec = self.workspace_container_spec(workspace_id, vnc_port);

        let container_id = self.create(&spec).await?;
        info!(%container_id, name = %spec.name, "Container created.");

        let started = self
            .with_timeout("start_container", self.engine.start_container(&container_id))
            .await
            .and_then(|res| {
                res.map_err(|e| WorkspaceError::ProvisioningFailed(e.to_string()))
            });
        if let Err(e) = started {
            error!(%container_id, error = %e, "Failed to start workspace container");
            self.discard(&container_id).await;
            return Err(e);
        }

        info!(%container_id, "Container started.");
        Ok(container_id)
    }

    #[instrument(skip(self))]
    pub async fn stop_container(&self, container_id: &str) -> Result<()> {
        self.with_timeout("stop_container", self.engine.stop_container(container_id))
            .await?
            .map_err(|e| {
                error!(error = %e, "Failed to stop container");
                WorkspaceError::ContainerOperationFailed(format!("stop {container_id}: {e}"))
            })
    }

    /// Force-remove regardless of running state. `container_id` may also be a
    /// container name. A container that no longer exists counts as removed.
    #[instrument(skip(self))]
    pub async fn remove_container(&self, container_id: &str) -> Result<()> {
        let removed = self
            .with_timeout(
                "remove_container",
                self.engine.remove_container(container_id, true),
            )
            .await?;
        match removed {
            Ok(()) => Ok(()),
            Err(EngineError::NotFound(_)) => {
                warn!("Container already gone");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to remove container");
                Err(WorkspaceError::ContainerOperationFailed(format!(
                    "remove {container_id}: {e}"
                )))
            }
        }
    }

    /// All containers labelled as workspaces. Enumeration failures yield an empty list.
    pub async fn list_workspace_containers(&self) -> Vec<ContainerSummary> {
        let label = format!("{TYPE_LABEL}={TYPE_LABEL_VALUE}");
        match self
            .with_timeout("list_containers", self.engine.list_containers(&label))
            .await
        {
            Ok(Ok(containers)) => containers,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to list workspace containers");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Failed to list workspace containers");
                Vec::new()
            }
        }
    }

    /// Read and normalize the container's current resource counters.
    #[instrument(skip(self))]
    pub async fn container_stats(&self, container_id: &str) -> Result<ResourceSnapshot> {
        let raw = self
            .with_timeout("container_stats", self.engine.container_stats(container_id))
            .await?
            .map_err(|e| WorkspaceError::StatsUnavailable(format!("{container_id}: {e}")))?;
        Ok(compute_snapshot(&raw))
    }

    /// Create the container, clearing leftovers that hold its name.
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let created = self
            .with_timeout("create_container", self.engine.create_container(spec))
            .await;
        let created = match created {
            Ok(Err(EngineError::Conflict(message))) => {
                warn!(
                    name = %spec.name,
                    %message,
                    "Container name in use, removing stale container"
                );
                self.remove_container(&spec.name)
                    .await
                    .map_err(|e| WorkspaceError::ProvisioningFailed(e.to_string()))?;
                self.with_timeout("create_container", self.engine.create_container(spec))
                    .await
            }
            other => other,
        };

        match created {
            Ok(Ok(container_id)) => Ok(container_id),
            Ok(Err(e)) => {
                error!(error = %e, "Failed to create workspace container");
                Err(WorkspaceError::ProvisioningFailed(e.to_string()))
            }
            Err(timeout) => {
                // The engine may still finish the create after the client gave up
                self.discard(&spec.name).await;
                Err(timeout)
            }
        }
    }

    async fn discard(&self, container_id: &str) {
        if let Err(e) = self.remove_container(container_id).await {
            warn!(%container_id, error = %e, "Failed to remove dangling container");
        }
    }

    async fn with_timeout<T, F>(&self, operation: &'static str, fut: F) -> Result<EngineResult<T>>
    where
        F: Future<Output = EngineResult<T>>,
    {
        let timeout = self.config.engine_timeout;
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| WorkspaceError::EngineTimeout { operation, timeout })
    }
}
