use std::sync::Arc;
use std::time::Duration;

use augments_common::{
    ContainerEngine, ContainerSummary, ResourceSnapshot, Result, Workspace, WorkspaceError,
    WorkspaceStats, WorkspaceStatus,
};
use augments_executor::ContainerManager;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::config::OrchestratorConfig;
use crate::ports::{PortAllocator, PortRange};
use crate::storage::{WorkspaceStore, WorkspaceUpdate};

/// Drives workspace records through `PROVISIONING → ACTIVE | ERROR`.
///
/// Mutations of a single workspace are serialized through a per-id lock.
#[derive(Clone)]
pub struct WorkspaceManager {
    store: Arc<dyn WorkspaceStore>,
    containers: ContainerManager,
    ports: Arc<PortAllocator>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    desktop_host: String,
}

impl WorkspaceManager {
    pub fn new(
        store: Arc<dyn WorkspaceStore>,
        containers: ContainerManager,
        ports: PortRange,
        desktop_host: impl Into<String>,
    ) -> Self {
        Self {
            ports: Arc::new(PortAllocator::new(store.clone(), ports)),
            store,
            containers,
            locks: Arc::new(DashMap::new()),
            desktop_host: desktop_host.into(),
        }
    }

    pub fn from_config(
        store: Arc<dyn WorkspaceStore>,
        engine: Arc<dyn ContainerEngine>,
        config: &OrchestratorConfig,
    ) -> Self {
        let containers = ContainerManager::new(engine, config.container.clone());
        Self::new(store, containers, config.ports, config.desktop_host.clone())
    }

    /// Persist a `PROVISIONING` workspace and provision its container in the background.
    ///
    /// Returns as soon as the record exists; the caller never observes the outcome.
    #[instrument(skip(self, description))]
    pub async fn create_workspace(
        &self,
        user_id: &str,
        name: &str,
        description: Option<String>,
    ) -> Result<Workspace> {
        let workspace = self
            .store
            .insert_for_user(Workspace::new(user_id, name, description))
            .await
            .map_err(|e| {
                warn!(error = %e, "Rejected workspace creation");
                e
            })?;

        info!(workspace_id = %workspace.id, "Workspace created, provisioning in background");
        self.spawn_provisioning(workspace.id.clone());
        Ok(workspace)
    }

    pub async fn get_workspace(&self, user_id: &str) -> Result<Option<Workspace>> {
        self.store.find_by_user(user_id).await
    }

    pub async fn get_workspace_by_id(&self, workspace_id: &str) -> Result<Option<Workspace>> {
        self.store.get(workspace_id).await
    }

    /// Current metrics for a workspace.
    ///
    /// Only `ACTIVE` workspaces with a container touch the engine; a failed read
    /// yields zeros instead of an error. Everything else returns the cached counters.
    pub async fn get_workspace_stats(&self, workspace_id: &str) -> Result<Option<WorkspaceStats>> {
        let Some(workspace) = self.store.get(workspace_id).await? else {
            return Ok(None);
        };

        let container_id = match (&workspace.status, &workspace.container_id) {
            (WorkspaceStatus::Active, Some(container_id)) => container_id,
            _ => {
                return Ok(Some(WorkspaceStats::new(
                    &workspace,
                    workspace.cached_snapshot(),
                )))
            }
        };

        let snapshot = match self.containers.container_stats(container_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(%workspace_id, error = %e, "Failed to get container stats");
                ResourceSnapshot::default()
            }
        };

        let lock = self.lock_for(workspace_id);
        let _guard = lock.lock().await;
        if let Err(e) = self
            .store
            .update(workspace_id, WorkspaceUpdate::snapshot(snapshot))
            .await
        {
            warn!(%workspace_id, error = %e, "Failed to persist workspace stats");
        }

        Ok(Some(WorkspaceStats::new(&workspace, snapshot)))
    }

    pub async fn get_all_workspaces_stats(&self) -> Result<Vec<WorkspaceStats>> {
        let workspaces = self.store.list().await?;
        let results = join_all(
            workspaces
                .iter()
                .map(|workspace| self.get_workspace_stats(&workspace.id)),
        )
        .await;

        let mut stats = Vec::with_capacity(results.len());
        for result in results {
            // Deleted between the listing and the stats read
            if let Some(s) = result? {
                stats.push(s);
            }
        }
        Ok(stats)
    }

    /// Stop and remove the container, then delete the record.
    ///
    /// A failed stop is tolerated since the forced removal covers a running
    /// container. A failed removal keeps the record.
    #[instrument(skip(self))]
    pub async fn delete_workspace(&self, workspace_id: &str) -> Result<()> {
        let deleted = {
            let lock = self.lock_for(workspace_id);
            let _guard = lock.lock().await;
            self.delete_locked(workspace_id).await
        };
        if matches!(deleted, Ok(()) | Err(WorkspaceError::NotFound(_))) {
            self.prune_lock(workspace_id);
        }
        deleted
    }

    async fn delete_locked(&self, workspace_id: &str) -> Result<()> {
        let workspace = self
            .store
            .get(workspace_id)
            .await?
            .ok_or_else(|| WorkspaceError::NotFound(workspace_id.to_string()))?;

        if let Some(container_id) = &workspace.container_id {
            if let Err(e) = self.containers.stop_container(container_id).await {
                warn!(%container_id, error = %e, "Stop failed, forcing removal");
            }
            self.containers.remove_container(container_id).await?;
        }

        self.store.delete(workspace_id).await?;
        info!(status = %workspace.status, "Workspace deleted");
        Ok(())
    }

    pub async fn update_workspace_status(
        &self,
        workspace_id: &str,
        status: WorkspaceStatus,
    ) -> Result<Workspace> {
        let workspace = self
            .locked_update(workspace_id, WorkspaceUpdate::status(status))
            .await?;
        info!(%workspace_id, %status, "Workspace status updated");
        Ok(workspace)
    }

    pub async fn update_last_accessed(&self, workspace_id: &str) -> Result<Workspace> {
        self.locked_update(workspace_id, WorkspaceUpdate::accessed(Utc::now())).await
    }

    async fn locked_update(
        &self,
        workspace_id: &str,
        update: WorkspaceUpdate,
    ) -> Result<Workspace> {
        let updated = {
            let lock = self.lock_for(workspace_id);
            let _guard = lock.lock().await;
            self.store.update(workspace_id, update).await
        };
        if let Err(WorkspaceError::NotFound(_)) = &updated {
            self.prune_lock(workspace_id);
        }
        updated
    }

    /// Manually re-run provisioning for a workspace in `ERROR`.
    #[instrument(skip(self))]
    pub async fn retry_provisioning(&self, workspace_id: &str) -> Result<Workspace> {
        let reset = {
            let lock = self.lock_for(workspace_id);
            let _guard = lock.lock().await;
            self.reset_for_retry(workspace_id).await
        };
        if let Err(WorkspaceError::NotFound(_)) = &reset {
            self.prune_lock(workspace_id);
        }
        let workspace = reset?;

        info!("Retrying workspace provisioning");
        self.spawn_provisioning(workspace.id.clone());
        Ok(workspace)
    }

    async fn reset_for_retry(&self, workspace_id: &str) -> Result<Workspace> {
        let workspace = self
            .store
            .get(workspace_id)
            .await?
            .ok_or_else(|| WorkspaceError::NotFound(workspace_id.to_string()))?;
        if workspace.status != WorkspaceStatus::Error {
            return Err(WorkspaceError::InvalidState {
                id: workspace.id,
                status: workspace.status,
            });
        }
        // Set to ERROR by hand while a container was still attached
        if let Some(container_id) = &workspace.container_id {
            self.containers.remove_container(container_id).await?;
        }
        self.store
            .update(workspace_id, WorkspaceUpdate::reprovision())
            .await
    }

    pub async fn list_all_workspace_containers(&self) -> Vec<ContainerSummary> {
        self.containers.list_workspace_containers().await
    }

    /// Mark workspaces stuck in `PROVISIONING` for longer than `max_age` as `ERROR`.
    pub async fn sweep_stale_provisioning(&self, max_age: Duration) -> Result<Vec<String>> {
        let mut swept = Vec::new();
        for candidate in self.store.list_by_status(WorkspaceStatus::Provisioning).await? {
            if !is_stale(&candidate, max_age) {
                continue;
            }

            let lock = self.lock_for(&candidate.id);
            let _guard = lock.lock().await;
            // Re-check under the lock, provisioning may have just finished
            match self.store.get(&candidate.id).await? {
                Some(current)
                    if current.status == WorkspaceStatus::Provisioning
                        && is_stale(&current, max_age) =>
                {
                    self.store
                        .update(&candidate.id, WorkspaceUpdate::failed())
                        .await?;
                    warn!(workspace_id = %candidate.id, "Provisioning timed out, marked as error");
                    swept.push(candidate.id);
                }
                _ => {}
            }
        }
        Ok(swept)
    }

    /// Run [`Self::sweep_stale_provisioning`] every `interval`.
    pub fn spawn_reconciliation_sweep(
        &self,
        interval: Duration,
        max_age: Duration,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match manager.sweep_stale_provisioning(max_age).await {
                    Ok(swept) if !swept.is_empty() => {
                        info!(
                            count = swept.len(),
                            "Reconciliation sweep marked workspaces as error"
                        )
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Reconciliation sweep failed"),
                }
            }
        })
    }

    fn spawn_provisioning(&self, workspace_id: String) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            // Errors are already logged and recorded on the workspace
            let _ = manager.provision(&workspace_id).await;
        })
    }

    #[instrument(skip(self))]
    async fn provision(&self, workspace_id: &str) -> Result<()> {
        let outcome = self.try_provision(workspace_id).await;
        if let Err(e) = &outcome {
            error!(error = %e, "Failed to provision workspace");
            self.mark_failed(workspace_id).await;
        }
        outcome
    }

    async fn try_provision(&self, workspace_id: &str) -> Result<()> {
        let vnc_port = self.ports.allocate(workspace_id).await?;
        info!(vnc_port, "Allocated VNC port");

        let container_id = self
            .containers
            .create_workspace_container(workspace_id, vnc_port)
            .await?;

        let (activated, exists) = {
            let lock = self.lock_for(workspace_id);
            let _guard = lock.lock().await;
            self.activate_locked(workspace_id, container_id, vnc_port).await
        };
        if !exists {
            self.prune_lock(workspace_id);
        }
        activated
    }

    /// Returns the outcome and whether the record still exists.
    async fn activate_locked(
        &self,
        workspace_id: &str,
        container_id: String,
        vnc_port: u16,
    ) -> (Result<()>, bool) {
        let current = match self.store.get(workspace_id).await {
            Ok(current) => current,
            Err(e) => {
                self.discard_container(&container_id).await;
                return (Err(e), true);
            }
        };
        match current {
            Some(workspace) if workspace.status == WorkspaceStatus::Provisioning => {
                let desktop_url = self.desktop_url(vnc_port);
                let update =
                    WorkspaceUpdate::activated(container_id.clone(), vnc_port, desktop_url);
                if let Err(e) = self.store.update(workspace_id, update).await {
                    self.discard_container(&container_id).await;
                    return (Err(e), true);
                }
                info!(%container_id, "Workspace provisioned successfully");
                (Ok(()), true)
            }
            other => {
                // Deleted or swept while the container was starting
                let exists = other.is_some();
                warn!(
                    %container_id,
                    status = ?other.map(|w| w.status),
                    "Workspace no longer provisioning, discarding container"
                );
                self.discard_container(&container_id).await;
                (Ok(()), exists)
            }
        }
    }

    async fn mark_failed(&self, workspace_id: &str) {
        let exists = {
            let lock = self.lock_for(workspace_id);
            let _guard = lock.lock().await;
            match self.store.get(workspace_id).await {
                Ok(Some(workspace)) if workspace.status == WorkspaceStatus::Provisioning => {
                    if let Err(e) = self.store.update(workspace_id, WorkspaceUpdate::failed()).await
                    {
                        error!(%workspace_id, error = %e, "Failed to mark workspace as error");
                    }
                    true
                }
                Ok(found) => found.is_some(),
                Err(e) => {
                    error!(%workspace_id, error = %e, "Failed to load workspace");
                    true
                }
            }
        };
        if !exists {
            self.prune_lock(workspace_id);
        }
    }

    async fn discard_container(&self, container_id: &str) {
        if let Err(e) = self.containers.remove_container(container_id).await {
            warn!(%container_id, error = %e, "Failed to remove container");
        }
    }

    fn desktop_url(&self, vnc_port: u16) -> String {
        format!("http://{}:{}", self.desktop_host, vnc_port)
    }

    /// Drops the lock entry unless another task still holds a handle to it.
    fn prune_lock(&self, workspace_id: &str) {
        self.locks
            .remove_if(workspace_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn lock_for(&self, workspace_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(workspace_id.to_string())
            .or_default()
            .value()
            .clone()
    }
}

fn is_stale(workspace: &Workspace, max_age: Duration) -> bool {
    (Utc::now() - workspace.updated_at)
        .to_std()
        .map(|age| age > max_age)
        .unwrap_or(false)
}
