use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use augments_common::{ResourceSnapshot, Result, Workspace, WorkspaceError, WorkspaceStatus};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Atomic single-record patch. `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceUpdate {
    pub status: Option<WorkspaceStatus>,
    pub container_id: Option<Option<String>>,
    pub vnc_port: Option<Option<u16>>,
    pub desktop_url: Option<Option<String>>,
    pub snapshot: Option<ResourceSnapshot>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl WorkspaceUpdate {
    pub fn status(status: WorkspaceStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Connection info recorded together with the `ACTIVE` transition.
    pub fn activated(container_id: String, vnc_port: u16, desktop_url: String) -> Self {
        Self {
            status: Some(WorkspaceStatus::Active),
            container_id: Some(Some(container_id)),
            vnc_port: Some(Some(vnc_port)),
            desktop_url: Some(Some(desktop_url)),
            ..Default::default()
        }
    }

    /// `ERROR` transition. Releases the port and drops any connection info.
    pub fn failed() -> Self {
        Self {
            status: Some(WorkspaceStatus::Error),
            container_id: Some(None),
            vnc_port: Some(None),
            desktop_url: Some(None),
            ..Default::default()
        }
    }

    /// Back to `PROVISIONING` with no container or port attached.
    pub fn reprovision() -> Self {
        Self {
            status: Some(WorkspaceStatus::Provisioning),
            ..Self::failed()
        }
    }

    pub fn snapshot(snapshot: ResourceSnapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            ..Default::default()
        }
    }

    pub fn accessed(at: DateTime<Utc>) -> Self {
        Self {
            last_accessed_at: Some(at),
            ..Default::default()
        }
    }

    fn apply(self, workspace: &mut Workspace) {
        if let Some(status) = self.status {
            workspace.status = status;
        }
        if let Some(container_id) = self.container_id {
            workspace.container_id = container_id;
        }
        if let Some(vnc_port) = self.vnc_port {
            workspace.vnc_port = vnc_port;
        }
        if let Some(desktop_url) = self.desktop_url {
            workspace.desktop_url = desktop_url;
        }
        if let Some(snapshot) = self.snapshot {
            workspace.cpu_usage = Some(snapshot.cpu_usage);
            workspace.memory_usage = Some(snapshot.memory_usage);
            workspace.disk_usage = Some(snapshot.disk_usage);
            workspace.network_in = Some(snapshot.network_in);
            workspace.network_out = Some(snapshot.network_out);
        }
        if let Some(at) = self.last_accessed_at {
            workspace.last_accessed_at = Some(at);
        }
        workspace.updated_at = Utc::now();
    }
}

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Inserts unless the user already owns a workspace (any status).
    async fn insert_for_user(&self, workspace: Workspace) -> Result<Workspace>;
    async fn get(&self, workspace_id: &str) -> Result<Option<Workspace>>;
    async fn find_by_user(&self, user_id: &str) -> Result<Option<Workspace>>;
    async fn find_by_port(&self, port: u16) -> Result<Option<Workspace>>;
    /// Every port currently bound to a workspace record.
    async fn held_ports(&self) -> Result<BTreeSet<u16>>;
    async fn list(&self) -> Result<Vec<Workspace>>;
    async fn list_by_status(&self, status: WorkspaceStatus) -> Result<Vec<Workspace>>;
    async fn update(&self, workspace_id: &str, update: WorkspaceUpdate) -> Result<Workspace>;
    /// Binds `port` to the workspace unless another workspace holds it.
    /// Returns `false` on conflict.
    async fn try_reserve_port(&self, workspace_id: &str, port: u16) -> Result<bool>;
    async fn delete(&self, workspace_id: &str) -> Result<Option<Workspace>>;
}

// In-memory storage implementation for development/testing
#[derive(Default)]
pub struct InMemoryStorage {
    workspaces: Arc<RwLock<HashMap<String, Workspace>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkspaceStore for InMemoryStorage {
    async fn insert_for_user(&self, workspace: Workspace) -> Result<Workspace> {
        let mut workspaces = self.workspaces.write().await;
        if workspaces.values().any(|w| w.user_id == workspace.user_id) {
            return Err(WorkspaceError::DuplicateWorkspace(workspace.user_id));
        }
        workspaces.insert(workspace.id.clone(), workspace.clone());
        Ok(workspace)
    }

    async fn get(&self, workspace_id: &str) -> Result<Option<Workspace>> {
        Ok(self.workspaces.read().await.get(workspace_id).cloned())
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Option<Workspace>> {
        Ok(self
            .workspaces
            .read()
            .await
            .values()
            .find(|w| w.user_id == user_id)
            .cloned())
    }

    async fn find_by_port(&self, port: u16) -> Result<Option<Workspace>> {
        Ok(self
            .workspaces
            .read()
            .await
            .values()
            .find(|w| w.vnc_port == Some(port))
            .cloned())
    }

    async fn held_ports(&self) -> Result<BTreeSet<u16>> {
        Ok(self
            .workspaces
            .read()
            .await
            .values()
            .filter_map(|w| w.vnc_port)
            .collect())
    }

    async fn list(&self) -> Result<Vec<Workspace>> {
        let mut workspaces: Vec<_> = self.workspaces.read().await.values().cloned().collect();
        workspaces.sort_by_key(|w| w.created_at);
        Ok(workspaces)
    }

    async fn list_by_status(&self, status: WorkspaceStatus) -> Result<Vec<Workspace>> {
        let mut workspaces: Vec<_> = self
            .workspaces
            .read()
            .await
            .values()
            .filter(|w| w.status == status)
            .cloned()
            .collect();
        workspaces.sort_by_key(|w| w.created_at);
        Ok(workspaces)
    }

    async fn update(&self, workspace_id: &str, update: WorkspaceUpdate) -> Result<Workspace> {
        let mut workspaces = self.workspaces.write().await;
        let workspace = workspaces
            .get_mut(workspace_id)
            .ok_or_else(|| WorkspaceError::NotFound(workspace_id.to_string()))?;
        update.apply(workspace);
        Ok(workspace.clone())
    }

    async fn try_reserve_port(&self, workspace_id: &str, port: u16) -> Result<bool> {
        let mut workspaces = self.workspaces.write().await;
        if workspaces
            .values()
            .any(|w| w.vnc_port == Some(port) && w.id != workspace_id)
        {
            return Ok(false);
        }
        let workspace = workspaces
            .get_mut(workspace_id)
            .ok_or_else(|| WorkspaceError::NotFound(workspace_id.to_string()))?;
        workspace.vnc_port = Some(port);
        workspace.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete(&self, workspace_id: &str) -> Result<Option<Workspace>> {
        Ok(self.workspaces.write().await.remove(workspace_id))
    }
}
