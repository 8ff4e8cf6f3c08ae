use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label carrying the owning workspace id.
pub const WORKSPACE_LABEL: &str = "workspace";
/// Label used to enumerate every workspace container.
pub const TYPE_LABEL: &str = "type";
pub const TYPE_LABEL_VALUE: &str = "workspace";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("No such container: {0}")]
    NotFound(String),
    /// The container name is already taken.
    #[error("Container name conflict: {0}")]
    Conflict(String),
    #[error("Container engine unavailable: {0}")]
    Unavailable(String),
    #[error("Container engine API error: {0}")]
    Api(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

/// Everything needed to create one workspace container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    /// Published as `<port>/tcp`, bound to the same host port.
    pub port: u16,
    pub memory_bytes: i64,
    pub cpu_shares: i64,
    pub restart_policy: RestartPolicy,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct NetworkCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Raw engine counters for one stats read.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RawContainerStats {
    pub cpu_total_usage: u64,
    pub precpu_total_usage: u64,
    pub system_cpu_usage: u64,
    pub presystem_cpu_usage: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub networks: Vec<NetworkCounters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub image: Option<String>,
    pub state: Option<String>,
    pub labels: HashMap<String, String>,
}

/// Container engine client. Implementations must be safe to share across tasks.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Creates the container and returns its id. Does not start it.
    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String>;
    async fn start_container(&self, container_id: &str) -> EngineResult<()>;
    async fn stop_container(&self, container_id: &str) -> EngineResult<()>;
    /// Accepts a container id or name.
    async fn remove_container(&self, container_id: &str, force: bool) -> EngineResult<()>;
    async fn container_stats(&self, container_id: &str) -> EngineResult<RawContainerStats>;
    /// Lists all containers, running or not, carrying `label` (`key=value`).
    async fn list_containers(&self, label: &str) -> EngineResult<Vec<ContainerSummary>>;
}
