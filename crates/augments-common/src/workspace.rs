use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a workspace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceStatus {
    Provisioning,
    Active,
    Suspended,
    Error,
}

impl WorkspaceStatus {
    /// Human readable label for dashboards.
    pub fn label(&self) -> &'static str {
        match self {
            WorkspaceStatus::Provisioning => "Provisioning",
            WorkspaceStatus::Active => "Running",
            WorkspaceStatus::Suspended => "Suspended",
            WorkspaceStatus::Error => "Failed",
        }
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceStatus::Provisioning => write!(f, "provisioning"),
            WorkspaceStatus::Active => write!(f, "active"),
            WorkspaceStatus::Suspended => write!(f, "suspended"),
            WorkspaceStatus::Error => write!(f, "error"),
        }
    }
}

/// A user's isolated desktop environment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: WorkspaceStatus,
    pub user_id: String,
    pub container_id: Option<String>,
    pub vnc_port: Option<u16>,
    pub desktop_url: Option<String>,

    // Last observed resource counters, None until the first stats read
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub disk_usage: Option<f64>,
    pub network_in: Option<f64>,
    pub network_out: Option<f64>,

    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    /// Fresh `PROVISIONING` record with no container attached.
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description,
            status: WorkspaceStatus::Provisioning,
            user_id: user_id.into(),
            container_id: None,
            vnc_port: None,
            desktop_url: None,
            cpu_usage: None,
            memory_usage: None,
            disk_usage: None,
            network_in: None,
            network_out: None,
            last_accessed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Cached counters, zero where never observed.
    pub fn cached_snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            cpu_usage: self.cpu_usage.unwrap_or(0.0),
            memory_usage: self.memory_usage.unwrap_or(0.0),
            disk_usage: self.disk_usage.unwrap_or(0.0),
            network_in: self.network_in.unwrap_or(0.0),
            network_out: self.network_out.unwrap_or(0.0),
        }
    }
}

/// Normalized point-in-time resource metrics of a container.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub cpu_usage: f64,    // percent
    pub memory_usage: f64, // percent
    pub disk_usage: f64,   // percent, always 0 from engine stats
    pub network_in: f64,   // MB
    pub network_out: f64,  // MB
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStats {
    pub id: String,
    pub name: String,
    pub status: WorkspaceStatus,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub network_in: f64,
    pub network_out: f64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WorkspaceStats {
    pub fn new(workspace: &Workspace, snapshot: ResourceSnapshot) -> Self {
        Self {
            id: workspace.id.clone(),
            name: workspace.name.clone(),
            status: workspace.status,
            cpu_usage: snapshot.cpu_usage,
            memory_usage: snapshot.memory_usage,
            disk_usage: snapshot.disk_usage,
            network_in: snapshot.network_in,
            network_out: snapshot.network_out,
            last_accessed_at: workspace.last_accessed_at,
            created_at: workspace.created_at,
        }
    }
}
