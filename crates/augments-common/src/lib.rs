// Re-export dependencies used in public interfaces of common types

use std::time::Duration;

use thiserror::Error;

pub use chrono;
pub use serde::{Deserialize, Serialize};
pub use uuid;

mod engine;
mod workspace;

pub use engine::{
    ContainerEngine, ContainerSpec, ContainerSummary, EngineError, EngineResult,
    NetworkCounters, RawContainerStats, RestartPolicy, TYPE_LABEL, TYPE_LABEL_VALUE,
    WORKSPACE_LABEL,
};
pub use workspace::{ResourceSnapshot, Workspace, WorkspaceStats, WorkspaceStatus};

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("User already has a workspace: {0}")]
    DuplicateWorkspace(String),

    #[error("No available ports in range {start}..{end}")]
    PortExhaustion { start: u16, end: u16 },

    #[error("Failed to create workspace container: {0}")]
    ProvisioningFailed(String),

    #[error("Container operation failed: {0}")]
    ContainerOperationFailed(String),

    #[error("Container stats unavailable: {0}")]
    StatsUnavailable(String),

    #[error("Container engine timed out during {operation} after {timeout:?}")]
    EngineTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Workspace not found: {0}")]
    NotFound(String),

    #[error("Workspace {id} is {status}, operation not permitted")]
    InvalidState { id: String, status: WorkspaceStatus },

    #[error("Storage Error: {0}")]
    Storage(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

// Define the primary Result type for workspace operations
pub type Result<T> = std::result::Result<T, WorkspaceError>;
