// Workspace orchestration - record lifecycle, port allocation and container provisioning
mod config;
mod manager;
mod ports;
mod storage;

pub use augments_common as common;
pub use config::OrchestratorConfig;
pub use manager::WorkspaceManager;
pub use ports::{PortAllocator, PortRange};
pub use storage::{InMemoryStorage, WorkspaceStore, WorkspaceUpdate};
