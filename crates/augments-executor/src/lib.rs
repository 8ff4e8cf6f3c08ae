//! Container side of the workspace orchestrator: the bollard-backed engine,
//! the workspace container lifecycle manager and the stats math.

// Re-export dependencies potentially needed by consumers (like the workspace manager)
pub use augments_common as common;
pub use bollard;

pub mod container;
pub mod docker;
pub mod stats;
pub mod test_utils;

pub use container::{ContainerConfig, ContainerManager};
pub use docker::DockerEngine;
pub use stats::compute_snapshot;
