//! Runs against a real Docker daemon

use std::sync::Arc;

use augments_executor::bollard::Docker;
use augments_executor::{require_docker, ContainerConfig, ContainerManager, DockerEngine};

fn alpine_manager() -> ContainerManager {
    let docker = Arc::new(Docker::connect_with_local_defaults().unwrap());
    let config = ContainerConfig {
        image: "alpine:latest".to_string(),
        name_prefix: "augments-it".to_string(),
        ..Default::default()
    };
    ContainerManager::new(Arc::new(DockerEngine::new(docker)), config)
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_workspace_container_lifecycle() {
    require_docker!();
    let containers = alpine_manager();
    let workspace_id = format!("it-{}", std::process::id());

    // alpine exits immediately, which is enough to exercise create/start/stats/remove
    let container_id = containers
        .create_workspace_container(&workspace_id, 19_876)
        .await
        .unwrap();

    let listed = containers.list_workspace_containers().await;
    assert!(listed.iter().any(|c| c.id == container_id));

    let _ = containers.container_stats(&container_id).await;
    let _ = containers.stop_container(&container_id).await;
    containers.remove_container(&container_id).await.unwrap();

    let listed = containers.list_workspace_containers().await;
    assert!(!listed.iter().any(|c| c.id == container_id));
}
