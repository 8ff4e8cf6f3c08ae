//! Lifecycle manager behaviour against the in-process mock engine

use std::sync::Arc;
use std::time::Duration;

use augments_common::{
    ContainerEngine, EngineError, RawContainerStats, RestartPolicy, WorkspaceError,
};
use augments_executor::test_utils::{EngineCall, MockBehavior, MockEngine};
use augments_executor::{ContainerConfig, ContainerManager};

fn manager(engine: &MockEngine) -> ContainerManager {
    ContainerManager::new(Arc::new(engine.clone()), ContainerConfig::default())
}

#[tokio::test]
async fn test_create_configures_and_starts_container() {
    let engine = MockEngine::new();
    let containers = manager(&engine);

    let container_id = containers
        .create_workspace_container("ws-42", 10007)
        .await
        .unwrap();

    let calls = engine.calls().await;
    assert_eq!(calls.len(), 2);
    let EngineCall::Create(spec) = &calls[0] else {
        panic!("expected create call first, got {:?}", calls[0]);
    };
    assert_eq!(spec.name, "augments-workspace-ws-42");
    assert_eq!(spec.image, "augments-desktop:latest");
    assert_eq!(spec.env, vec!["DISPLAY=:0", "VNC_PORT=10007"]);
    assert_eq!(spec.port, 10007);
    assert_eq!(spec.memory_bytes, 2_147_483_648);
    assert_eq!(spec.cpu_shares, 512);
    assert_eq!(spec.restart_policy, RestartPolicy::UnlessStopped);
    assert_eq!(spec.labels["workspace"], "ws-42");
    assert_eq!(spec.labels["type"], "workspace");
    assert_eq!(calls[1], EngineCall::Start(container_id));
    assert_eq!(engine.running_count().await, 1);
}

#[tokio::test]
async fn test_create_failure_is_provisioning_failed() {
    let engine = MockEngine::with_behavior(MockBehavior {
        fail_create: Some(EngineError::Api("500: image not found".to_string())),
        ..Default::default()
    });
    let containers = manager(&engine);

    let result = containers.create_workspace_container("ws-1", 10000).await;
    assert!(matches!(result, Err(WorkspaceError::ProvisioningFailed(_))));
    assert!(engine.containers().await.is_empty());
}

#[tokio::test]
async fn test_start_failure_removes_dangling_container() {
    let engine = MockEngine::with_behavior(MockBehavior {
        fail_start: Some(EngineError::Api("500: port is already allocated".to_string())),
        ..Default::default()
    });
    let containers = manager(&engine);

    let result = containers.create_workspace_container("ws-1", 10000).await;
    assert!(matches!(result, Err(WorkspaceError::ProvisioningFailed(_))));

    // The created-but-never-started container must not be left behind
    assert!(engine.containers().await.is_empty());
    let calls = engine.calls().await;
    assert!(calls.iter().any(|c| matches!(
        c,
        EngineCall::Remove { force: true, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_engine_timeout_is_distinct_failure() {
    let engine = MockEngine::with_behavior(MockBehavior {
        delay: Some(Duration::from_secs(60)),
        ..Default::default()
    });
    let containers = ContainerManager::new(
        Arc::new(engine.clone()),
        ContainerConfig {
            engine_timeout: Duration::from_secs(5),
            ..Default::default()
        },
    );

    let result = containers.create_workspace_container("ws-1", 10000).await;
    match result {
        Err(WorkspaceError::EngineTimeout { operation, timeout }) => {
            assert_eq!(operation, "create_container");
            assert_eq!(timeout, Duration::from_secs(5));
        }
        other => panic!("expected EngineTimeout, got {other:?}"),
    }

    let result = containers.stop_container("mock-1").await;
    assert!(matches!(result, Err(WorkspaceError::EngineTimeout { .. })));
}

#[tokio::test]
async fn test_stop_and_remove_failures_are_surfaced() {
    let engine = MockEngine::new();
    let containers = manager(&engine);
    let container_id = containers
        .create_workspace_container("ws-1", 10000)
        .await
        .unwrap();

    engine
        .set_behavior(MockBehavior {
            fail_stop: Some(EngineError::Unavailable("daemon down".to_string())),
            fail_remove: Some(EngineError::Unavailable("daemon down".to_string())),
            ..Default::default()
        })
        .await;

    assert!(matches!(
        containers.stop_container(&container_id).await,
        Err(WorkspaceError::ContainerOperationFailed(_))
    ));
    assert!(matches!(
        containers.remove_container(&container_id).await,
        Err(WorkspaceError::ContainerOperationFailed(_))
    ));

    engine.set_behavior(MockBehavior::default()).await;
    containers.stop_container(&container_id).await.unwrap();
    containers.remove_container(&container_id).await.unwrap();
    assert!(engine.containers().await.is_empty());
}

#[tokio::test]
async fn test_list_filters_by_type_label() {
    let engine = MockEngine::new();
    let containers = manager(&engine);
    containers.create_workspace_container("ws-1", 10000).await.unwrap();
    containers.create_workspace_container("ws-2", 10001).await.unwrap();

    let listed = containers.list_workspace_containers().await;
    assert_eq!(listed.len(), 2);
    assert!(engine
        .calls()
        .await
        .contains(&EngineCall::List("type=workspace".to_string())));
}

#[tokio::test]
async fn test_list_failure_returns_empty() {
    let engine = MockEngine::with_behavior(MockBehavior {
        fail_list: Some(EngineError::Unavailable("connection refused".to_string())),
        ..Default::default()
    });
    let containers = manager(&engine);

    assert!(containers.list_workspace_containers().await.is_empty());
}

#[tokio::test]
async fn test_container_stats_normalizes_counters() {
    let engine = MockEngine::with_behavior(MockBehavior {
        stats: RawContainerStats {
            cpu_total_usage: 300_000_000,
            precpu_total_usage: 100_000_000,
            system_cpu_usage: 4_000_000_000,
            presystem_cpu_usage: 2_000_000_000,
            memory_usage: 536_870_912,
            memory_limit: 2_147_483_648,
            networks: vec![],
        },
        ..Default::default()
    });
    let containers = manager(&engine);
    let container_id = containers
        .create_workspace_container("ws-1", 10000)
        .await
        .unwrap();

    let snapshot = containers.container_stats(&container_id).await.unwrap();
    assert_eq!(snapshot.cpu_usage, 10.0);
    assert_eq!(snapshot.memory_usage, 25.0);
    assert_eq!(snapshot.disk_usage, 0.0);
}

#[tokio::test]
async fn test_container_stats_failure_is_stats_unavailable() {
    let engine = MockEngine::new();
    let containers = manager(&engine);

    let result = containers.container_stats("missing").await;
    assert!(matches!(result, Err(WorkspaceError::StatsUnavailable(_))));
}

#[tokio::test]
async fn test_remove_of_missing_container_succeeds() {
    let engine = MockEngine::new();
    let containers = manager(&engine);

    containers.remove_container("mock-404").await.unwrap();
    assert_eq!(
        engine.calls().await,
        vec![EngineCall::Remove {
            container_id: "mock-404".to_string(),
            force: true
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_create_timeout_removes_late_container_by_name() {
    let engine = MockEngine::with_behavior(MockBehavior {
        create_delay: Some(Duration::from_secs(60)),
        ..Default::default()
    });
    let containers = ContainerManager::new(
        Arc::new(engine.clone()),
        ContainerConfig {
            engine_timeout: Duration::from_secs(5),
            ..Default::default()
        },
    );

    let result = containers.create_workspace_container("ws-1", 10000).await;
    assert!(matches!(result, Err(WorkspaceError::EngineTimeout { .. })));
    assert!(engine.calls().await.contains(&EngineCall::Remove {
        container_id: "augments-workspace-ws-1".to_string(),
        force: true
    }));
    assert!(engine.containers().await.is_empty());

    // The name is free for the next attempt
    engine.set_behavior(MockBehavior::default()).await;
    containers
        .create_workspace_container("ws-1", 10000)
        .await
        .unwrap();
    assert_eq!(engine.running_count().await, 1);
}

#[tokio::test]
async fn test_create_clears_stale_container_holding_name() {
    let engine = MockEngine::new();
    let containers = manager(&engine);
    let stale_id = engine
        .create_container(&containers.workspace_container_spec("ws-1", 10000))
        .await
        .unwrap();

    let container_id = containers
        .create_workspace_container("ws-1", 10000)
        .await
        .unwrap();
    assert_ne!(container_id, stale_id);

    let remaining = engine.containers().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, container_id);
    assert_eq!(engine.running_count().await, 1);
}
