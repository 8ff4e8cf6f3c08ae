/// Test utilities: docker detection and an in-process container engine
use std::collections::HashMap;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use augments_common::{
    ContainerEngine, ContainerSpec, ContainerSummary, EngineError, EngineResult,
    RawContainerStats,
};
use tokio::sync::{Mutex, RwLock};

pub fn has_docker() -> bool {
    // Check if docker command exists
    Command::new("docker")
        .arg("info")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Macro to skip tests when requirements aren't met
#[macro_export]
macro_rules! require_docker {
    () => {
        if !$crate::test_utils::has_docker() {
            eprintln!("Test ignored: Docker not available");
            return;
        }
    };
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Create(ContainerSpec),
    Start(String),
    Stop(String),
    Remove { container_id: String, force: bool },
    Stats(String),
    List(String),
}

/// Failure and latency injection for [`MockEngine`].
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub fail_create: Option<EngineError>,
    pub fail_start: Option<EngineError>,
    pub fail_stop: Option<EngineError>,
    pub fail_remove: Option<EngineError>,
    pub fail_stats: Option<EngineError>,
    pub fail_list: Option<EngineError>,
    /// Applied to every call.
    pub delay: Option<Duration>,
    /// Applied to create after the container exists, so a client timeout
    /// leaves it behind.
    pub create_delay: Option<Duration>,
    /// Applied only to start, to hold provisioning mid-flight.
    pub start_delay: Option<Duration>,
    pub stats: RawContainerStats,
}

/// Mock engine for testing - tracks containers in memory and records every call
#[derive(Clone, Default)]
pub struct MockEngine {
    calls: Arc<Mutex<Vec<EngineCall>>>,
    behavior: Arc<RwLock<MockBehavior>>,
    containers: Arc<Mutex<HashMap<String, ContainerSummary>>>,
    next_id: Arc<Mutex<u64>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior: Arc::new(RwLock::new(behavior)),
            ..Self::default()
        }
    }

    pub async fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.write().await = behavior;
    }

    pub async fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// Containers created and not yet removed.
    pub async fn containers(&self) -> Vec<ContainerSummary> {
        self.containers.lock().await.values().cloned().collect()
    }

    pub async fn running_count(&self) -> usize {
        self.containers
            .lock()
            .await
            .values()
            .filter(|c| c.state.as_deref() == Some("running"))
            .count()
    }

    async fn enter(&self, call: EngineCall) -> MockBehavior {
        self.calls.lock().await.push(call);
        let behavior = self.behavior.read().await.clone();
        if let Some(delay) = behavior.delay {
            tokio::time::sleep(delay).await;
        }
        behavior
    }

    async fn set_state(&self, container_id: &str, state: &str) -> EngineResult<()> {
        let mut containers = self.containers.lock().await;
        let container = containers
            .get_mut(container_id)
            .ok_or_else(|| EngineError::NotFound(container_id.to_string()))?;
        container.state = Some(state.to_string());
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String> {
        let behavior = self.enter(EngineCall::Create(spec.clone())).await;
        if let Some(err) = behavior.fail_create {
            return Err(err);
        }

        let name = format!("/{}", spec.name);
        let mut containers = self.containers.lock().await;
        if containers.values().any(|c| c.names.contains(&name)) {
            return Err(EngineError::Conflict(format!(
                "The container name \"{name}\" is already in use"
            )));
        }

        let mut next_id = self.next_id.lock().await;
        *next_id += 1;
        let container_id = format!("mock-{}", *next_id);
        containers.insert(
            container_id.clone(),
            ContainerSummary {
                id: container_id.clone(),
                names: vec![name],
                image: Some(spec.image.clone()),
                state: Some("created".to_string()),
                labels: spec.labels.clone(),
            },
        );
        drop(next_id);
        drop(containers);

        if let Some(delay) = behavior.create_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(container_id)
    }

    async fn start_container(&self, container_id: &str) -> EngineResult<()> {
        let behavior = self.enter(EngineCall::Start(container_id.to_string())).await;
        if let Some(delay) = behavior.start_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = behavior.fail_start {
            return Err(err);
        }
        self.set_state(container_id, "running").await
    }

    async fn stop_container(&self, container_id: &str) -> EngineResult<()> {
        let behavior = self.enter(EngineCall::Stop(container_id.to_string())).await;
        if let Some(err) = behavior.fail_stop {
            return Err(err);
        }
        self.set_state(container_id, "exited").await
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> EngineResult<()> {
        let behavior = self
            .enter(EngineCall::Remove {
                container_id: container_id.to_string(),
                force,
            })
            .await;
        if let Some(err) = behavior.fail_remove {
            return Err(err);
        }
        let name = format!("/{container_id}");
        let mut containers = self.containers.lock().await;
        let key = containers
            .values()
            .find(|c| c.id == container_id || c.names.contains(&name))
            .map(|c| c.id.clone())
            .ok_or_else(|| EngineError::NotFound(container_id.to_string()))?;
        containers.remove(&key);
        Ok(())
    }

    async fn container_stats(&self, container_id: &str) -> EngineResult<RawContainerStats> {
        let behavior = self.enter(EngineCall::Stats(container_id.to_string())).await;
        if let Some(err) = behavior.fail_stats {
            return Err(err);
        }
        if !self.containers.lock().await.contains_key(container_id) {
            return Err(EngineError::NotFound(container_id.to_string()));
        }
        Ok(behavior.stats)
    }

    async fn list_containers(&self, label: &str) -> EngineResult<Vec<ContainerSummary>> {
        let behavior = self.enter(EngineCall::List(label.to_string())).await;
        if let Some(err) = behavior.fail_list {
            return Err(err);
        }
        let (key, value) = label.split_once('=').unwrap_or((label, ""));
        Ok(self
            .containers
            .lock()
            .await
            .values()
            .filter(|c| c.labels.get(key).map(String::as_str) == Some(value))
            .cloned()
            .collect())
    }
}
