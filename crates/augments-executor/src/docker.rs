use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use augments_common::{
    ContainerEngine, ContainerSpec, ContainerSummary, EngineError, EngineResult,
    NetworkCounters, RawContainerStats, RestartPolicy,
};
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, Stats, StatsOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError; // Alias bollard error
use bollard::models::{
    HostConfig, PortBinding, RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum,
};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, instrument};

/// [`ContainerEngine`] backed by the Docker Engine API.
#[derive(Clone)]
pub struct DockerEngine {
    docker_client: Arc<Docker>,
}

impl DockerEngine {
    pub fn new(docker_client: Arc<Docker>) -> Self {
        Self { docker_client }
    }

    /// Connect over the engine's unix socket. `timeout_secs` bounds every HTTP request.
    pub fn connect(socket_path: &str, timeout_secs: u64) -> Result<Self, BollardError> {
        let docker =
            Docker::connect_with_unix(socket_path, timeout_secs, bollard::API_DEFAULT_VERSION)?;
        Ok(Self::new(Arc::new(docker)))
    }

    pub fn client(&self) -> Arc<Docker> {
        self.docker_client.clone()
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    #[instrument(
        skip(self, spec),
        fields(name = %spec.name, image = %spec.image, port = spec.port)
    )]
    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String> {
        let options = Some(CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        });
        let response = self
            .docker_client
            .create_container(options, container_config(spec))
            .await
            .map_err(engine_error)?;
        for warning in &response.warnings {
            debug!(container_id = %response.id, %warning, "Engine warning on create");
        }
        Ok(response.id)
    }

    #[instrument(skip(self))]
    async fn start_container(&self, container_id: &str) -> EngineResult<()> {
        self.docker_client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(engine_error)
    }

    #[instrument(skip(self))]
    async fn stop_container(&self, container_id: &str) -> EngineResult<()> {
        self.docker_client
            .stop_container(container_id, None::<StopContainerOptions>)
            .await
            .map_err(engine_error)
    }

    #[instrument(skip(self))]
    async fn remove_container(&self, container_id: &str, force: bool) -> EngineResult<()> {
        let options = Some(RemoveContainerOptions {
            force,
            ..Default::default()
        });
        self.docker_client
            .remove_container(container_id, options)
            .await
            .map_err(engine_error)
    }

    #[instrument(skip(self))]
    async fn container_stats(&self, container_id: &str) -> EngineResult<RawContainerStats> {
        // one_shot=false so the engine fills in the previous cpu sample
        let options = Some(StatsOptions {
            stream: false,
            one_shot: false,
        });
        let mut stream = self.docker_client.stats(container_id, options);
        match stream.next().await {
            Some(Ok(stats)) => Ok(raw_stats(&stats)),
            Some(Err(e)) => Err(engine_error(e)),
            None => Err(EngineError::Api(format!(
                "stats stream for {container_id} ended without a sample"
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn list_containers(&self, label: &str) -> EngineResult<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![label.to_string()]);
        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self
            .docker_client
            .list_containers(Some(options))
            .await
            .map_err(engine_error)?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                image: c.image,
                state: c.state.map(|s| s.to_string()),
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }
}

/// Engine-side container configuration for a [`ContainerSpec`].
pub fn container_config(spec: &ContainerSpec) -> Config<String> {
    let port_key = format!("{}/tcp", spec.port);

    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(port_key.clone(), HashMap::new());

    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        port_key,
        Some(vec![PortBinding {
            host_ip: None,
            host_port: Some(spec.port.to_string()),
        }]),
    );

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        memory: Some(spec.memory_bytes),
        cpu_shares: Some(spec.cpu_shares),
        restart_policy: Some(DockerRestartPolicy {
            name: Some(restart_policy_name(spec.restart_policy)),
            maximum_retry_count: None,
        }),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        exposed_ports: Some(exposed_ports),
        labels: Some(spec.labels.clone()),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn restart_policy_name(policy: RestartPolicy) -> RestartPolicyNameEnum {
    match policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
    }
}

fn raw_stats(stats: &Stats) -> RawContainerStats {
    let networks = stats
        .networks
        .as_ref()
        .map(|networks| {
            networks
                .values()
                .map(|net| NetworkCounters {
                    rx_bytes: net.rx_bytes,
                    tx_bytes: net.tx_bytes,
                })
                .collect()
        })
        .unwrap_or_default();

    RawContainerStats {
        cpu_total_usage: stats.cpu_stats.cpu_usage.total_usage,
        precpu_total_usage: stats.precpu_stats.cpu_usage.total_usage,
        system_cpu_usage: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
        presystem_cpu_usage: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
        memory_usage: stats.memory_stats.usage.unwrap_or(0),
        memory_limit: stats.memory_stats.limit.unwrap_or(0),
        networks,
    }
}

fn engine_error(err: BollardError) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } => EngineError::Conflict(message),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Api(format!("{status_code}: {message}")),
        BollardError::SocketNotFoundError(path) => {
            EngineError::Unavailable(format!("socket not found: {path}"))
        }
        e @ (BollardError::IOError { .. } | BollardError::RequestTimeoutError) => {
            EngineError::Unavailable(e.to_string())
        }
        other => EngineError::Api(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ContainerSpec {
        let mut labels = HashMap::new();
        labels.insert("workspace".to_string(), "ws-1".to_string());
        labels.insert("type".to_string(), "workspace".to_string());
        ContainerSpec {
            name: "augments-workspace-ws-1".to_string(),
            image: "augments-desktop:latest".to_string(),
            env: vec!["DISPLAY=:0".to_string(), "VNC_PORT=10001".to_string()],
            port: 10001,
            memory_bytes: 2_147_483_648,
            cpu_shares: 512,
            restart_policy: RestartPolicy::UnlessStopped,
            labels,
        }
    }

    #[test]
    fn test_container_config_publishes_same_host_port() {
        let config = container_config(&spec());
        let exposed = config.exposed_ports.unwrap();
        assert!(exposed.contains_key("10001/tcp"));
        assert_eq!(exposed.len(), 1);

        let host = config.host_config.unwrap();
        let bindings = host.port_bindings.unwrap();
        let binding = bindings["10001/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("10001"));
    }

    #[test]
    fn test_container_config_resource_limits() {
        let config = container_config(&spec());
        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(2_147_483_648));
        assert_eq!(host.cpu_shares, Some(512));
        assert_eq!(
            host.restart_policy.unwrap().name,
            Some(RestartPolicyNameEnum::UNLESS_STOPPED)
        );
        assert_eq!(config.image.as_deref(), Some("augments-desktop:latest"));
        assert_eq!(config.labels.unwrap()["type"], "workspace");
    }

    #[test]
    fn test_engine_error_mapping() {
        let err = engine_error(BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container: abc".to_string(),
        });
        assert!(matches!(err, EngineError::NotFound(_)));

        let err = engine_error(BollardError::DockerResponseServerError {
            status_code: 409,
            message: "name already in use".to_string(),
        });
        assert_eq!(err, EngineError::Conflict("name already in use".to_string()));

        let err = engine_error(BollardError::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        });
        assert_eq!(err, EngineError::Api("500: boom".to_string()));

        let err = engine_error(BollardError::RequestTimeoutError);
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
