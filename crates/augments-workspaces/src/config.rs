use std::str::FromStr;
use std::time::Duration;

use augments_common::{Result, WorkspaceError};
use augments_executor::ContainerConfig;

use crate::ports::PortRange;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub docker_socket: String,
    pub ports: PortRange,
    pub desktop_host: String,
    pub container: ContainerConfig,
    /// Workspaces stuck in `PROVISIONING` longer than this are marked `ERROR`.
    pub provisioning_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            docker_socket: "/var/run/docker.sock".to_string(),
            ports: PortRange::default(),
            desktop_host: "localhost".to_string(),
            container: ContainerConfig::default(),
            provisioning_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, falling back to defaults for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let start = parse_or(&lookup, "AUGMENTS_PORT_RANGE_START", defaults.ports.start)?;
        let end = parse_or(&lookup, "AUGMENTS_PORT_RANGE_END", defaults.ports.end)?;
        let engine_timeout = parse_or(
            &lookup,
            "AUGMENTS_ENGINE_TIMEOUT_SECS",
            defaults.container.engine_timeout.as_secs(),
        )?;
        let provisioning_timeout = parse_or(
            &lookup,
            "AUGMENTS_PROVISIONING_TIMEOUT_SECS",
            defaults.provisioning_timeout.as_secs(),
        )?;
        let sweep_interval = parse_or(
            &lookup,
            "AUGMENTS_SWEEP_INTERVAL_SECS",
            defaults.sweep_interval.as_secs(),
        )?;
        if engine_timeout == 0 || sweep_interval == 0 {
            return Err(WorkspaceError::Config(
                "engine timeout and sweep interval must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            docker_socket: lookup("AUGMENTS_DOCKER_SOCKET").unwrap_or(defaults.docker_socket),
            ports: PortRange::new(start, end)?,
            desktop_host: lookup("AUGMENTS_DESKTOP_HOST").unwrap_or(defaults.desktop_host),
            container: ContainerConfig {
                image: lookup("AUGMENTS_WORKSPACE_IMAGE").unwrap_or(defaults.container.image),
                engine_timeout: Duration::from_secs(engine_timeout),
                ..defaults.container
            },
            provisioning_timeout: Duration::from_secs(provisioning_timeout),
            sweep_interval: Duration::from_secs(sweep_interval),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| WorkspaceError::Config(format!("invalid {key}={raw:?}: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = OrchestratorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.ports, PortRange::new(10000, 20000).unwrap());
        assert_eq!(config.docker_socket, "/var/run/docker.sock");
        assert_eq!(config.desktop_host, "localhost");
        assert_eq!(config.container.image, "augments-desktop:latest");
        assert_eq!(config.container.memory_bytes, 2_147_483_648);
        assert_eq!(config.container.engine_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = OrchestratorConfig::from_lookup(lookup_from(&[
            ("AUGMENTS_PORT_RANGE_START", "15000"),
            ("AUGMENTS_PORT_RANGE_END", "15010"),
            ("AUGMENTS_WORKSPACE_IMAGE", "desktop:dev"),
            ("AUGMENTS_ENGINE_TIMEOUT_SECS", " 5 "),
            ("AUGMENTS_DESKTOP_HOST", "10.0.0.2"),
        ]))
        .unwrap();
        assert_eq!(config.ports.start, 15000);
        assert_eq!(config.ports.len(), 10);
        assert_eq!(config.container.image, "desktop:dev");
        assert_eq!(config.container.engine_timeout, Duration::from_secs(5));
        assert_eq!(config.container.cpu_shares, 512);
        assert_eq!(config.desktop_host, "10.0.0.2");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = OrchestratorConfig::from_lookup(lookup_from(&[(
            "AUGMENTS_PORT_RANGE_START",
            "not-a-port",
        )]));
        assert!(matches!(result, Err(WorkspaceError::Config(_))));

        let result = OrchestratorConfig::from_lookup(lookup_from(&[
            ("AUGMENTS_PORT_RANGE_START", "20000"),
            ("AUGMENTS_PORT_RANGE_END", "10000"),
        ]));
        assert!(matches!(result, Err(WorkspaceError::Config(_))));

        let result = OrchestratorConfig::from_lookup(lookup_from(&[(
            "AUGMENTS_SWEEP_INTERVAL_SECS",
            "0",
        )]));
        assert!(matches!(result, Err(WorkspaceError::Config(_))));
    }
}
