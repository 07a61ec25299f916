//! Configuration loading.
//!
//! Layered via figment: compiled defaults, then `foreman.yaml`, then
//! `FOREMAN_`-prefixed environment variables (nested keys separated by
//! `__`, e.g. `FOREMAN_GATEWAY__PORT=9000`).

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::gateway::connection::GatewayConfig;
use crate::llm::config::LlmConfig;
use crate::services::escalation_handler::StuckConfig;
use crate::services::lane_selector::LanesConfig;
use crate::services::quality_gate_runner::VerificationConfig;
use crate::services::retry_handler::RetryConfig;
use crate::services::scheduler::SchedulerConfig;

/// Root configuration tree for the server binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForemanConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub lanes: LanesConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub stuck: StuckConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl ForemanConfig {
    /// Load configuration, merging an optional YAML file and environment
    /// overrides on top of the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        } else {
            figment = figment.merge(Yaml::file("foreman.yaml"));
        }
        let config = figment
            .merge(Env::prefixed("FOREMAN_").split("__"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = ForemanConfig::load(Some(Path::new("/nonexistent/foreman.yaml"))).unwrap();
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(config.gateway.port, 8787);
        assert_eq!(config.lanes.subagent, 3);
    }

    #[test]
    fn test_yaml_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "gateway:\n  port: 9999\nscheduler:\n  max_concurrent_goals: 2\n"
        )
        .unwrap();
        let config = ForemanConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.gateway.port, 9999);
        assert_eq!(config.scheduler.max_concurrent_goals, 2);
        // Untouched values keep their defaults.
        assert_eq!(config.gateway.heartbeat_interval_ms, 30_000);
    }
}
