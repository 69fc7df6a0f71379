use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::execution::retry::{DEFAULT_MUTATION_RETRIES, DEFAULT_RETRY_INTERVAL};
use crate::model::ClusterConfig;

pub const DEFAULT_CONFIG_FILE: &str = "liverun.toml";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub cluster: ClusterSection,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSection {
    pub id: String,
    /// Display name used in navigation state
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub attach_credentials: bool,
    #[serde(default)]
    pub passthrough_address: Option<String>,
    /// Base URL of the cluster API
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bearer token; `${VAR}` and `~` are expanded
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_mutation_retries")]
    pub mutation_retries: u32,
    #[serde(default = "default_retry_interval_ms")]
    pub mutation_retry_interval_ms: u64,
    /// Re-issue the request on each pending tick
    #[serde(default)]
    pub resubmit_on_retry: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mutation_retries: default_mutation_retries(),
            mutation_retry_interval_ms: default_retry_interval_ms(),
            resubmit_on_retry: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_auto_hide_ms")]
    pub auto_hide_ms: u64,
    /// Telemetry events are POSTed here when set
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            auto_hide_ms: default_auto_hide_ms(),
            webhook_url: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_mutation_retries() -> u32 {
    DEFAULT_MUTATION_RETRIES
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL.as_millis() as u64
}

fn default_auto_hide_ms() -> u64 {
    5000
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Settings for replaying recorded events without a config file
    pub fn offline() -> Self {
        Self {
            cluster: ClusterSection {
                id: "local".to_string(),
                name: None,
                attach_credentials: false,
                passthrough_address: None,
                endpoint: None,
                token: None,
            },
            execution: ExecutionConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.cluster.id.trim().is_empty() {
            anyhow::bail!("cluster.id must not be empty");
        }

        if self.execution.mutation_retry_interval_ms == 0 {
            anyhow::bail!("execution.mutation_retry_interval_ms must be greater than zero");
        }

        Ok(())
    }

    /// Endpoint check for commands that talk to a real cluster
    pub fn require_endpoint(&self) -> Result<&str> {
        match (&self.cluster.endpoint, &self.cluster.passthrough_address) {
            (Some(endpoint), _) => Ok(endpoint),
            (None, Some(address)) => Ok(address),
            (None, None) => anyhow::bail!(
                "cluster.endpoint is required unless a passthrough address or a replay file is used"
            ),
        }
    }

    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            id: self.cluster.id.clone(),
            attach_credentials: self.cluster.attach_credentials,
            passthrough_address: self.cluster.passthrough_address.clone(),
        }
    }

    pub fn cluster_name(&self) -> String {
        self.cluster.name.clone().unwrap_or_else(|| self.cluster.id.clone())
    }

    /// The token with environment variables expanded
    pub fn token(&self) -> Result<Option<String>> {
        self.cluster
            .token
            .as_deref()
            .map(|raw| {
                shellexpand::full(raw)
                    .map(|expanded| expanded.into_owned())
                    .with_context(|| "Failed to expand cluster.token")
            })
            .transpose()
    }
}
