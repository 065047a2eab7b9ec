// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use anyhow::{Context, Result};
use relaunch_daemon::SupervisorPolicy;
use relaunch_upgrader::UpgradeConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

fn default_true() -> bool {
    true
}

fn default_3() -> u32 {
    3
}

fn default_10() -> u64 {
    10
}

/// Application configuration, one TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub supervisor: SupervisorSettings,

    #[serde(default)]
    pub upgrade: UpgradeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Maximum number of child starts, 0 = unlimited
    #[serde(default)]
    pub max_restarts: u32,

    #[serde(default = "default_3")]
    pub max_consecutive_failures: u32,

    /// Children exiting sooner than this count as crashes
    #[serde(default = "default_10")]
    pub min_healthy_runtime_secs: u64,

    /// Child stdout/stderr are appended here instead of inherited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Run the supervisor in the background
    #[serde(default = "default_true")]
    pub detach: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_restarts: 0,
            max_consecutive_failures: 3,
            min_healthy_runtime_secs: 10,
            log_file: None,
            detach: true,
        }
    }
}

impl SupervisorSettings {
    pub fn policy(&self) -> SupervisorPolicy {
        SupervisorPolicy {
            max_restarts: self.max_restarts,
            max_consecutive_failures: self.max_consecutive_failures,
            min_healthy_runtime: Duration::from_secs(self.min_healthy_runtime_secs),
            log_file: self.log_file.clone(),
            detach: self.detach,
        }
    }
}

impl AppConfig {
    /// Load from `path`, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Config file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
