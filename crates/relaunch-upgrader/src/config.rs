// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Configuration of the update orchestrator

use crate::error::{Result, UpgradeError};
use crate::fingerprint::FingerprintAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_10() -> u64 {
    10
}

fn default_60() -> u64 {
    60
}

fn default_120() -> u64 {
    120
}

fn default_240() -> u64 {
    240
}

fn default_600() -> u64 {
    600
}

fn default_2048() -> u64 {
    2048
}

fn default_public_ip_url() -> String {
    "http://ifconfig.me".to_owned()
}

/// What the installed payload looks like on disk
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// A single file `<app_path>/<app_name>`, replaced by atomic rename
    #[default]
    Executable,
    /// A `.tar.gz` unpacked over `<app_path>`
    Archive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// Run the periodic update loop at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Host identity sent to the check endpoint, public IP when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    /// Directory holding the application
    #[serde(default)]
    pub app_path: PathBuf,

    /// Application file name inside `app_path`
    #[serde(default)]
    pub app_name: String,

    /// Returns the fingerprint of the newest payload
    #[serde(default)]
    pub check_url: String,

    /// Serves the newest payload
    #[serde(default)]
    pub file_url: String,

    #[serde(default)]
    pub payload: PayloadKind,

    #[serde(default)]
    pub algorithm: FingerprintAlgorithm,

    #[serde(default = "default_10")]
    pub check_timeout_secs: u64,

    #[serde(default = "default_600")]
    pub download_timeout_secs: u64,

    /// Base time between cycles
    #[serde(default = "default_240")]
    pub interval_minutes: u64,

    /// Upper bound of the random offset added to every interval
    #[serde(default = "default_120")]
    pub jitter_minutes: u64,

    /// Free space required on top of the installed payload size
    #[serde(default = "default_2048")]
    pub space_margin_kib: u64,

    /// Peers younger than this are left alone by the reaper
    #[serde(default = "default_60")]
    pub reap_grace_secs: u64,

    #[serde(default = "default_public_ip_url")]
    pub public_ip_url: String,

    /// Staging and backup location, OS temp dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            identity: None,
            app_path: PathBuf::new(),
            app_name: String::new(),
            check_url: String::new(),
            file_url: String::new(),
            payload: PayloadKind::default(),
            algorithm: FingerprintAlgorithm::default(),
            check_timeout_secs: 10,
            download_timeout_secs: 600,
            interval_minutes: 240,
            jitter_minutes: 120,
            space_margin_kib: 2048,
            reap_grace_secs: 60,
            public_ip_url: default_public_ip_url(),
            temp_dir: None,
        }
    }
}

impl UpgradeConfig {
    /// Names of required fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.check_url.trim().is_empty() {
            missing.push("check_url");
        }
        if self.file_url.trim().is_empty() {
            missing.push("file_url");
        }
        if self.app_name.trim().is_empty() {
            missing.push("app_name");
        }
        if self.app_path.as_os_str().is_empty() {
            missing.push("app_path");
        }
        missing
    }

    pub fn validate(&self) -> Result<()> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(UpgradeError::Config(format!(
                "incomplete upgrade configuration, missing: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_secs(self.jitter_minutes.saturating_mul(60))
    }

    pub fn space_margin_bytes(&self) -> u64 {
        self.space_margin_kib.saturating_mul(1024)
    }

    pub fn reap_grace(&self) -> Duration {
        Duration::from_secs(self.reap_grace_secs)
    }
}
