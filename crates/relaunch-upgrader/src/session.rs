// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Per-cycle state: where things live on disk and what the remote offers

use crate::config::{PayloadKind, UpgradeConfig};
use crate::error::{Result, UpgradeError};
use crate::fetch::Fetcher;
use crate::fingerprint::{
    FingerprintAlgorithm, file_fingerprint, is_fingerprint, parse_remote_fingerprint,
};
use chrono::{DateTime, Local};
use std::path::PathBuf;

pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Filesystem locations used by one cycle, all derived from the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadLayout {
    pub kind: PayloadKind,
    pub app_path: PathBuf,
    pub app_name: String,
    /// `<app_path>/<app_name>`
    pub installed: PathBuf,
    pub staging: PathBuf,
    pub backup: PathBuf,
    /// Verified fingerprint of the last installed archive
    pub stamp: PathBuf,
}

impl PayloadLayout {
    pub fn new(config: &UpgradeConfig, now: DateTime<Local>) -> Self {
        let tmp = config.temp_dir();
        let name = &config.app_name;
        let timestamp = now.format(BACKUP_TIMESTAMP_FORMAT);

        let (staging, backup) = match config.payload {
            PayloadKind::Executable => (
                config.app_path.join(format!(".{name}.staging")),
                tmp.join(format!("{name}-{timestamp}.bak")),
            ),
            PayloadKind::Archive => (
                tmp.join(format!("{name}.tar.gz")),
                tmp.join(format!("{name}-{timestamp}.tar.gz")),
            ),
        };

        Self {
            kind: config.payload,
            app_path: config.app_path.clone(),
            app_name: name.clone(),
            installed: config.app_path.join(name),
            staging,
            backup,
            stamp: config.app_path.join(format!(".{name}.fingerprint")),
        }
    }

    /// Fingerprint of what is installed right now
    pub fn installed_fingerprint(&self, algorithm: FingerprintAlgorithm) -> Result<String> {
        if self.kind == PayloadKind::Archive
            && let Ok(stamp) = std::fs::read_to_string(&self.stamp)
        {
            let stamp = stamp.trim();
            if is_fingerprint(stamp, algorithm) {
                return Ok(stamp.to_owned());
            }
            tracing::warn!("Ignoring malformed fingerprint stamp {}", self.stamp.display());
        }
        file_fingerprint(&self.installed, algorithm)
    }
}

#[derive(Debug, Clone)]
pub struct UpgradeSession {
    pub identity: String,
    pub installed_fingerprint: String,
    /// Set by a check that found a newer payload
    pub candidate_fingerprint: Option<String>,
    pub layout: PayloadLayout,
}

impl UpgradeSession {
    pub fn open(config: &UpgradeConfig, identity: String) -> Result<Self> {
        let layout = PayloadLayout::new(config, Local::now());
        let installed_fingerprint = layout.installed_fingerprint(config.algorithm)?;
        Ok(Self {
            identity,
            installed_fingerprint,
            candidate_fingerprint: None,
            layout,
        })
    }

    /// Ask the check endpoint for the newest fingerprint. A malformed body means
    /// no update, a transport failure is an error.
    pub async fn check_remote(
        &mut self,
        config: &UpgradeConfig,
        fetcher: &dyn Fetcher,
    ) -> Result<bool> {
        let body = fetcher
            .get_text(
                &config.check_url,
                &[("id", self.identity.as_str())],
                config.check_timeout(),
            )
            .await?;
        self.accept_remote(&body, config.algorithm);
        Ok(self.update_available())
    }

    fn accept_remote(&mut self, body: &str, algorithm: FingerprintAlgorithm) {
        self.candidate_fingerprint = match parse_remote_fingerprint(body, algorithm) {
            Some(remote) if remote != self.installed_fingerprint => Some(remote),
            Some(_) => None,
            None => {
                tracing::debug!("Check response is not a fingerprint, treating as no update");
                None
            }
        };
    }

    pub fn update_available(&self) -> bool {
        self.candidate_fingerprint
            .as_deref()
            .is_some_and(|candidate| candidate != self.installed_fingerprint)
    }

    /// Fingerprint the staged download must match
    pub fn expected_fingerprint(&self) -> Result<&str> {
        self.candidate_fingerprint
            .as_deref()
            .ok_or_else(|| UpgradeError::Fingerprint("no candidate fingerprint".to_owned()))
    }
}
