// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Terminal outcomes of an update cycle and how they are reported

use crate::error::ErrorClass;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    NotConfigured {
        missing: Vec<String>,
    },
    UpToDate {
        fingerprint: String,
    },
    CheckFailed {
        error: String,
    },
    /// Free space could not be determined
    PreflightFailed {
        error: String,
    },
    InsufficientSpace {
        required: u64,
        available: u64,
    },
    BackupFailed {
        error: String,
    },
    DownloadFailed {
        error: String,
    },
    VerificationFailed {
        expected: String,
        actual: String,
    },
    /// The backup is still on disk for manual recovery
    InstallFailed {
        error: String,
        backup: PathBuf,
    },
    /// New files are installed but no new process could be started
    RestartFailed {
        fingerprint: String,
        error: String,
    },
    Upgraded {
        fingerprint: String,
        restarted_pid: u32,
    },
}

impl CycleOutcome {
    /// A new instance is running and this process should step aside
    pub fn is_handover(&self) -> bool {
        matches!(self, Self::Upgraded { .. })
    }

    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::UpToDate { .. } | Self::Upgraded { .. } => None,
            Self::NotConfigured { .. } => Some(ErrorClass::Configuration),
            Self::CheckFailed { .. }
            | Self::PreflightFailed { .. }
            | Self::InsufficientSpace { .. }
            | Self::BackupFailed { .. }
            | Self::DownloadFailed { .. } => Some(ErrorClass::Transient),
            Self::VerificationFailed { .. } => Some(ErrorClass::Integrity),
            Self::InstallFailed { .. } => Some(ErrorClass::Install),
            Self::RestartFailed { .. } => Some(ErrorClass::Spawn),
        }
    }

    /// Emit the outcome as a single structured log event. Never fails.
    pub fn report(&self) {
        let record = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => format!("{self:?} (serialization failed: {e})"),
        };

        match self.class() {
            None => tracing::info!(target: "relaunch::upgrade", "Upgrade cycle: {record}"),
            Some(ErrorClass::Configuration | ErrorClass::Transient) => {
                tracing::warn!(target: "relaunch::upgrade", "Upgrade cycle: {record}");
            }
            Some(ErrorClass::Integrity | ErrorClass::Spawn) => {
                tracing::error!(target: "relaunch::upgrade", "Upgrade cycle: {record}");
            }
            Some(ErrorClass::Install) => {
                tracing::error!(
                    target: "relaunch::upgrade",
                    "Upgrade cycle: {record}, restore with `relaunch restore <backup>`"
                );
            }
        }
    }
}
