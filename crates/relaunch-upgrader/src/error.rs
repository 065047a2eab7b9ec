// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Error types for the upgrader crate

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fingerprint error: {0}")]
    Fingerprint(String),

    #[error("insufficient space: need {required} bytes, {available} available")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("backup error: {0}")]
    Backup(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("install failed: {reason} (backup kept at {})", backup.display())]
    Install { reason: String, backup: PathBuf },

    #[error("launch failed: {0}")]
    Launch(String),

    #[error("process list error: {0}")]
    ProcessList(String),
}

/// How an error is handled, see the cycle documentation in `orchestrator`
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Reported, cycle skipped
    Configuration,
    /// Reported, cycle aborted, retried on the next interval
    Transient,
    /// Cycle aborted, partial artifacts deleted
    Integrity,
    /// Backup deliberately left on disk for manual recovery
    Install,
    /// Child or restart could not be started
    Spawn,
}

impl UpgradeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) => ErrorClass::Configuration,
            Self::Fetch(_)
            | Self::Io(_)
            | Self::Fingerprint(_)
            | Self::InsufficientSpace { .. }
            | Self::Backup(_)
            | Self::ProcessList(_) => ErrorClass::Transient,
            Self::ChecksumMismatch { .. } => ErrorClass::Integrity,
            Self::Install { .. } => ErrorClass::Install,
            Self::Launch(_) => ErrorClass::Spawn,
        }
    }
}

pub type Result<T> = std::result::Result<T, UpgradeError>;
