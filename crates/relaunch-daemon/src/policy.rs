// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Restart policy and exit classification

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorPolicy {
    /// Maximum number of child starts, 0 means unlimited
    pub max_restarts: u32,
    /// Give up once more than this many crashes happened in a row
    pub max_consecutive_failures: u32,
    /// Exits sooner than this count as crashes, whatever the exit status
    pub min_healthy_runtime: Duration,
    /// Child stdout/stderr go here when set
    pub log_file: Option<PathBuf>,
    /// Put the supervisor in the background and let the caller exit
    pub detach: bool,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 0,
            max_consecutive_failures: 3,
            min_healthy_runtime: Duration::from_secs(10),
            log_file: None,
            detach: true,
        }
    }
}

impl SupervisorPolicy {
    pub fn restarts_exhausted(&self, restart_count: u32) -> bool {
        self.max_restarts > 0 && restart_count >= self.max_restarts
    }

    pub fn failures_exhausted(&self, consecutive_failures: u32) -> bool {
        consecutive_failures > self.max_consecutive_failures
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Normal,
    Crash,
}

/// Classify a child exit by how long it ran. The exit status is not consulted:
/// a child that returns 0 right away is still a crash loop.
pub fn classify(runtime: Duration, min_healthy_runtime: Duration) -> ExitClass {
    if runtime < min_healthy_runtime {
        ExitClass::Crash
    } else {
        ExitClass::Normal
    }
}
