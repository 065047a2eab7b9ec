// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Starting the freshly installed application

use crate::error::{Result, UpgradeError};
use crate::session::PayloadLayout;
use relaunch_daemon::GENERATION_ENV;
use std::ffi::OsString;
use std::process::Command;

/// Starts a new instance of the installed application
pub trait Launcher: Send + Sync {
    /// Returns the pid of the started process
    fn launch(&self, layout: &PayloadLayout) -> Result<u32>;
}

/// Runs `<app_path>/<app_name>` with the given arguments from inside `app_path`.
/// The generation marker is dropped so the new instance starts as a top-level process.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(args: Vec<OsString>) -> Self {
        Self { args }
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, layout: &PayloadLayout) -> Result<u32> {
        tracing::info!("Starting process: {}", layout.installed.display());

        let child = Command::new(&layout.installed)
            .args(&self.args)
            .current_dir(&layout.app_path)
            .env_remove(GENERATION_ENV)
            .spawn()
            .map_err(|e| {
                UpgradeError::Launch(format!(
                    "Failed to start {}: {e}",
                    layout.installed.display()
                ))
            })?;

        tracing::info!("Started process with PID: {}", child.id());
        Ok(child.id())
    }
}
