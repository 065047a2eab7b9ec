// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Generation marker: tells a freshly started process whether it is the
//! supervising parent or an already spawned worker.

use crate::error::Result;
use crate::spawner::{ChildHandle, SpawnRequest, Spawner};
use std::ffi::{OsStr, OsString};
use std::path::Path;

/// Environment variable carrying the generation index to the child
pub const GENERATION_ENV: &str = "RELAUNCH_GENERATION";

/// Inherited marker plus the number of `enter_or_spawn` calls made in this process.
///
/// A process started with marker `n` answers "worker" to its first `n` calls;
/// any later call spawns a new child carrying the call index as its marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    inherited: u32,
    calls: u32,
}

impl Generation {
    pub fn new(inherited: u32) -> Self {
        Self {
            inherited,
            calls: 0,
        }
    }

    /// Read the marker from this process's environment. Unset or garbage is 0.
    pub fn from_env() -> Self {
        Self::new(parse_marker(std::env::var_os(GENERATION_ENV).as_deref()))
    }

    /// Marker this process was started with
    pub fn inherited(&self) -> u32 {
        self.inherited
    }

    /// True when some parent already spawned this process
    pub fn is_spawned(&self) -> bool {
        self.inherited > 0
    }

    /// Either confirm this process is the worker (`Ok(None)`) or spawn a new
    /// child with the next generation marker and return its handle.
    pub fn enter_or_spawn<S: Spawner>(
        &mut self,
        spawner: &mut S,
        args: &[OsString],
        env: &[(OsString, OsString)],
        log_file: Option<&Path>,
    ) -> Result<Option<S::Child>> {
        self.calls += 1;
        if self.calls <= self.inherited {
            return Ok(None);
        }

        let child_env = with_marker(env, self.calls);
        let request = SpawnRequest {
            args,
            env: &child_env,
            log_file,
        };

        match spawner.spawn(&request) {
            Ok(child) => {
                tracing::info!(
                    "{} started child process -> {} (generation {})",
                    std::process::id(),
                    child.id(),
                    self.calls
                );
                Ok(Some(child))
            }
            Err(e) => {
                tracing::error!("{} failed to start child process: {e}", std::process::id());
                Err(e)
            }
        }
    }
}

fn parse_marker(value: Option<&OsStr>) -> u32 {
    value
        .and_then(OsStr::to_str)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Copy of `env` with exactly one generation marker set to `generation`
fn with_marker(env: &[(OsString, OsString)], generation: u32) -> Vec<(OsString, OsString)> {
    let mut child_env: Vec<(OsString, OsString)> = env
        .iter()
        .filter(|(key, _)| key != GENERATION_ENV)
        .cloned()
        .collect();
    child_env.push((GENERATION_ENV.into(), generation.to_string().into()));
    child_env
}
