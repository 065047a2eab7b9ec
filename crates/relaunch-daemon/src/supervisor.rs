// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Supervisory loop: spawn child, wait, classify, decide, repeat

use crate::generation::Generation;
use crate::policy::{ExitClass, SupervisorPolicy, classify};
use crate::spawner::{ChildHandle, CommandSpawner, Spawner};
use std::ffi::OsString;
use std::time::Instant;
use tracing::{error, info, warn};

/// Why the supervising process stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Background supervisor started, the foreground process may exit
    Detached,
    /// `max_restarts` reached, a planned stop
    RestartLimit,
    /// More than `max_consecutive_failures` crashes in a row
    FailureBudgetExhausted,
}

impl Termination {
    /// Status a wrapping service manager sees
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Detached | Self::RestartLimit => 0,
            Self::FailureBudgetExhausted => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// This process is the spawned worker and should get on with its job
    Worker,
    /// This process must exit with `Termination::exit_code`
    Terminated(Termination),
}

/// Owns the restart and failure counters for one supervised application.
/// Only the loop in [`Supervisor::run`] writes them.
#[derive(Debug)]
pub struct Supervisor<S = CommandSpawner> {
    policy: SupervisorPolicy,
    generation: Generation,
    spawner: S,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
    restart_count: u32,
    consecutive_failures: u32,
}

impl Supervisor<CommandSpawner> {
    /// Supervisor that re-executes the running binary with its own arguments
    /// and environment
    pub fn for_current_process(policy: SupervisorPolicy) -> Self {
        let mut args: Vec<OsString> = std::env::args_os().collect();
        if let Ok(exe) = std::env::current_exe()
            && let Some(first) = args.first_mut()
        {
            *first = exe.into_os_string();
        }
        let env = std::env::vars_os().collect();

        Self::new(policy, Generation::from_env(), CommandSpawner, args, env)
    }
}

impl<S: Spawner> Supervisor<S> {
    pub fn new(
        policy: SupervisorPolicy,
        generation: Generation,
        spawner: S,
        args: Vec<OsString>,
        env: Vec<(OsString, OsString)>,
    ) -> Self {
        Self {
            policy,
            generation,
            spawner,
            args,
            env,
            restart_count: 0,
            consecutive_failures: 0,
        }
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    /// Run the supervisor. Returns `Worker` in the spawned child; in the
    /// supervising parent it only returns once a termination condition holds.
    pub fn run(&mut self) -> RunOutcome {
        if self.policy.detach {
            match self.generation.enter_or_spawn(
                &mut self.spawner,
                &self.args,
                &self.env,
                self.policy.log_file.as_deref(),
            ) {
                Ok(Some(child)) => {
                    info!(
                        "{} detached, supervisor continues as {}",
                        std::process::id(),
                        child.id()
                    );
                    return RunOutcome::Terminated(Termination::Detached);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Could not detach ({e}), supervising in the foreground");
                }
            }
        }

        loop {
            let descriptor = self.describe();

            if self.policy.failures_exhausted(self.consecutive_failures) {
                error!("{descriptor} child process failed too many times, giving up");
                return RunOutcome::Terminated(Termination::FailureBudgetExhausted);
            }
            if self.policy.restarts_exhausted(self.restart_count) {
                info!("{descriptor} restart limit reached");
                return RunOutcome::Terminated(Termination::RestartLimit);
            }

            self.restart_count += 1;
            let started = Instant::now();

            let mut child = match self.generation.enter_or_spawn(
                &mut self.spawner,
                &self.args,
                &self.env,
                self.policy.log_file.as_deref(),
            ) {
                Ok(Some(child)) => child,
                Ok(None) => {
                    info!("child process (pid: {}) start run", std::process::id());
                    return RunOutcome::Worker;
                }
                Err(e) => {
                    error!("{descriptor} failed to start child process: {e}");
                    self.consecutive_failures += 1;
                    continue;
                }
            };

            let pid = child.id();
            let exit = child.wait();
            let runtime = started.elapsed();

            let class = classify(runtime, self.policy.min_healthy_runtime);
            match class {
                ExitClass::Crash => self.consecutive_failures += 1,
                ExitClass::Normal => self.consecutive_failures = 0,
            }

            match exit {
                Ok(exit) => info!(
                    "{descriptor} child process ({pid}) exited after {:.1}s with {exit}, classified {class:?}",
                    runtime.as_secs_f64()
                ),
                Err(e) => warn!(
                    "{descriptor} child process ({pid}) lost after {:.1}s: {e}, classified {class:?}",
                    runtime.as_secs_f64()
                ),
            }
        }
    }

    fn describe(&self) -> String {
        format!(
            "daemon process (pid: {}, restart count: {}/{}, error count: {}/{})",
            std::process::id(),
            self.restart_count,
            self.policy.max_restarts,
            self.consecutive_failures,
            self.policy.max_consecutive_failures
        )
    }
}
