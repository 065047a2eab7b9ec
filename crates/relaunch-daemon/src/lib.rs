// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Relaunch Daemon - keeps a worker process alive across crashes
//!
//! The current binary re-executes itself into a child process. A generation
//! marker passed through the child's environment lets every process decide
//! whether it is the supervising parent or the worker, without any help from
//! an external process manager.

pub mod error;
pub mod generation;
pub mod policy;
pub mod spawner;
pub mod supervisor;

pub use error::DaemonError;
pub use generation::{GENERATION_ENV, Generation};
pub use policy::{ExitClass, SupervisorPolicy, classify};
pub use spawner::{ChildExit, ChildHandle, CommandSpawner, SpawnRequest, Spawner};
pub use supervisor::{RunOutcome, Supervisor, Termination};
