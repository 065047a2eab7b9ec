// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Relaunch Upgrader - replaces the running application with a newer build
//!
//! A remote check endpoint publishes the fingerprint of the newest payload.
//! When it differs from the installed one, the payload is downloaded, verified
//! against that fingerprint, installed over the old one with a backup kept until
//! the install succeeded, and a fresh instance is started.

pub mod backup;
pub mod config;
pub mod disk;
pub mod error;
pub mod fetch;
pub mod fingerprint;
pub mod identity;
pub mod install;
pub mod launcher;
pub mod orchestrator;
pub mod outcome;
pub mod reaper;
pub mod schedule;
pub mod session;

pub use config::{PayloadKind, UpgradeConfig};
pub use error::{ErrorClass, Result, UpgradeError};
pub use fetch::{Fetcher, HttpFetcher};
pub use fingerprint::FingerprintAlgorithm;
pub use launcher::{Launcher, ProcessLauncher};
pub use orchestrator::Upgrader;
pub use outcome::CycleOutcome;
pub use session::{PayloadLayout, UpgradeSession};
