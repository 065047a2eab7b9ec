// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! The update cycle
//!
//! One cycle runs these steps strictly in order, each only after the previous
//! one succeeded:
//!
//! 1. configuration precondition
//! 2. fingerprint comparison against the check endpoint
//! 3. free space preflight
//! 4. backup of the current installation
//! 5. download to the staging path
//! 6. verification of the staged payload
//! 7. install
//! 8. backup removal and restart
//!
//! Before step 7 every abort leaves the installed payload untouched and removes
//! staging and backup. An install failure keeps the backup on disk.

use crate::backup::{self, discard};
use crate::config::UpgradeConfig;
use crate::disk;
use crate::error::Result;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::fingerprint::file_fingerprint;
use crate::identity::resolve_identity;
use crate::install;
use crate::launcher::{Launcher, ProcessLauncher};
use crate::outcome::CycleOutcome;
use crate::schedule::next_delay;
use crate::session::{PayloadLayout, UpgradeSession};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Upgrader<F = HttpFetcher, L = ProcessLauncher> {
    config: UpgradeConfig,
    fetcher: F,
    launcher: L,
}

impl<F: Fetcher, L: Launcher> Upgrader<F, L> {
    pub fn new(config: UpgradeConfig, fetcher: F, launcher: L) -> Self {
        Self {
            config,
            fetcher,
            launcher,
        }
    }

    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Run one full cycle and report its outcome
    pub async fn check_and_upgrade(&self) -> CycleOutcome {
        let outcome = self.cycle().await;
        outcome.report();
        outcome
    }

    /// Cycle immediately, then on a jittered interval. Returns only after a
    /// successful handover to a freshly started instance.
    pub async fn run(&self) -> CycleOutcome {
        let mut rng = StdRng::from_entropy();
        loop {
            let outcome = self.check_and_upgrade().await;
            if outcome.is_handover() {
                return outcome;
            }

            let delay = next_delay(self.config.interval(), self.config.jitter(), &mut rng);
            info!("Next upgrade check in {} minutes", delay.as_secs() / 60);
            tokio::time::sleep(delay).await;
        }
    }

    async fn cycle(&self) -> CycleOutcome {
        let config = &self.config;

        let missing = config.missing_fields();
        if !missing.is_empty() {
            return CycleOutcome::NotConfigured {
                missing: missing.into_iter().map(str::to_owned).collect(),
            };
        }

        let identity = resolve_identity(config, &self.fetcher).await;
        let mut session = match UpgradeSession::open(config, identity) {
            Ok(session) => session,
            Err(e) => return CycleOutcome::CheckFailed { error: e.to_string() },
        };

        match session.check_remote(config, &self.fetcher).await {
            Ok(true) => {}
            Ok(false) => {
                return CycleOutcome::UpToDate {
                    fingerprint: session.installed_fingerprint,
                };
            }
            Err(e) => return CycleOutcome::CheckFailed { error: e.to_string() },
        }

        let expected = match session.expected_fingerprint() {
            Ok(expected) => expected.to_owned(),
            Err(e) => return CycleOutcome::CheckFailed { error: e.to_string() },
        };
        info!(
            "New version available: {expected} (installed: {})",
            session.installed_fingerprint
        );

        let layout = &session.layout;
        if let Some(outcome) = self.preflight(layout) {
            return outcome;
        }

        if let Err(e) = backup::create_backup(layout) {
            return CycleOutcome::BackupFailed { error: e.to_string() };
        }

        if let Err(e) = self.download(layout).await {
            discard(&layout.staging, "staging");
            discard(&layout.backup, "backup");
            return CycleOutcome::DownloadFailed { error: e.to_string() };
        }

        let actual = match file_fingerprint(&layout.staging, config.algorithm) {
            Ok(actual) => actual,
            Err(e) => {
                discard(&layout.staging, "staging");
                discard(&layout.backup, "backup");
                return CycleOutcome::DownloadFailed { error: e.to_string() };
            }
        };
        if actual != expected {
            discard(&layout.staging, "staging");
            discard(&layout.backup, "backup");
            return CycleOutcome::VerificationFailed { expected, actual };
        }
        debug!("Staged payload verified: {actual}");

        if let Err(e) = install::install(layout, &expected) {
            discard(&layout.staging, "staging");
            return CycleOutcome::InstallFailed {
                error: e.to_string(),
                backup: layout.backup.clone(),
            };
        }
        discard(&layout.staging, "staging");
        discard(&layout.backup, "backup");

        match self.launcher.launch(layout) {
            Ok(pid) => CycleOutcome::Upgraded {
                fingerprint: expected,
                restarted_pid: pid,
            },
            Err(e) => CycleOutcome::RestartFailed {
                fingerprint: expected,
                error: e.to_string(),
            },
        }
    }

    fn preflight(&self, layout: &PayloadLayout) -> Option<CycleOutcome> {
        let required = disk::required_space(
            layout.kind,
            &layout.app_path,
            &layout.installed,
            self.config.space_margin_bytes(),
        );
        let available = match disk::available_space(&layout.app_path) {
            Ok(available) => available,
            Err(e) => return Some(CycleOutcome::PreflightFailed { error: e.to_string() }),
        };
        debug!("Space check: {required} bytes required, {available} available");

        disk::ensure_space(required, available).err().map(|_| {
            CycleOutcome::InsufficientSpace {
                required,
                available,
            }
        })
    }

    async fn download(&self, layout: &PayloadLayout) -> Result<u64> {
        if let Some(parent) = layout.staging.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let written = self
            .fetcher
            .download(
                &self.config.file_url,
                &layout.staging,
                self.config.download_timeout(),
            )
            .await?;
        info!("Downloaded {written} bytes to {}", layout.staging.display());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpgradeError;
    use crate::fingerprint::{FingerprintAlgorithm, bytes_fingerprint};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers every check with a fixed body and never serves a payload
    struct StaticFetcher(&'static str);

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn get_text(
            &self,
            _url: &str,
            _query: &[(&str, &str)],
            _timeout: Duration,
        ) -> Result<String> {
            Ok(self.0.to_owned())
        }

        async fn download(&self, _url: &str, _dest: &Path, _timeout: Duration) -> Result<u64> {
            Err(UpgradeError::Fetch("offline".to_owned()))
        }
    }

    #[derive(Default)]
    struct CountingLauncher(AtomicUsize);

    impl Launcher for CountingLauncher {
        fn launch(&self, _layout: &PayloadLayout) -> Result<u32> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }
    }

    #[tokio::test]
    async fn test_not_configured_is_reported() {
        let upgrader = Upgrader::new(
            UpgradeConfig::default(),
            StaticFetcher(""),
            CountingLauncher::default(),
        );

        match upgrader.check_and_upgrade().await {
            CycleOutcome::NotConfigured { missing } => {
                assert_eq!(missing, vec!["check_url", "file_url", "app_name", "app_path"]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_payload_fails_the_check() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = UpgradeConfig {
            identity: Some("host".to_owned()),
            app_path: dir.path().to_path_buf(),
            app_name: "absent".to_owned(),
            check_url: "http://check".to_owned(),
            file_url: "http://file".to_owned(),
            ..Default::default()
        };
        let upgrader = Upgrader::new(
            config,
            StaticFetcher("d41d8cd98f00b204e9800998ecf8427e"),
            CountingLauncher::default(),
        );

        assert!(matches!(
            upgrader.check_and_upgrade().await,
            CycleOutcome::CheckFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_download_failure_removes_backup() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = dir.path().join("app");
        let tmp = dir.path().join("tmp");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(app.join("svc"), b"hello").unwrap();

        let config = UpgradeConfig {
            identity: Some("host".to_owned()),
            app_path: app.clone(),
            app_name: "svc".to_owned(),
            check_url: "http://check".to_owned(),
            file_url: "http://file".to_owned(),
            temp_dir: Some(tmp.clone()),
            ..Default::default()
        };
        let launcher = CountingLauncher::default();
        let upgrader = Upgrader::new(
            config,
            StaticFetcher("d41d8cd98f00b204e9800998ecf8427e"),
            launcher,
        );

        assert!(matches!(
            upgrader.check_and_upgrade().await,
            CycleOutcome::DownloadFailed { .. }
        ));
        assert_eq!(std::fs::read(app.join("svc")).unwrap(), b"hello");
        assert_eq!(std::fs::read_dir(&tmp).unwrap().count(), 0);
        assert!(!app.join(".svc.staging").exists());
        assert_eq!(upgrader.launcher.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_returns_on_handover() {
        struct UpgradingFetcher;

        #[async_trait]
        impl Fetcher for UpgradingFetcher {
            async fn get_text(
                &self,
                _url: &str,
                _query: &[(&str, &str)],
                _timeout: Duration,
            ) -> Result<String> {
                Ok(bytes_fingerprint(b"v2", FingerprintAlgorithm::Md5))
            }

            async fn download(&self, _url: &str, dest: &Path, _timeout: Duration) -> Result<u64> {
                std::fs::write(dest, b"v2")?;
                Ok(2)
            }
        }

        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("svc"), b"v1").unwrap();
        let config = UpgradeConfig {
            identity: Some("host".to_owned()),
            app_path: dir.path().to_path_buf(),
            app_name: "svc".to_owned(),
            check_url: "http://check".to_owned(),
            file_url: "http://file".to_owned(),
            temp_dir: Some(dir.path().join("tmp")),
            ..Default::default()
        };
        let upgrader = Upgrader::new(config, UpgradingFetcher, CountingLauncher::default());

        let outcome = upgrader.run().await;
        assert!(outcome.is_handover());
        assert_eq!(std::fs::read(dir.path().join("svc")).unwrap(), b"v2");
        assert_eq!(upgrader.launcher.0.load(Ordering::SeqCst), 1);
    }
}
