// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Pre-upgrade snapshots and manual restore

use crate::config::PayloadKind;
use crate::error::{Result, UpgradeError};
use crate::install::{extract_archive, make_executable};
use crate::session::PayloadLayout;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tar::Builder;
use walkdir::{DirEntry, WalkDir};

const EXCLUDED_DIR: &str = "logs";
const EXCLUDED_EXTENSION: &str = "log";

/// Log output is never part of a snapshot
fn is_excluded(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    if entry.file_type().is_dir() {
        entry.file_name() == EXCLUDED_DIR
    } else {
        Path::new(entry.file_name())
            .extension()
            .is_some_and(|ext| ext == EXCLUDED_EXTENSION)
    }
}

/// Snapshot the current installation to `layout.backup`
pub fn create_backup(layout: &PayloadLayout) -> Result<()> {
    if let Some(parent) = layout.backup.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| UpgradeError::Backup(format!("cannot create {}: {e}", parent.display())))?;
    }

    let result = match layout.kind {
        PayloadKind::Executable => fs::copy(&layout.installed, &layout.backup)
            .map(|_| ())
            .map_err(|e| {
                UpgradeError::Backup(format!(
                    "cannot copy {}: {e}",
                    layout.installed.display()
                ))
            }),
        PayloadKind::Archive => pack_directory(&layout.app_path, &layout.backup),
    };

    match result {
        Ok(()) => {
            tracing::info!("Created backup at {}", layout.backup.display());
            Ok(())
        }
        Err(e) => {
            discard(&layout.backup, "partial backup");
            Err(e)
        }
    }
}

fn pack_directory(source: &Path, archive: &Path) -> Result<()> {
    let file = File::create(archive)
        .map_err(|e| UpgradeError::Backup(format!("cannot create {}: {e}", archive.display())))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut tar = Builder::new(encoder);
    tar.follow_symlinks(false);

    let walker = WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_excluded(e));

    let mut file_count = 0_usize;
    for entry in walker {
        let entry = entry.map_err(|e| UpgradeError::Backup(format!("walk failed: {e}")))?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let appended = if entry.file_type().is_dir() {
            tar.append_dir(relative, entry.path())
        } else {
            file_count += 1;
            tar.append_path_with_name(entry.path(), relative)
        };
        appended.map_err(|e| {
            UpgradeError::Backup(format!("cannot add {}: {e}", entry.path().display()))
        })?;
    }

    let encoder = tar
        .into_inner()
        .map_err(|e| UpgradeError::Backup(format!("failed to finish tar: {e}")))?;
    let mut file = encoder
        .finish()
        .map_err(|e| UpgradeError::Backup(format!("failed to finish compression: {e}")))?;
    file.flush()
        .map_err(|e| UpgradeError::Backup(format!("failed to flush archive: {e}")))?;

    tracing::debug!("Packed {file_count} files from {}", source.display());
    Ok(())
}

/// Best-effort removal of a cycle artifact
pub fn discard(path: &Path, what: &str) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed {what} {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {what} {}: {e}", path.display()),
    }
}

/// Put a backup taken by [`create_backup`] back in place
pub fn restore_backup(backup: &Path, layout: &PayloadLayout) -> Result<()> {
    if !backup.is_file() {
        return Err(UpgradeError::Backup(format!(
            "backup not found: {}",
            backup.display()
        )));
    }

    tracing::warn!("Restoring {} from {}", layout.app_path.display(), backup.display());

    let result = match layout.kind {
        PayloadKind::Executable => restore_executable(backup, layout),
        PayloadKind::Archive => {
            extract_archive(backup, &layout.app_path).map(|count| {
                tracing::info!("Restored {count} entries");
            })
        }
    };

    result.map_err(|e| UpgradeError::Install {
        reason: format!("restore failed: {e}"),
        backup: backup.to_path_buf(),
    })
}

fn restore_executable(backup: &Path, layout: &PayloadLayout) -> Result<()> {
    fs::create_dir_all(&layout.app_path)?;
    let restoring = layout
        .app_path
        .join(format!(".{}.restore", layout.app_name));
    fs::copy(backup, &restoring)?;
    make_executable(&restoring)?;
    if let Err(e) = fs::rename(&restoring, &layout.installed) {
        discard(&restoring, "restore staging");
        return Err(e.into());
    }
    tracing::info!("Restored {}", layout.installed.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpgradeConfig;
    use chrono::Local;
    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    fn layout(dir: &TempDir, kind: PayloadKind) -> PayloadLayout {
        let config = UpgradeConfig {
            app_path: dir.path().join("app"),
            app_name: "svc".to_owned(),
            payload: kind,
            temp_dir: Some(dir.path().join("tmp")),
            ..Default::default()
        };
        fs::create_dir_all(&config.app_path).unwrap();
        PayloadLayout::new(&config, Local::now())
    }

    fn archive_names(path: &Path) -> Vec<String> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_owned()
            })
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_executable_backup_is_copy() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir, PayloadKind::Executable);
        fs::write(&layout.installed, b"v1").unwrap();

        create_backup(&layout).unwrap();

        assert_eq!(fs::read(&layout.backup).unwrap(), b"v1");
        assert_eq!(fs::read(&layout.installed).unwrap(), b"v1");
    }

    #[test]
    fn test_backup_of_missing_payload_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir, PayloadKind::Executable);

        assert!(matches!(
            create_backup(&layout),
            Err(UpgradeError::Backup(_))
        ));
        assert!(!layout.backup.exists());
    }

    #[test]
    fn test_archive_backup_skips_logs() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir, PayloadKind::Archive);
        let app = &layout.app_path;
        fs::write(app.join("svc"), b"binary").unwrap();
        fs::write(app.join("svc.log"), b"noise").unwrap();
        fs::create_dir_all(app.join("logs")).unwrap();
        fs::write(app.join("logs/today.txt"), b"noise").unwrap();
        fs::create_dir_all(app.join("conf")).unwrap();
        fs::write(app.join("conf/app.toml"), b"x = 1").unwrap();
        fs::write(app.join("conf/debug.log"), b"noise").unwrap();

        create_backup(&layout).unwrap();

        assert_eq!(
            archive_names(&layout.backup),
            vec!["conf", "conf/app.toml", "svc"]
        );
    }

    #[test]
    fn test_restore_executable() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir, PayloadKind::Executable);
        fs::write(&layout.installed, b"v1").unwrap();
        create_backup(&layout).unwrap();
        fs::write(&layout.installed, b"broken").unwrap();

        restore_backup(&layout.backup, &layout).unwrap();

        assert_eq!(fs::read(&layout.installed).unwrap(), b"v1");
        assert!(layout.backup.exists());
    }

    #[test]
    fn test_restore_archive() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir, PayloadKind::Archive);
        fs::write(layout.app_path.join("svc"), b"v1").unwrap();
        create_backup(&layout).unwrap();
        fs::write(layout.app_path.join("svc"), b"v2").unwrap();

        restore_backup(&layout.backup, &layout).unwrap();

        assert_eq!(fs::read(layout.app_path.join("svc")).unwrap(), b"v1");
    }

    #[test]
    fn test_restore_missing_backup() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir, PayloadKind::Executable);
        assert!(matches!(
            restore_backup(&dir.path().join("nope.bak"), &layout),
            Err(UpgradeError::Backup(_))
        ));
    }

    #[test]
    fn test_discard_ignores_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone");
        discard(&path, "staging");
        fs::write(&path, b"x").unwrap();
        discard(&path, "staging");
        assert!(!path.exists());
    }
}
