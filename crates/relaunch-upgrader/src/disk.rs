// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Free space preflight

use crate::config::PayloadKind;
use crate::error::{Result, UpgradeError};
use std::path::Path;
use walkdir::WalkDir;

/// Assumed requirement when the installed payload cannot be measured
pub const FALLBACK_REQUIRED: u64 = 10 * 1024 * 1024;

/// Bytes available to unprivileged users on the filesystem holding `path`.
/// Walks up to the nearest existing ancestor so a not yet created path still resolves.
pub fn available_space(path: &Path) -> Result<u64> {
    let probe = path
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new("/"));

    let stat = nix::sys::statvfs::statvfs(probe).map_err(|e| {
        UpgradeError::Io(std::io::Error::other(format!(
            "statvfs {} failed: {e}",
            probe.display()
        )))
    })?;

    Ok(widen(stat.blocks_available()).saturating_mul(widen(stat.fragment_size())))
}

/// statvfs field widths differ between platforms
fn widen<T: Into<u64>>(value: T) -> u64 {
    value.into()
}

fn installed_size(kind: PayloadKind, app_path: &Path, installed: &Path) -> std::io::Result<u64> {
    match kind {
        PayloadKind::Executable => Ok(std::fs::metadata(installed)?.len()),
        PayloadKind::Archive => {
            let mut total = 0_u64;
            for entry in WalkDir::new(app_path).follow_links(false) {
                let entry = entry.map_err(std::io::Error::other)?;
                if entry.file_type().is_file() {
                    total += entry.metadata().map_err(std::io::Error::other)?.len();
                }
            }
            Ok(total)
        }
    }
}

/// Installed payload size plus the safety margin
pub fn required_space(kind: PayloadKind, app_path: &Path, installed: &Path, margin: u64) -> u64 {
    match installed_size(kind, app_path, installed) {
        Ok(size) => size.saturating_add(margin),
        Err(e) => {
            tracing::warn!(
                "Cannot measure installed payload at {}, assuming {FALLBACK_REQUIRED} bytes: {e}",
                installed.display()
            );
            FALLBACK_REQUIRED
        }
    }
}

/// Fails with `InsufficientSpace` when `available < required`
pub fn ensure_space(required: u64, available: u64) -> Result<()> {
    if available < required {
        return Err(UpgradeError::InsufficientSpace {
            required,
            available,
        });
    }
    Ok(())
}
