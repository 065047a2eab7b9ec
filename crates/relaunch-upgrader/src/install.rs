// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Moving a verified payload into place

use crate::config::PayloadKind;
use crate::error::{Result, UpgradeError};
use crate::session::PayloadLayout;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::path::Path;
use tar::Archive;

pub fn make_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Unpack a `.tar.gz` into `dest`, refusing entries that resolve outside of it
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest)?;
    let mut archive = Archive::new(GzDecoder::new(File::open(archive)?));
    archive.set_preserve_permissions(true);

    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.display().to_string();
        if !entry.unpack_in(dest)? {
            return Err(UpgradeError::Io(std::io::Error::other(format!(
                "archive entry {name} escapes {}",
                dest.display()
            ))));
        }
        count += 1;
    }
    Ok(count)
}

/// Replace the installed payload with the verified staging file
pub fn install(layout: &PayloadLayout, fingerprint: &str) -> Result<()> {
    let result = match layout.kind {
        PayloadKind::Executable => install_executable(&layout.staging, &layout.installed),
        PayloadKind::Archive => install_archive(layout, fingerprint),
    };

    result.map_err(|e| UpgradeError::Install {
        reason: e.to_string(),
        backup: layout.backup.clone(),
    })
}

fn install_executable(staging: &Path, installed: &Path) -> Result<()> {
    make_executable(staging)?;
    fs::rename(staging, installed)?;
    tracing::info!("Installed {}", installed.display());
    Ok(())
}

fn install_archive(layout: &PayloadLayout, fingerprint: &str) -> Result<()> {
    let count = extract_archive(&layout.staging, &layout.app_path)?;
    if layout.installed.exists() {
        make_executable(&layout.installed)?;
    }
    fs::write(&layout.stamp, format!("{fingerprint}\n"))?;
    tracing::info!(
        "Extracted {count} entries into {}",
        layout.app_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpgradeConfig;
    use chrono::Local;
    use flate2::Compression;
    use flate2::write::GzEncoder;
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
        fs::create_dir_all(dir.path().join("tmp")).unwrap();
        PayloadLayout::new(&config, Local::now())
    }

    fn write_archive(path: &Path, files: &[(&str, &[u8])]) {
        let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_install_executable_renames_and_sets_mode() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir, PayloadKind::Executable);
        fs::write(&layout.installed, b"old").unwrap();
        fs::write(&layout.staging, b"new").unwrap();

        install(&layout, "unused").unwrap();

        assert_eq!(fs::read(&layout.installed).unwrap(), b"new");
        assert!(!layout.staging.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&layout.installed).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_install_failure_names_backup() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir, PayloadKind::Executable);

        // No staging file
        match install(&layout, "unused") {
            Err(UpgradeError::Install { backup, .. }) => assert_eq!(backup, layout.backup),
            other => panic!("expected install error, got {other:?}"),
        }
    }

    #[test]
    fn test_install_archive_writes_stamp() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir, PayloadKind::Archive);
        fs::write(layout.app_path.join("svc"), b"old").unwrap();
        write_archive(
            &layout.staging,
            &[
                ("svc", "new binary".as_bytes()),
                ("share/readme.txt", "docs".as_bytes()),
            ],
        );

        install(&layout, "0123456789abcdef0123456789abcdef").unwrap();

        assert_eq!(fs::read(layout.app_path.join("svc")).unwrap(), b"new binary");
        assert_eq!(
            fs::read(layout.app_path.join("share/readme.txt")).unwrap(),
            b"docs"
        );
        assert_eq!(
            fs::read_to_string(&layout.stamp).unwrap().trim(),
            "0123456789abcdef0123456789abcdef"
        );
    }

    #[test]
    fn test_extract_rejects_escaping_entries() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("evil.tar.gz");

        let encoder = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let data = b"owned";
        let mut header = tar::Header::new_gnu();
        header.as_gnu_mut().unwrap().name[..12].copy_from_slice(b"../outside.t");
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &data[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = dir.path().join("dest");
        assert!(extract_archive(&archive, &dest).is_err());
        assert!(!dir.path().join("outside.t").exists());
    }
}
