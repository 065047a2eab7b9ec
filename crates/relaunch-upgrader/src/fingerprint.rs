// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Content fingerprints of installed and staged payloads

use crate::error::{Result, UpgradeError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl FingerprintAlgorithm {
    /// Length of the lowercase hex digest
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }
}

enum Hasher {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: FingerprintAlgorithm) -> Self {
        match algorithm {
            FingerprintAlgorithm::Md5 => Self::Md5(md5::Context::new()),
            FingerprintAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.consume(data),
            Self::Sha256(hasher) => hasher.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Self::Md5(ctx) => format!("{:x}", ctx.compute()),
            Self::Sha256(hasher) => format!("{:x}", hasher.finalize()),
        }
    }
}

/// Hash a file in streaming fashion
pub fn file_fingerprint(path: &Path, algorithm: FingerprintAlgorithm) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        UpgradeError::Fingerprint(format!("cannot open {}: {e}", path.display()))
    })?;

    let mut hasher = Hasher::new(algorithm);
    let mut buf = vec![0_u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).map_err(|e| {
            UpgradeError::Fingerprint(format!("cannot read {}: {e}", path.display()))
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finish())
}

/// Hash an in-memory buffer
pub fn bytes_fingerprint(data: &[u8], algorithm: FingerprintAlgorithm) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finish()
}

/// Strict shape check: exact length, lowercase hex only
pub fn is_fingerprint(candidate: &str, algorithm: FingerprintAlgorithm) -> bool {
    candidate.len() == algorithm.hex_len()
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Extract a fingerprint from a check response body, `None` if malformed
pub fn parse_remote_fingerprint(body: &str, algorithm: FingerprintAlgorithm) -> Option<String> {
    let candidate = body.trim_end();
    is_fingerprint(candidate, algorithm).then(|| candidate.to_owned())
}
