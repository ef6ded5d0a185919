//! SHA-256 content hashing.

use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;

use corral_common::error::{CorralError, Result};
use corral_common::types::Sha256Hash;
use sha2::{Digest, Sha256};

/// Computes the SHA-256 hash of a file, streaming its content.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Sha256Hash> {
    let mut file = std::fs::File::open(path).map_err(|e| CorralError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| CorralError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let hex = hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        });
    tracing::debug!(path = %path.display(), hash = %hex, "hashed file");
    Sha256Hash::from_hex(&hex)
}
