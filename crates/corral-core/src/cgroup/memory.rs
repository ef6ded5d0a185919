//! Memory resource control via cgroups v2.

use std::path::Path;

use corral_common::error::{CorralError, Result};

/// Sets the hard memory limit for a cgroup.
///
/// # Errors
///
/// Returns an error if writing to `memory.max` fails.
pub fn set_memory_max(cgroup_path: &Path, bytes: u64) -> Result<()> {
    let path = cgroup_path.join("memory.max");
    std::fs::write(&path, bytes.to_string()).map_err(|e| CorralError::io(&path, e))?;
    tracing::debug!(bytes, path = %path.display(), "memory limit set");
    Ok(())
}

/// Reads the hard memory limit, `None` meaning unlimited.
///
/// # Errors
///
/// Returns an error if `memory.max` cannot be read.
pub fn memory_max(cgroup_path: &Path) -> Result<Option<u64>> {
    let path = cgroup_path.join("memory.max");
    let raw = std::fs::read_to_string(&path).map_err(|e| CorralError::io(&path, e))?;
    Ok(raw.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_round_trips_through_control_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        set_memory_max(dir.path(), 1024).expect("write limit");
        assert_eq!(memory_max(dir.path()).expect("read limit"), Some(1024));

        std::fs::write(dir.path().join("memory.max"), "max\n").expect("write max");
        assert_eq!(memory_max(dir.path()).expect("read max"), None);
    }
}
