//! Cgroups v2 resource management.
//!
//! Every container gets one group at `<root>/<parent>/<id>`. The parent is
//! created on demand and the memory controller is enabled for its children
//! when the hierarchy allows it.

pub mod memory;

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};
use corral_common::types::ResourceLimits;

use crate::spec::CgroupSpec;

/// Handle to a cgroup for a specific container.
#[derive(Debug, Clone)]
pub struct CgroupManager {
    /// Path to this container's cgroup directory.
    path: PathBuf,
}

impl CgroupManager {
    /// Creates the container's cgroup and writes its limits.
    ///
    /// An existing group is reused.
    ///
    /// # Errors
    ///
    /// Returns an error if the group directory cannot be created or a limit
    /// cannot be written.
    pub fn create(root: &Path, spec: &CgroupSpec) -> Result<Self> {
        let parent = root.join(&spec.parent);
        std::fs::create_dir_all(&parent).map_err(|e| CorralError::io(&parent, e))?;
        enable_memory_controller(root);
        enable_memory_controller(&parent);

        let manager = Self::open(root, spec);
        match std::fs::create_dir(&manager.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(CorralError::io(&manager.path, e)),
        }
        manager.apply_limits(&spec.limits)?;
        tracing::info!(path = %manager.path.display(), "cgroup created");
        Ok(manager)
    }

    /// Returns a handle to the container's cgroup without touching the
    /// filesystem.
    #[must_use]
    pub fn open(root: &Path, spec: &CgroupSpec) -> Self {
        Self {
            path: root.join(&spec.parent).join(&spec.name),
        }
    }

    /// Path of the group directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies resource limits to this cgroup.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to cgroup control files fails.
    pub fn apply_limits(&self, limits: &ResourceLimits) -> Result<()> {
        if let Some(mem) = limits.memory_bytes {
            memory::set_memory_max(&self.path, mem)?;
        }
        Ok(())
    }

    /// Adds a process to this cgroup by writing its PID.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `cgroup.procs` fails.
    pub fn add_process(&self, pid: i32) -> Result<()> {
        let procs_path = self.path.join("cgroup.procs");
        std::fs::write(&procs_path, pid.to_string())
            .map_err(|e| CorralError::io(&procs_path, e))?;
        tracing::debug!(pid, "added process to cgroup");
        Ok(())
    }

    /// PIDs currently in this cgroup. A missing group has none.
    ///
    /// # Errors
    ///
    /// Returns an error if `cgroup.procs` exists but cannot be read.
    pub fn procs(&self) -> Result<Vec<i32>> {
        let procs_path = self.path.join("cgroup.procs");
        match std::fs::read_to_string(&procs_path) {
            Ok(raw) => Ok(raw.lines().filter_map(|l| l.trim().parse().ok()).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(CorralError::io(&procs_path, e)),
        }
    }

    /// Removes the cgroup. A group that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the group still holds processes or cannot be
    /// removed.
    pub fn destroy(&self) -> Result<()> {
        match std::fs::remove_dir(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            // Regular directories standing in for cgroupfs keep their files.
            Err(e) if e.raw_os_error() == Some(libc::ENOTEMPTY) => {
                std::fs::remove_dir_all(&self.path)
                    .map_err(|e| CorralError::io(&self.path, e))?;
            }
            Err(e) => return Err(CorralError::io(&self.path, e)),
        }
        tracing::info!(path = %self.path.display(), "cgroup destroyed");
        Ok(())
    }
}

/// Enables the memory controller for children of `dir`, best effort.
fn enable_memory_controller(dir: &Path) {
    let control = dir.join("cgroup.subtree_control");
    if !control.exists() {
        return;
    }
    if let Err(e) = std::fs::write(&control, "+memory") {
        tracing::warn!(path = %control.display(), error = %e, "could not enable memory controller");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> CgroupSpec {
        CgroupSpec {
            parent: "corral".into(),
            name: name.into(),
            limits: ResourceLimits {
                memory_bytes: Some(4096),
            },
        }
    }

    #[test]
    fn create_places_group_under_parent_and_writes_limit() {
        let root = tempfile::tempdir().expect("tempdir");
        let cg = CgroupManager::create(root.path(), &spec("abc")).expect("create");
        assert_eq!(cg.path(), root.path().join("corral/abc"));
        assert_eq!(memory::memory_max(cg.path()).expect("limit"), Some(4096));
    }

    #[test]
    fn create_reuses_existing_group() {
        let root = tempfile::tempdir().expect("tempdir");
        let _ = CgroupManager::create(root.path(), &spec("abc")).expect("first");
        let _ = CgroupManager::create(root.path(), &spec("abc")).expect("second");
    }

    #[test]
    fn procs_lists_written_pids() {
        let root = tempfile::tempdir().expect("tempdir");
        let cg = CgroupManager::create(root.path(), &spec("abc")).expect("create");
        assert!(cg.procs().expect("empty").is_empty());
        cg.add_process(1234).expect("add");
        assert_eq!(cg.procs().expect("procs"), vec![1234]);
    }

    #[test]
    fn destroy_is_idempotent() {
        let root = tempfile::tempdir().expect("tempdir");
        let cg = CgroupManager::create(root.path(), &spec("abc")).expect("create");
        cg.destroy().expect("destroy");
        assert!(!cg.path().exists());
        cg.destroy().expect("second destroy");
        assert!(CgroupManager::open(root.path(), &spec("abc")).procs().expect("gone").is_empty());
    }
}
