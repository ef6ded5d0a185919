//! Root filesystem preparation for the init process.
//!
//! Runs inside the container's fresh mount namespace: the rootfs is bound
//! onto itself, pseudo-filesystems and device nodes are set up under it,
//! the root is switched with `pivot_root(2)`, and finally the hardening
//! paths are masked or made read-only.

pub mod device;
pub mod mount;
pub mod pivot_root;

use std::path::{Path, PathBuf};

use corral_common::error::Result;

use crate::spec::IsolationSpec;

/// Builds the container's root filesystem and switches into it.
///
/// # Errors
///
/// Returns an error if any mount, device, or root-switch step fails.
pub fn prepare_rootfs(spec: &IsolationSpec) -> Result<()> {
    let rootfs = spec.rootfs.as_path();
    mount::make_root_private()?;
    mount::bind_onto_itself(rootfs)?;
    for entry in &spec.mounts {
        mount::mount_entry(rootfs, entry)?;
    }
    for node in &spec.devices {
        device::create_device(rootfs, node)?;
    }
    device::create_std_symlinks(rootfs)?;
    pivot_root::pivot_root(rootfs)?;

    for path in &spec.masked_paths {
        mount::mask_path(path)?;
    }
    for path in &spec.readonly_paths {
        mount::readonly_path(path)?;
    }
    tracing::debug!(rootfs = %rootfs.display(), "root filesystem ready");
    Ok(())
}

/// Resolves an absolute container path against the host path of the rootfs.
#[must_use]
pub fn in_rootfs(rootfs: &Path, container_path: &Path) -> PathBuf {
    rootfs.join(container_path.strip_prefix("/").unwrap_or(container_path))
}
