//! Mount utilities for container filesystem setup.

use std::path::Path;

use corral_common::error::{CorralError, Result};
use nix::mount::{MsFlags, mount};

use super::in_rootfs;
use crate::spec::{MountEntry, MountFlag};

/// Translates spec mount flags to kernel flags.
#[must_use]
pub fn ms_flags(flags: &[MountFlag]) -> MsFlags {
    flags.iter().fold(MsFlags::empty(), |acc, flag| {
        acc | match flag {
            MountFlag::NoExec => MsFlags::MS_NOEXEC,
            MountFlag::NoSuid => MsFlags::MS_NOSUID,
            MountFlag::NoDev => MsFlags::MS_NODEV,
            MountFlag::StrictAtime => MsFlags::MS_STRICTATIME,
            MountFlag::ReadOnly => MsFlags::MS_RDONLY,
            MountFlag::Bind => MsFlags::MS_BIND,
            MountFlag::Recursive => MsFlags::MS_REC,
        }
    })
}

/// Stops mount events from propagating back to the host.
///
/// # Errors
///
/// Returns an error if the propagation change fails.
pub fn make_root_private() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| CorralError::kernel("make / rprivate", e))
}

/// Turns the rootfs directory into a mount point, as `pivot_root(2)` needs.
///
/// # Errors
///
/// Returns an error if the bind mount fails.
pub fn bind_onto_itself(rootfs: &Path) -> Result<()> {
    mount(
        Some(rootfs),
        rootfs,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| CorralError::kernel("bind rootfs", e))
}

/// Performs one spec mount below `rootfs`, creating the mount point.
///
/// # Errors
///
/// Returns an error if the mount point cannot be created or `mount(2)`
/// fails.
pub fn mount_entry(rootfs: &Path, entry: &MountEntry) -> Result<()> {
    let target = in_rootfs(rootfs, &entry.destination);
    std::fs::create_dir_all(&target).map_err(|e| CorralError::io(&target, e))?;
    mount(
        Some(entry.source.as_str()),
        &target,
        Some(entry.fstype.as_str()),
        ms_flags(&entry.flags),
        entry.data.as_deref(),
    )
    .map_err(|e| CorralError::Kernel {
        operation: "mount",
        message: format!("{} on {}: {e}", entry.fstype, target.display()),
    })?;
    tracing::debug!(target = %target.display(), fstype = %entry.fstype, "mounted");
    Ok(())
}

/// Hides a path: files are covered by `/dev/null`, directories by an empty
/// read-only tmpfs. Missing paths are skipped.
///
/// # Errors
///
/// Returns an error if the covering mount fails.
pub fn mask_path(path: &Path) -> Result<()> {
    let Ok(meta) = std::fs::metadata(path) else {
        return Ok(());
    };
    let result = if meta.is_dir() {
        mount(
            Some("tmpfs"),
            path,
            Some("tmpfs"),
            MsFlags::MS_RDONLY,
            None::<&str>,
        )
    } else {
        mount(
            Some("/dev/null"),
            path,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
    };
    result.map_err(|e| CorralError::Kernel {
        operation: "mask path",
        message: format!("{}: {e}", path.display()),
    })?;
    tracing::debug!(path = %path.display(), "masked");
    Ok(())
}

/// Bind-mounts a path onto itself and remounts it read-only. Missing paths
/// are skipped.
///
/// # Errors
///
/// Returns an error if either mount fails.
pub fn readonly_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let fail = |e: nix::Error| CorralError::Kernel {
        operation: "readonly path",
        message: format!("{}: {e}", path.display()),
    };
    mount(
        Some(path),
        path,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(fail)?;
    mount(
        Some(path),
        path,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(fail)?;
    tracing::debug!(path = %path.display(), "made read-only");
    Ok(())
}
