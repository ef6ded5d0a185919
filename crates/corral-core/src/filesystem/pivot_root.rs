//! Secure root filesystem switching via `pivot_root(2)`.
//!
//! More secure than `chroot` because it actually changes the root mount
//! point rather than just the process's view of `/`.

use std::path::Path;

use corral_common::error::{CorralError, Result};
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::unistd::chdir;

/// Makes `new_root` the root of the mount namespace and detaches the old
/// root.
///
/// The old root is stacked under the new one by pivoting `.` onto itself,
/// so no `put_old` directory is needed inside the image.
///
/// # Errors
///
/// Returns an error if `pivot_root(2)` or the subsequent cleanup fails.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    chdir(new_root).map_err(|e| CorralError::kernel("chdir rootfs", e))?;
    nix::unistd::pivot_root(".", ".").map_err(|e| CorralError::kernel("pivot_root", e))?;
    // Unmounting must not propagate to the host's copy of the old root.
    mount(
        None::<&str>,
        ".",
        None::<&str>,
        MsFlags::MS_SLAVE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| CorralError::kernel("make old root rslave", e))?;
    umount2(".", MntFlags::MNT_DETACH).map_err(|e| CorralError::kernel("detach old root", e))?;
    chdir("/").map_err(|e| CorralError::kernel("chdir /", e))?;
    tracing::info!(new_root = %new_root.display(), "root switched");
    Ok(())
}
