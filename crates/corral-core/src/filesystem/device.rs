//! Device nodes and standard symlinks under the container's `/dev`.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use corral_common::error::{CorralError, Result};
use nix::errno::Errno;
use nix::mount::{MsFlags, mount};
use nix::sys::stat::{Mode, SFlag, makedev, mknod};
use nix::unistd::{Gid, Uid, chown};

use super::in_rootfs;
use crate::spec::DeviceNode;

/// Standard `/dev` symlinks into the process's own descriptors.
const STD_SYMLINKS: [(&str, &str); 4] = [
    ("/proc/self/fd", "dev/fd"),
    ("/proc/self/fd/0", "dev/stdin"),
    ("/proc/self/fd/1", "dev/stdout"),
    ("/proc/self/fd/2", "dev/stderr"),
];

/// Creates a character device node below `rootfs`.
///
/// When `mknod(2)` is not permitted, the host's node of the same path is
/// bind-mounted over an empty file instead.
///
/// # Errors
///
/// Returns an error if neither creation path works or ownership cannot be
/// set.
pub fn create_device(rootfs: &Path, node: &DeviceNode) -> Result<()> {
    let target = in_rootfs(rootfs, &node.path);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CorralError::io(parent, e))?;
    }

    match mknod(
        &target,
        SFlag::S_IFCHR,
        Mode::from_bits_truncate(node.file_mode),
        makedev(node.major, node.minor),
    ) {
        Ok(()) => {
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(node.file_mode))
                .map_err(|e| CorralError::io(&target, e))?;
            chown(
                &target,
                Some(Uid::from_raw(node.uid)),
                Some(Gid::from_raw(node.gid)),
            )
            .map_err(|e| CorralError::kernel("chown device", e))?;
        }
        Err(Errno::EPERM) => bind_host_device(&node.path, &target)?,
        Err(e) => {
            return Err(CorralError::Kernel {
                operation: "mknod",
                message: format!("{}: {e}", target.display()),
            });
        }
    }
    tracing::debug!(path = %node.path.display(), "device created");
    Ok(())
}

fn bind_host_device(host: &Path, target: &Path) -> Result<()> {
    let _ = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(target)
        .map_err(|e| CorralError::io(target, e))?;
    mount(
        Some(host),
        target,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|e| CorralError::Kernel {
        operation: "bind device",
        message: format!("{}: {e}", host.display()),
    })
}

/// Creates `/dev/fd`, `/dev/stdin`, `/dev/stdout`, and `/dev/stderr`.
/// Existing entries are left alone.
///
/// # Errors
///
/// Returns an error if a symlink cannot be created.
pub fn create_std_symlinks(rootfs: &Path) -> Result<()> {
    for (source, link) in STD_SYMLINKS {
        let link = rootfs.join(link);
        match std::os::unix::fs::symlink(source, &link) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(CorralError::io(&link, e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symlinks_point_at_own_descriptors() {
        let rootfs = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(rootfs.path().join("dev")).expect("dev dir");
        create_std_symlinks(rootfs.path()).expect("symlinks");
        create_std_symlinks(rootfs.path()).expect("idempotent");

        let target = std::fs::read_link(rootfs.path().join("dev/stdout")).expect("read link");
        assert_eq!(target, Path::new("/proc/self/fd/1"));
    }
}
