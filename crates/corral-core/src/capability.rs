//! Linux capability management for least-privilege execution.
//!
//! The init process drops every capability outside the allow-list from the
//! bounding set, then installs the allow-list as its effective, permitted,
//! inheritable, and ambient sets so the user's command keeps exactly those
//! privileges across `execve(2)`.

use corral_common::error::{CorralError, Result};
use serde::{Deserialize, Serialize};

/// Linux capability identifiers the runtime knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    /// Change file ownership.
    Chown,
    /// Bypass file read/write/execute permission checks.
    DacOverride,
    /// Bypass permission checks requiring the file owner.
    Fowner,
    /// Keep set-user-ID bits when modifying files.
    Fsetid,
    /// Send signals to arbitrary processes.
    Kill,
    /// Manipulate group IDs.
    Setgid,
    /// Manipulate user IDs.
    Setuid,
    /// Modify capability sets of other processes and the bounding set.
    Setpcap,
    /// Bind to ports below 1024.
    NetBindService,
    /// Configure network interfaces and firewall rules.
    NetAdmin,
    /// Use raw and packet sockets.
    NetRaw,
    /// Call `chroot(2)`.
    SysChroot,
    /// Broad administrative operations, including mounts and namespaces.
    SysAdmin,
    /// Create special files with `mknod(2)`.
    Mknod,
    /// Write to the kernel audit log.
    AuditWrite,
    /// Set file capabilities.
    Setfcap,
}

impl Capability {
    /// Kernel capability number from `linux/capability.h`.
    #[must_use]
    pub const fn number(self) -> u32 {
        match self {
            Self::Chown => 0,
            Self::DacOverride => 1,
            Self::Fowner => 3,
            Self::Fsetid => 4,
            Self::Kill => 5,
            Self::Setgid => 6,
            Self::Setuid => 7,
            Self::Setpcap => 8,
            Self::NetBindService => 10,
            Self::NetAdmin => 12,
            Self::NetRaw => 13,
            Self::SysChroot => 18,
            Self::SysAdmin => 21,
            Self::Mknod => 27,
            Self::AuditWrite => 29,
            Self::Setfcap => 31,
        }
    }
}

/// The five capability sets of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    /// Upper bound on capabilities the process can ever gain.
    pub bounding: Vec<Capability>,
    /// Capabilities checked by the kernel.
    pub effective: Vec<Capability>,
    /// Capabilities preserved across exec for privileged programs.
    pub inheritable: Vec<Capability>,
    /// Capabilities the process may make effective.
    pub permitted: Vec<Capability>,
    /// Capabilities preserved across exec of unprivileged programs.
    pub ambient: Vec<Capability>,
}

impl CapabilitySet {
    /// Populates all five sets from one allow-list.
    #[must_use]
    pub fn uniform(caps: &[Capability]) -> Self {
        Self {
            bounding: caps.to_vec(),
            effective: caps.to_vec(),
            inheritable: caps.to_vec(),
            permitted: caps.to_vec(),
            ambient: caps.to_vec(),
        }
    }
}

/// Folds a list of capabilities into the two 32-bit words `capset(2)` expects.
fn to_words(caps: &[Capability]) -> [u32; 2] {
    caps.iter().fold([0, 0], |mut words, cap| {
        let n = cap.number();
        words[(n / 32) as usize] |= 1 << (n % 32);
        words
    })
}

/// Unused `prctl(2)` arguments must be zero at full register width.
const ZERO: libc::c_ulong = 0;

/// Highest capability number supported by the running kernel.
fn last_cap() -> u32 {
    std::fs::read_to_string("/proc/sys/kernel/cap_last_cap")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(40)
}

/// Drops every capability not in `keep` from the bounding set.
///
/// Must run while the process still holds `CAP_SETPCAP`.
///
/// # Errors
///
/// Returns an error if `prctl(PR_CAPBSET_DROP)` fails.
pub fn drop_bounding(keep: &[Capability]) -> Result<()> {
    let kept: Vec<u32> = keep.iter().map(|c| c.number()).collect();
    for cap in (0..=last_cap()).filter(|n| !kept.contains(n)) {
        // SAFETY: PR_CAPBSET_DROP takes a capability number and no pointers.
        let rc = unsafe {
            libc::prctl(libc::PR_CAPBSET_DROP, libc::c_ulong::from(cap), ZERO, ZERO, ZERO)
        };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            // EINVAL means the kernel does not know this capability.
            if err.raw_os_error() != Some(libc::EINVAL) {
                return Err(CorralError::kernel("drop bounding capability", err));
            }
        }
    }
    tracing::debug!(retained = keep.len(), "bounding set reduced");
    Ok(())
}

/// Keeps permitted capabilities across the next UID change.
///
/// # Errors
///
/// Returns an error if `prctl(PR_SET_KEEPCAPS)` fails.
pub fn keep_across_setuid() -> Result<()> {
    // SAFETY: PR_SET_KEEPCAPS takes an integer flag and no pointers.
    let rc = unsafe { libc::prctl(libc::PR_SET_KEEPCAPS, 1 as libc::c_ulong, ZERO, ZERO, ZERO) };
    if rc != 0 {
        return Err(CorralError::kernel(
            "keep capabilities",
            std::io::Error::last_os_error(),
        ));
    }
    Ok(())
}

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: libc::c_int,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

/// `_LINUX_CAPABILITY_VERSION_3`: 64-bit sets split into two data words.
const CAPABILITY_VERSION_3: u32 = 0x2008_0522;

/// Installs the effective, permitted, and inheritable sets, then raises the
/// ambient set.
///
/// # Errors
///
/// Returns an error if `capset(2)` or `prctl(PR_CAP_AMBIENT_RAISE)` fails.
pub fn apply_process_sets(set: &CapabilitySet) -> Result<()> {
    let effective = to_words(&set.effective);
    let permitted = to_words(&set.permitted);
    let inheritable = to_words(&set.inheritable);
    let header = CapUserHeader {
        version: CAPABILITY_VERSION_3,
        pid: 0,
    };
    let data = [0, 1].map(|i| CapUserData {
        effective: effective[i],
        permitted: permitted[i],
        inheritable: inheritable[i],
    });

    // SAFETY: header and data are properly laid out for version 3 and
    // outlive the call; the kernel only reads from them.
    let rc = unsafe { libc::syscall(libc::SYS_capset, &raw const header, data.as_ptr()) };
    if rc != 0 {
        return Err(CorralError::kernel(
            "capset",
            std::io::Error::last_os_error(),
        ));
    }

    for cap in &set.ambient {
        // SAFETY: PR_CAP_AMBIENT_RAISE takes a capability number and no pointers.
        let rc = unsafe {
            libc::prctl(
                libc::PR_CAP_AMBIENT,
                libc::PR_CAP_AMBIENT_RAISE as libc::c_ulong,
                libc::c_ulong::from(cap.number()),
                ZERO,
                ZERO,
            )
        };
        if rc != 0 {
            return Err(CorralError::kernel(
                "raise ambient capability",
                std::io::Error::last_os_error(),
            ));
        }
    }
    tracing::debug!(effective = set.effective.len(), ambient = set.ambient.len(), "capabilities applied");
    Ok(())
}
