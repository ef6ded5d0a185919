//! Network namespace helpers.
//!
//! A container's network namespace is addressed through its init process:
//! `/proc/<pid>/ns/net` stays valid for as long as that process lives.

use std::path::PathBuf;

/// Path of the network namespace owned by `pid`.
#[must_use]
pub fn netns_path(pid: i32) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/net"))
}

/// Returns `true` if `pid` still has a network namespace to join.
#[must_use]
pub fn netns_exists(pid: i32) -> bool {
    netns_path(pid).exists()
}
