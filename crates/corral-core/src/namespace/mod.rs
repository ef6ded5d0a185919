//! Linux namespace management for container isolation.
//!
//! Fresh namespaces are requested through `clone(2)` flags when the init
//! process is spawned. Existing namespaces (a sandbox's network namespace)
//! are joined by path with `setns(2)` from inside the init process.

pub mod network;
pub mod uts;

use std::fs::File;
use std::path::PathBuf;

use corral_common::error::{CorralError, Result};
use nix::sched::CloneFlags;
use serde::{Deserialize, Serialize};

/// Namespace types a container may create or join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    /// Mount table.
    Mount,
    /// Hostname and domain name.
    Uts,
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Process IDs.
    Pid,
    /// Network stack.
    Network,
}

impl NamespaceKind {
    /// The `CLONE_NEW*` flag for this namespace.
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Network => CloneFlags::CLONE_NEWNET,
        }
    }
}

/// One namespace of a container: created fresh when `path` is `None`,
/// otherwise joined from the given `/proc/<pid>/ns/*` path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceEntry {
    /// Namespace type.
    pub kind: NamespaceKind,
    /// Existing namespace to join.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl NamespaceEntry {
    /// Entry for a namespace created fresh at clone time.
    #[must_use]
    pub const fn new(kind: NamespaceKind) -> Self {
        Self { kind, path: None }
    }

    /// Entry for an existing namespace joined by path.
    #[must_use]
    pub const fn join(kind: NamespaceKind, path: PathBuf) -> Self {
        Self {
            kind,
            path: Some(path),
        }
    }
}

/// Combines the clone flags of every entry that must be freshly created.
#[must_use]
pub fn clone_flags<'a>(entries: impl IntoIterator<Item = &'a NamespaceEntry>) -> CloneFlags {
    entries
        .into_iter()
        .filter(|ns| ns.path.is_none())
        .fold(CloneFlags::empty(), |flags, ns| flags | ns.kind.clone_flag())
}

/// Moves the calling thread into an existing namespace.
///
/// Entries without a path are ignored.
///
/// # Errors
///
/// Returns an error if the namespace file cannot be opened or `setns(2)`
/// fails.
pub fn join(entry: &NamespaceEntry) -> Result<()> {
    let Some(path) = &entry.path else {
        return Ok(());
    };
    let file = File::open(path).map_err(|e| CorralError::io(path, e))?;
    nix::sched::setns(&file, entry.kind.clone_flag())
        .map_err(|e| CorralError::kernel("setns", e))?;
    tracing::debug!(kind = ?entry.kind, path = %path.display(), "joined namespace");
    Ok(())
}
