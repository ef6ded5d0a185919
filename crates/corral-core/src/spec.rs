//! The isolation spec: everything the kernel needs to know to build one
//! container.
//!
//! A spec is built once per container from a fixed template plus the
//! container ID and rootfs path, persisted by the state store, and handed to
//! the init process verbatim. It is never mutated after creation.

use std::path::{Path, PathBuf};

use corral_common::types::{ContainerId, ResourceLimits};
use serde::{Deserialize, Serialize};

use crate::capability::{Capability, CapabilitySet};
use crate::namespace::{NamespaceEntry, NamespaceKind};

/// Complete low-level isolation specification for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationSpec {
    /// Host path of the container's root filesystem.
    pub rootfs: PathBuf,
    /// Hostname set inside the UTS namespace.
    pub hostname: String,
    /// Namespaces to create or join.
    pub namespaces: Vec<NamespaceEntry>,
    /// Capability sets applied before exec.
    pub capabilities: CapabilitySet,
    /// Cgroup placement and limits.
    pub cgroup: CgroupSpec,
    /// Mounts performed inside the rootfs before `pivot_root`.
    pub mounts: Vec<MountEntry>,
    /// Device nodes created under `/dev`.
    pub devices: Vec<DeviceNode>,
    /// Paths hidden from the container.
    pub masked_paths: Vec<PathBuf>,
    /// Paths remounted read-only.
    pub readonly_paths: Vec<PathBuf>,
}

impl IsolationSpec {
    /// Returns `true` if the spec creates or joins a namespace of `kind`.
    #[must_use]
    pub fn has_namespace(&self, kind: NamespaceKind) -> bool {
        self.namespaces.iter().any(|ns| ns.kind == kind)
    }

    /// Namespaces that must be freshly created by `clone(2)`.
    pub fn new_namespaces(&self) -> impl Iterator<Item = &NamespaceEntry> {
        self.namespaces.iter().filter(|ns| ns.path.is_none())
    }

    /// Namespaces the init process joins by path with `setns(2)`.
    pub fn joined_namespaces(&self) -> impl Iterator<Item = &NamespaceEntry> {
        self.namespaces.iter().filter(|ns| ns.path.is_some())
    }
}

/// Cgroup placement for a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgroupSpec {
    /// Parent group, relative to the cgroup root.
    pub parent: String,
    /// Group name, the container ID.
    pub name: String,
    /// Resource limits written to the group.
    pub limits: ResourceLimits,
}

/// A mount performed relative to the rootfs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    /// Mount source (`proc`, `tmpfs`, or a host path for binds).
    pub source: String,
    /// Absolute destination inside the container.
    pub destination: PathBuf,
    /// Filesystem type.
    pub fstype: String,
    /// Mount flags.
    pub flags: Vec<MountFlag>,
    /// Filesystem-specific options.
    pub data: Option<String>,
}

/// Mount flags the spec can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountFlag {
    /// `MS_NOEXEC`
    NoExec,
    /// `MS_NOSUID`
    NoSuid,
    /// `MS_NODEV`
    NoDev,
    /// `MS_STRICTATIME`
    StrictAtime,
    /// `MS_RDONLY`
    ReadOnly,
    /// `MS_BIND`
    Bind,
    /// `MS_REC`
    Recursive,
}

/// Character device node allowed inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceNode {
    /// Absolute path inside the container.
    pub path: PathBuf,
    /// Device major number.
    pub major: u64,
    /// Device minor number.
    pub minor: u64,
    /// Permission bits of the node.
    pub file_mode: u32,
    /// Owner UID.
    pub uid: u32,
    /// Owner GID.
    pub gid: u32,
}

/// How a container gets its network stack.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkMode {
    /// Share the host network namespace.
    #[default]
    Host,
    /// Create a fresh, empty network namespace (networking attached by CNI).
    New,
    /// Join an existing network namespace, usually a sandbox's.
    Join(PathBuf),
}

/// Tunable parts of the otherwise fixed isolation template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationPolicy {
    /// Network namespace handling.
    pub network: NetworkMode,
    /// Parent cgroup name.
    pub cgroup_parent: String,
    /// Memory ceiling in bytes.
    pub memory_limit_bytes: u64,
}

impl Default for IsolationPolicy {
    fn default() -> Self {
        Self {
            network: NetworkMode::Host,
            cgroup_parent: corral_common::constants::APP_NAME.to_string(),
            memory_limit_bytes: corral_common::constants::DEFAULT_MEMORY_LIMIT_BYTES,
        }
    }
}

/// Capabilities granted to every container.
///
/// `CAP_SYS_ADMIN` and `CAP_NET_ADMIN` are deliberately absent: a container
/// can reconfigure neither its namespaces nor its network, so network
/// attachment is delegated to CNI plugins running on the host.
pub const DEFAULT_CAPABILITIES: [Capability; 14] = [
    Capability::Chown,
    Capability::DacOverride,
    Capability::Fsetid,
    Capability::Fowner,
    Capability::Mknod,
    Capability::NetRaw,
    Capability::Setgid,
    Capability::Setuid,
    Capability::Setfcap,
    Capability::Setpcap,
    Capability::NetBindService,
    Capability::SysChroot,
    Capability::Kill,
    Capability::AuditWrite,
];

/// Files hidden from the container.
pub const MASKED_PATHS: [&str; 1] = ["/proc/kcore"];

/// Kernel interfaces remounted read-only.
pub const READONLY_PATHS: [&str; 4] = ["/proc/sys", "/proc/sysrq-trigger", "/proc/irq", "/proc/bus"];

/// `(path, major, minor)` of every allow-listed character device.
const DEVICES: [(&str, u64, u64); 6] = [
    ("/dev/null", 1, 3),
    ("/dev/zero", 1, 5),
    ("/dev/full", 1, 7),
    ("/dev/tty", 5, 0),
    ("/dev/random", 1, 8),
    ("/dev/urandom", 1, 9),
];

/// World read/write.
const DEVICE_MODE: u32 = 0o666;

/// Builds the isolation spec for a container.
///
/// Mount, UTS, IPC, and PID namespaces are always created. The network
/// namespace follows `policy.network`. This is pure data construction; any
/// problem with the result surfaces when the state store instantiates it.
#[must_use]
pub fn build(id: &ContainerId, rootfs: &Path, policy: &IsolationPolicy) -> IsolationSpec {
    let mut namespaces = vec![
        NamespaceEntry::new(NamespaceKind::Mount),
        NamespaceEntry::new(NamespaceKind::Uts),
        NamespaceEntry::new(NamespaceKind::Ipc),
        NamespaceEntry::new(NamespaceKind::Pid),
    ];
    match &policy.network {
        NetworkMode::Host => {}
        NetworkMode::New => namespaces.push(NamespaceEntry::new(NamespaceKind::Network)),
        NetworkMode::Join(path) => {
            namespaces.push(NamespaceEntry::join(NamespaceKind::Network, path.clone()));
        }
    }

    IsolationSpec {
        rootfs: rootfs.to_path_buf(),
        hostname: id.to_string(),
        namespaces,
        capabilities: CapabilitySet::uniform(&DEFAULT_CAPABILITIES),
        cgroup: CgroupSpec {
            parent: policy.cgroup_parent.clone(),
            name: id.to_string(),
            limits: ResourceLimits {
                memory_bytes: Some(policy.memory_limit_bytes),
            },
        },
        mounts: vec![
            MountEntry {
                source: "proc".into(),
                destination: PathBuf::from("/proc"),
                fstype: "proc".into(),
                flags: vec![MountFlag::NoExec, MountFlag::NoSuid, MountFlag::NoDev],
                data: None,
            },
            MountEntry {
                source: "tmpfs".into(),
                destination: PathBuf::from("/dev"),
                fstype: "tmpfs".into(),
                flags: vec![MountFlag::NoSuid, MountFlag::StrictAtime],
                data: Some("mode=755".into()),
            },
        ],
        devices: DEVICES
            .iter()
            .map(|&(path, major, minor)| DeviceNode {
                path: PathBuf::from(path),
                major,
                minor,
                file_mode: DEVICE_MODE,
                uid: 0,
                gid: 0,
            })
            .collect(),
        masked_paths: MASKED_PATHS.iter().map(PathBuf::from).collect(),
        readonly_paths: READONLY_PATHS.iter().map(PathBuf::from).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with(network: NetworkMode) -> IsolationSpec {
        let policy = IsolationPolicy {
            network,
            ..IsolationPolicy::default()
        };
        build(
            &ContainerId::new("k8s_POD_web_default_abc123"),
            Path::new("/var/lib/corral/containers/x/rootfs"),
            &policy,
        )
    }

    #[test]
    fn base_namespaces_are_always_present() {
        let spec = spec_with(NetworkMode::Host);
        for kind in [
            NamespaceKind::Mount,
            NamespaceKind::Uts,
            NamespaceKind::Ipc,
            NamespaceKind::Pid,
        ] {
            assert!(spec.has_namespace(kind), "{kind:?} missing");
        }
        assert!(!spec.has_namespace(NamespaceKind::Network));
    }

    #[test]
    fn network_mode_controls_network_namespace() {
        let new = spec_with(NetworkMode::New);
        assert!(new.has_namespace(NamespaceKind::Network));
        assert_eq!(new.joined_namespaces().count(), 0);

        let joined = spec_with(NetworkMode::Join(PathBuf::from("/proc/42/ns/net")));
        let entry = joined.joined_namespaces().next().unwrap();
        assert_eq!(entry.kind, NamespaceKind::Network);
        assert_eq!(entry.path.as_deref(), Some(Path::new("/proc/42/ns/net")));
        assert_eq!(joined.new_namespaces().count(), 4);
    }

    #[test]
    fn capability_sets_are_identical_and_exclude_admin_caps() {
        let caps = spec_with(NetworkMode::Host).capabilities;
        for set in [
            &caps.bounding,
            &caps.effective,
            &caps.inheritable,
            &caps.permitted,
            &caps.ambient,
        ] {
            assert_eq!(set.as_slice(), DEFAULT_CAPABILITIES.as_slice());
        }
        assert!(!caps.bounding.contains(&Capability::SysAdmin));
        assert!(!caps.bounding.contains(&Capability::NetAdmin));
    }

    #[test]
    fn cgroup_uses_parent_and_memory_ceiling() {
        let spec = spec_with(NetworkMode::Host);
        assert_eq!(spec.cgroup.parent, "corral");
        assert_eq!(spec.cgroup.name, "k8s_POD_web_default_abc123");
        assert_eq!(spec.cgroup.limits.memory_bytes, Some(64 * 1024 * 1024));
    }

    #[test]
    fn mounts_devices_and_hardening_paths() {
        let spec = spec_with(NetworkMode::Host);
        let proc = &spec.mounts[0];
        assert_eq!(proc.destination, PathBuf::from("/proc"));
        assert_eq!(
            proc.flags,
            vec![MountFlag::NoExec, MountFlag::NoSuid, MountFlag::NoDev]
        );
        let dev = &spec.mounts[1];
        assert_eq!(dev.fstype, "tmpfs");
        assert_eq!(dev.data.as_deref(), Some("mode=755"));

        let names: Vec<_> = spec.devices.iter().map(|d| d.path.clone()).collect();
        assert_eq!(names.len(), 6);
        assert!(names.contains(&PathBuf::from("/dev/urandom")));
        assert!(spec.devices.iter().all(|d| d.file_mode == 0o666));

        assert_eq!(spec.masked_paths, vec![PathBuf::from("/proc/kcore")]);
        assert_eq!(spec.readonly_paths.len(), 4);
        assert_eq!(spec.hostname, "k8s_POD_web_default_abc123");
    }

    #[test]
    fn spec_survives_json() {
        let spec = spec_with(NetworkMode::New);
        let json = serde_json::to_vec(&spec).unwrap();
        let back: IsolationSpec = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, spec);
    }
}
