//! System-wide constants and default paths.

/// Application name; also names the parent cgroup and the default roots.
pub const APP_NAME: &str = "corral";

/// Runtime version reported to CRI callers.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CRI API version implemented by the backends.
pub const CRI_API_VERSION: &str = "v1";

/// Default directory for extracted container root filesystems.
pub const DEFAULT_DATA_ROOT: &str = "/var/lib/corral";

/// Default directory for per-container state records.
pub const DEFAULT_STATE_ROOT: &str = "/run/corral";

/// Cgroups v2 unified hierarchy mount point.
pub const CGROUP_V2_PATH: &str = "/sys/fs/cgroup";

/// Default location of the flattened image archive used for every rootfs.
pub const DEFAULT_IMAGE_ARCHIVE: &str = "/var/lib/corral/images/rootfs.tar";

/// Infrastructure image the sandbox container nominally runs.
pub const DEFAULT_SANDBOX_IMAGE: &str = "registry.k8s.io/pause:3.9";

/// Default memory ceiling for every container cgroup (64 MiB).
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 64 * 1024 * 1024;

/// Default search directory for CNI plugin binaries.
pub const DEFAULT_CNI_BIN_DIR: &str = "/opt/cni/bin";

/// Default directory holding CNI network configuration files.
pub const DEFAULT_CNI_CONF_DIR: &str = "/etc/cni/net.d";

/// Default directory where CNI results are cached between ADD and DEL.
pub const DEFAULT_CNI_CACHE_DIR: &str = "/var/lib/cni";

/// Interface name requested from CNI plugins inside the pod.
pub const POD_INTERFACE_NAME: &str = "eth0";

/// Default container engine binary driven by the shell-out backend.
pub const DEFAULT_SHELL_BINARY: &str = "docker";

/// Reserved first argument that switches the executable into the init role.
pub const INIT_ARG: &str = "init";

/// `PATH` given to container processes that do not set one.
pub const DEFAULT_PATH_ENV: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;
