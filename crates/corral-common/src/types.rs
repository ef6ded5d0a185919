//! Domain primitive types used across the corral workspace.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CorralError, Result};

/// Prefix shared by every ID the runtime derives from Kubernetes metadata.
const ID_PREFIX: &str = "k8s";
/// Marker that distinguishes sandbox IDs from workload container IDs.
const SANDBOX_MARKER: &str = "POD";
/// Field delimiter inside derived IDs.
const DELIMITER: char = '_';
/// Number of hex digits kept from a sandbox ID digest.
const SHORT_ID_LEN: usize = 12;

/// Unique identifier for a container or sandbox instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this ID was derived for a pod sandbox.
    #[must_use]
    pub fn is_sandbox(&self) -> bool {
        self.0
            .strip_prefix(ID_PREFIX)
            .and_then(|rest| rest.strip_prefix(DELIMITER))
            .and_then(|rest| rest.strip_prefix(SANDBOX_MARKER))
            .is_some_and(|rest| rest.starts_with(DELIMITER))
    }

    /// Returns the first twelve hex digits of the SHA-256 of this ID.
    ///
    /// Workload containers embed their sandbox's short ID in their own ID.
    #[must_use]
    pub fn short(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hex[..SHORT_ID_LEN].to_string()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Composite key of a pod sandbox: `(name, namespace, uid)`.
///
/// Formats to `k8s_POD_<name>_<namespace>_<uid>`. Fields may not contain the
/// `_` delimiter, which keeps the mapping reversible. Kubernetes object names
/// and namespaces are DNS labels and UIDs are UUIDs, so none of them can
/// legitimately contain an underscore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxIdentity {
    /// Pod name.
    pub name: String,
    /// Kubernetes namespace.
    pub namespace: String,
    /// Pod UID.
    pub uid: String,
}

impl SandboxIdentity {
    /// Creates a sandbox identity, rejecting fields that would make the
    /// derived ID ambiguous.
    ///
    /// # Errors
    ///
    /// Returns `CorralError::Config` if any field is empty or contains `_`.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        uid: impl Into<String>,
    ) -> Result<Self> {
        let identity = Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: uid.into(),
        };
        for (field, value) in [
            ("name", &identity.name),
            ("namespace", &identity.namespace),
            ("uid", &identity.uid),
        ] {
            validate_field(field, value)?;
        }
        Ok(identity)
    }

    /// Derives the deterministic sandbox container ID.
    #[must_use]
    pub fn container_id(&self) -> ContainerId {
        ContainerId(format!(
            "{ID_PREFIX}{DELIMITER}{SANDBOX_MARKER}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}",
            self.name, self.namespace, self.uid
        ))
    }

    /// Parses a sandbox ID back into its identity.
    ///
    /// Returns `None` for IDs that were not produced by [`Self::container_id`].
    #[must_use]
    pub fn parse(id: &ContainerId) -> Option<Self> {
        let rest = id
            .as_str()
            .strip_prefix(ID_PREFIX)?
            .strip_prefix(DELIMITER)?
            .strip_prefix(SANDBOX_MARKER)?
            .strip_prefix(DELIMITER)?;
        let mut parts = rest.split(DELIMITER);
        let (name, namespace, uid) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        Self::new(name, namespace, uid).ok()
    }
}

/// Identity of a workload container inside a sandbox.
///
/// Formats to `k8s_<name>_<sandbox-short>_<attempt>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadIdentity {
    /// Container name from the CRI metadata.
    pub name: String,
    /// Short ID of the owning sandbox.
    pub sandbox_short: String,
    /// Restart attempt counter.
    pub attempt: u32,
}

impl WorkloadIdentity {
    /// Creates a workload identity owned by the given sandbox.
    ///
    /// # Errors
    ///
    /// Returns `CorralError::Config` if the name is empty or contains `_`.
    pub fn new(name: impl Into<String>, sandbox: &ContainerId, attempt: u32) -> Result<Self> {
        let name = name.into();
        validate_field("container name", &name)?;
        Ok(Self {
            name,
            sandbox_short: sandbox.short(),
            attempt,
        })
    }

    /// Derives the deterministic workload container ID.
    #[must_use]
    pub fn container_id(&self) -> ContainerId {
        ContainerId(format!(
            "{ID_PREFIX}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}",
            self.name, self.sandbox_short, self.attempt
        ))
    }

    /// Parses a workload container ID back into its identity.
    #[must_use]
    pub fn parse(id: &ContainerId) -> Option<Self> {
        if id.is_sandbox() {
            return None;
        }
        let rest = id.as_str().strip_prefix(ID_PREFIX)?.strip_prefix(DELIMITER)?;
        let mut parts = rest.split(DELIMITER);
        let (name, short, attempt) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || name.is_empty() || short.len() != SHORT_ID_LEN {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            sandbox_short: short.to_string(),
            attempt: attempt.parse().ok()?,
        })
    }
}

fn validate_field(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CorralError::Config {
            message: format!("{field} must not be empty"),
        });
    }
    if value.contains(DELIMITER) {
        return Err(CorralError::Config {
            message: format!("{field} '{value}' must not contain '{DELIMITER}'"),
        });
    }
    Ok(())
}

/// SHA-256 hash digest used for image identification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Creates a hash from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        if hex.len() != crate::constants::SHA256_HEX_LENGTH
            || !hex.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(CorralError::Config {
                message: format!("invalid SHA-256 hex string: {hex}"),
            });
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Returns the hex-encoded hash string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// Resource limits for a container cgroup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling in bytes (`memory.max`).
    pub memory_bytes: Option<u64>,
}

/// Lifecycle state of a container or sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// State exists on disk but no process was ever started.
    Created,
    /// The init process is alive.
    Running,
    /// The init process was started and has exited.
    Stopped,
    /// State could not be determined.
    Unknown,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.pad("created"),
            Self::Running => f.pad("running"),
            Self::Stopped => f.pad("stopped"),
            Self::Unknown => f.pad("unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_id_has_expected_format() {
        let identity = SandboxIdentity::new("web", "default", "abc123").unwrap();
        assert_eq!(identity.container_id().as_str(), "k8s_POD_web_default_abc123");
    }

    #[test]
    fn sandbox_id_parses_back() {
        let cases = [
            ("web", "default", "abc123"),
            ("nginx-7d9f", "kube-system", "0f8c2a4e-1b7d-4c1e-9a55-6f7e3d2c1b0a"),
            ("a", "b", "c"),
        ];
        for (name, ns, uid) in cases {
            let identity = SandboxIdentity::new(name, ns, uid).unwrap();
            let parsed = SandboxIdentity::parse(&identity.container_id()).unwrap();
            assert_eq!(parsed, identity);
        }
    }

    #[test]
    fn sandbox_fields_with_delimiter_are_rejected() {
        assert!(SandboxIdentity::new("my_pod", "default", "1").is_err());
        assert!(SandboxIdentity::new("pod", "", "1").is_err());
    }

    #[test]
    fn parse_rejects_foreign_ids() {
        assert!(SandboxIdentity::parse(&ContainerId::new("busybox")).is_none());
        assert!(SandboxIdentity::parse(&ContainerId::new("k8s_POD_a_b")).is_none());
        assert!(SandboxIdentity::parse(&ContainerId::new("k8s_POD_a_b_c_d")).is_none());
    }

    #[test]
    fn sandbox_detection_distinguishes_workloads() {
        let sandbox = SandboxIdentity::new("web", "default", "abc123")
            .unwrap()
            .container_id();
        let workload = WorkloadIdentity::new("app", &sandbox, 0)
            .unwrap()
            .container_id();
        assert!(sandbox.is_sandbox());
        assert!(!workload.is_sandbox());
        assert!(!ContainerId::new("k8s_PODX_a").is_sandbox());
    }

    #[test]
    fn workload_id_embeds_sandbox_short_id() {
        let sandbox = ContainerId::new("k8s_POD_web_default_abc123");
        let identity = WorkloadIdentity::new("app", &sandbox, 2).unwrap();
        let id = identity.container_id();
        assert_eq!(id.as_str(), format!("k8s_app_{}_2", sandbox.short()));
        assert_eq!(WorkloadIdentity::parse(&id).unwrap(), identity);
    }

    #[test]
    fn short_id_is_stable_and_twelve_hex_digits() {
        let id = ContainerId::new("k8s_POD_web_default_abc123");
        assert_eq!(id.short(), id.short());
        assert_eq!(id.short().len(), 12);
        assert!(id.short().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sha256_from_hex_validates_length() {
        assert!(Sha256Hash::from_hex("abc").is_err());
        let hash = Sha256Hash::from_hex("a".repeat(64)).unwrap();
        assert_eq!(hash.to_string(), format!("sha256:{}", "a".repeat(64)));
    }

    #[test]
    fn container_state_serializes_lowercase() {
        let json = serde_json::to_string(&ContainerState::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
