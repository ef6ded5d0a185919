//! Request and response shapes of the container runtime interface.
//!
//! These mirror the CRI messages the backends serve, reduced to the fields
//! the runtime acts on. Field names follow the CRI's JSON form so sandbox
//! and container configs can be read from the same files `crictl` uses.

use std::collections::BTreeMap;
use std::path::PathBuf;

use corral_common::types::ContainerState;
use serde::{Deserialize, Serialize};

/// Identity of a pod sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodSandboxMetadata {
    /// Pod name.
    pub name: String,
    /// Pod namespace.
    pub namespace: String,
    /// Pod UID.
    pub uid: String,
    /// Restart attempt.
    pub attempt: u32,
}

/// Request to run a pod sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodSandboxConfig {
    /// Sandbox identity.
    pub metadata: PodSandboxMetadata,
    /// Hostname inside the pod; the sandbox ID when empty.
    pub hostname: String,
    /// Directory container log paths are relative to.
    pub log_directory: Option<PathBuf>,
    /// Labels used for filtering.
    pub labels: BTreeMap<String, String>,
    /// Opaque annotations.
    pub annotations: BTreeMap<String, String>,
}

/// Readiness of a pod sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxState {
    /// The infrastructure process is running.
    SandboxReady,
    /// The sandbox exists but its process is gone or never ran.
    SandboxNotready,
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SandboxReady => f.pad("ready"),
            Self::SandboxNotready => f.pad("notready"),
        }
    }
}

/// Entry returned by sandbox listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSandbox {
    /// Sandbox ID.
    pub id: String,
    /// Sandbox identity.
    pub metadata: PodSandboxMetadata,
    /// Readiness.
    pub state: SandboxState,
    /// Creation time in nanoseconds since the epoch.
    pub created_at: i64,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    pub annotations: BTreeMap<String, String>,
}

/// Detailed sandbox status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSandboxStatus {
    /// Sandbox ID.
    pub id: String,
    /// Sandbox identity.
    pub metadata: PodSandboxMetadata,
    /// Readiness.
    pub state: SandboxState,
    /// Creation time in nanoseconds since the epoch.
    pub created_at: i64,
    /// Pod IP assigned by the network plugins.
    pub ip: Option<String>,
    /// Network namespace of the running sandbox.
    pub network_namespace: Option<PathBuf>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    pub annotations: BTreeMap<String, String>,
}

/// Sandbox list filter. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodSandboxFilter {
    /// ID or ID prefix.
    pub id: Option<String>,
    /// Required readiness.
    pub state: Option<SandboxState>,
    /// Labels that must all be present with these values.
    pub label_selector: BTreeMap<String, String>,
}

impl PodSandboxFilter {
    /// Returns `true` if `sandbox` passes the filter.
    #[must_use]
    pub fn matches(&self, sandbox: &PodSandbox) -> bool {
        self.id.as_ref().is_none_or(|id| sandbox.id.starts_with(id.as_str()))
            && self.state.is_none_or(|s| s == sandbox.state)
            && labels_match(&self.label_selector, &sandbox.labels)
    }
}

/// Identity of a workload container within its sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerMetadata {
    /// Container name.
    pub name: String,
    /// Restart attempt.
    pub attempt: u32,
}

/// Image reference in a container request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSpec {
    /// Image reference.
    pub image: String,
}

/// Environment variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyValue {
    /// Variable name.
    pub key: String,
    /// Variable value.
    pub value: String,
}

/// Request to create a workload container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Container identity.
    pub metadata: ContainerMetadata,
    /// Image to run.
    pub image: ImageSpec,
    /// Entrypoint.
    pub command: Vec<String>,
    /// Arguments appended to the entrypoint.
    pub args: Vec<String>,
    /// Environment.
    pub envs: Vec<KeyValue>,
    /// Working directory; `/` when empty.
    pub working_dir: String,
    /// Log file relative to the sandbox's log directory.
    pub log_path: String,
    /// Labels used for filtering.
    pub labels: BTreeMap<String, String>,
    /// Opaque annotations.
    pub annotations: BTreeMap<String, String>,
}

/// Entry returned by container listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Container ID.
    pub id: String,
    /// Owning sandbox ID.
    pub pod_sandbox_id: String,
    /// Container identity.
    pub metadata: ContainerMetadata,
    /// Image reference.
    pub image: String,
    /// Lifecycle state.
    pub state: ContainerState,
    /// Creation time in nanoseconds since the epoch.
    pub created_at: i64,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    pub annotations: BTreeMap<String, String>,
}

/// Detailed container status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Container ID.
    pub id: String,
    /// Container identity.
    pub metadata: ContainerMetadata,
    /// Lifecycle state.
    pub state: ContainerState,
    /// Creation time in nanoseconds since the epoch.
    pub created_at: i64,
    /// Start time in nanoseconds, zero if never started.
    pub started_at: i64,
    /// Exit time in nanoseconds, zero while running.
    pub finished_at: i64,
    /// Exit code once stopped.
    pub exit_code: Option<i32>,
    /// Image reference.
    pub image: String,
    /// Host path of the log file.
    pub log_path: Option<PathBuf>,
    /// Host PID of the init process while running.
    pub pid: Option<i32>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    pub annotations: BTreeMap<String, String>,
}

/// Container list filter. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerFilter {
    /// ID or ID prefix.
    pub id: Option<String>,
    /// Required lifecycle state.
    pub state: Option<ContainerState>,
    /// Owning sandbox ID.
    pub pod_sandbox_id: Option<String>,
    /// Labels that must all be present with these values.
    pub label_selector: BTreeMap<String, String>,
}

impl ContainerFilter {
    /// Returns `true` if `container` passes the filter.
    #[must_use]
    pub fn matches(&self, container: &Container) -> bool {
        self.id.as_ref().is_none_or(|id| container.id.starts_with(id.as_str()))
            && self.state.is_none_or(|s| s == container.state)
            && self
                .pod_sandbox_id
                .as_ref()
                .is_none_or(|sb| &container.pod_sandbox_id == sb)
            && labels_match(&self.label_selector, &container.labels)
    }
}

fn labels_match(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}
