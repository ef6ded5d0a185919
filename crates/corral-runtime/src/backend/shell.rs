//! Backend that delegates to a container engine's command-line tool.
//!
//! No isolation logic lives here: every operation is one invocation of the
//! engine binary (`docker` by default). Containers are named with the same
//! derived IDs the native backend uses, so the name doubles as the ID.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use corral_common::context::OpContext;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ContainerState, SandboxIdentity, WorkloadIdentity};
use corral_core::namespace::network::netns_path;
use corral_image::source::ImageInfo;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use super::RuntimeBackend;
use crate::cri::{
    Container, ContainerConfig, ContainerFilter, ContainerMetadata, ContainerStatus, PodSandbox,
    PodSandboxConfig, PodSandboxFilter, PodSandboxMetadata, PodSandboxStatus, SandboxState,
};

/// Grace period the engine gives a sandbox before killing it.
const SANDBOX_STOP_TIMEOUT_SECS: u64 = 10;
/// How often a running engine command is checked for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// `ps` output template: ID, name, image, state.
const PS_FORMAT: &str = "{{.ID}}|{{.Names}}|{{.Image}}|{{.State}}";
/// `inspect` template for container status.
const STATUS_FORMAT: &str = "{{.Created}}|{{.State.Status}}|{{.State.Pid}}|{{.State.ExitCode}}|{{.Config.Image}}";

/// Runtime backend wrapping a container engine CLI.
#[derive(Debug, Clone)]
pub struct ShellBackend {
    binary: PathBuf,
    sandbox_image: String,
}

impl ShellBackend {
    /// Creates a backend invoking `binary`.
    #[must_use]
    pub fn new(binary: &Path) -> Self {
        Self {
            binary: binary.to_path_buf(),
            sandbox_image: corral_common::constants::DEFAULT_SANDBOX_IMAGE.to_string(),
        }
    }

    /// Replaces the infrastructure image sandboxes are started from.
    #[must_use]
    pub fn with_sandbox_image(mut self, image: impl Into<String>) -> Self {
        self.sandbox_image = image.into();
        self
    }

    fn tool(&self) -> String {
        self.binary
            .file_name()
            .map_or_else(|| self.binary.display().to_string(), |n| n.to_string_lossy().into_owned())
    }

    /// Runs the engine and returns its trimmed stdout.
    fn exec(&self, ctx: &OpContext, operation: &'static str, args: &[String]) -> Result<String> {
        ctx.check(operation)?;
        tracing::info!(tool = %self.tool(), args = %args.join(" "), "running engine command");
        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CorralError::ExternalTool {
                tool: self.tool(),
                message: e.to_string(),
            })?;
        let pid = i32::try_from(child.id()).map_err(|e| CorralError::kernel("spawn", e))?;

        let (tx, rx) = mpsc::channel();
        let _ = std::thread::spawn(move || {
            let _ = tx.send(child.wait_with_output());
        });
        let output: Output = loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(result) => {
                    break result.map_err(|e| CorralError::ExternalTool {
                        tool: self.tool(),
                        message: e.to_string(),
                    })?;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if ctx.is_done() {
                        let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
                        return Err(CorralError::Cancelled { operation });
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CorralError::ExternalTool {
                        tool: self.tool(),
                        message: "engine command vanished".into(),
                    });
                }
            }
        };

        if !output.status.success() {
            let mut message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if message.is_empty() {
                message = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            return Err(CorralError::ExternalTool {
                tool: self.tool(),
                message: format!("{operation} ({}): {message}", output.status),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn inspect(&self, ctx: &OpContext, operation: &'static str, id: &ContainerId, format: &str) -> Result<String> {
        self.exec(ctx, operation, &strings(&["inspect", "-f", format, id.as_str()]))
            .map_err(|e| not_found_or(e, "container", id.as_str()))
    }

    fn ps(&self, ctx: &OpContext) -> Result<Vec<PsEntry>> {
        let out = self.exec(ctx, "list containers", &strings(&["ps", "-a", "--format", PS_FORMAT]))?;
        Ok(out.lines().filter_map(PsEntry::parse).collect())
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

/// Turns the engine's "No such ..." failures into `NotFound`.
fn not_found_or(err: CorralError, kind: &'static str, id: &str) -> CorralError {
    let missing = matches!(&err, CorralError::ExternalTool { message, .. } if message.contains("No such"));
    if missing {
        CorralError::NotFound {
            kind,
            id: id.to_string(),
        }
    } else {
        err
    }
}

/// Arguments for starting a sandbox's infrastructure container.
fn sandbox_run_args(id: &ContainerId, image: &str) -> Vec<String> {
    vec![
        "run".into(),
        "-d".into(),
        "--name".into(),
        id.to_string(),
        "--net=none".into(),
        image.into(),
    ]
}

/// Arguments for creating a workload container in a sandbox's network.
fn create_args(id: &ContainerId, sandbox_id: &ContainerId, config: &ContainerConfig) -> Vec<String> {
    let mut args = vec![
        "create".into(),
        "--name".into(),
        id.to_string(),
        format!("--net=container:{sandbox_id}"),
    ];
    for kv in &config.envs {
        args.push("-e".into());
        args.push(format!("{}={}", kv.key, kv.value));
    }
    if !config.working_dir.is_empty() {
        args.push("-w".into());
        args.push(config.working_dir.clone());
    }
    if let Some(entrypoint) = config.command.first() {
        args.push("--entrypoint".into());
        args.push(entrypoint.clone());
    }
    args.push(config.image.image.clone());
    args.extend(config.command.iter().skip(1).cloned());
    args.extend(config.args.iter().cloned());
    args
}

/// Maps the engine's state words onto lifecycle states.
fn parse_state(raw: &str) -> ContainerState {
    match raw.trim() {
        "running" | "restarting" | "paused" => ContainerState::Running,
        "created" => ContainerState::Created,
        "exited" | "dead" | "removing" => ContainerState::Stopped,
        _ => ContainerState::Unknown,
    }
}

/// Parses an RFC 3339 timestamp into nanoseconds since the epoch.
fn parse_created(raw: &str) -> Result<i64> {
    let parsed = chrono::DateTime::parse_from_rfc3339(raw.trim()).map_err(|e| CorralError::ExternalTool {
        tool: "inspect".into(),
        message: format!("bad timestamp '{}': {e}", raw.trim()),
    })?;
    Ok(parsed.timestamp_nanos_opt().unwrap_or_default())
}

/// One line of `ps` output.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PsEntry {
    name: String,
    image: String,
    state: ContainerState,
}

impl PsEntry {
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim().split('|');
        let (_id, name, image, state) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            image: image.to_string(),
            state: parse_state(state),
        })
    }
}

/// Parsed `STATUS_FORMAT` output.
struct Inspected {
    created_at: i64,
    state: ContainerState,
    pid: Option<i32>,
    exit_code: Option<i32>,
    image: String,
}

fn parse_inspect(raw: &str) -> Result<Inspected> {
    let malformed = || CorralError::ExternalTool {
        tool: "inspect".into(),
        message: format!("unexpected inspect output '{raw}'"),
    };
    let parts: Vec<&str> = raw.trim().split('|').collect();
    let [created, state, pid, exit_code, image] = parts.as_slice() else {
        return Err(malformed());
    };
    let state = parse_state(state);
    let pid: i32 = pid.parse().map_err(|_| malformed())?;
    let exit_code: i32 = exit_code.parse().map_err(|_| malformed())?;
    Ok(Inspected {
        created_at: parse_created(created)?,
        state,
        pid: (pid > 0).then_some(pid),
        exit_code: (state == ContainerState::Stopped).then_some(exit_code),
        image: (*image).to_string(),
    })
}

fn sandbox_metadata(id: &ContainerId) -> PodSandboxMetadata {
    SandboxIdentity::parse(id).map_or_else(
        || PodSandboxMetadata {
            name: id.to_string(),
            ..PodSandboxMetadata::default()
        },
        |identity| PodSandboxMetadata {
            name: identity.name,
            namespace: identity.namespace,
            uid: identity.uid,
            attempt: 0,
        },
    )
}

fn container_metadata(id: &ContainerId) -> ContainerMetadata {
    WorkloadIdentity::parse(id).map_or_else(
        || ContainerMetadata {
            name: id.to_string(),
            attempt: 0,
        },
        |identity| ContainerMetadata {
            name: identity.name,
            attempt: identity.attempt,
        },
    )
}

const fn sandbox_state(state: ContainerState) -> SandboxState {
    match state {
        ContainerState::Running => SandboxState::SandboxReady,
        _ => SandboxState::SandboxNotready,
    }
}

impl RuntimeBackend for ShellBackend {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn pull_image(&self, ctx: &OpContext, image: &str) -> Result<String> {
        let _ = self.exec(ctx, "pull image", &strings(&["pull", image]))?;
        Ok(image.to_string())
    }

    fn list_images(&self, _ctx: &OpContext) -> Result<Vec<ImageInfo>> {
        Err(CorralError::Unsupported {
            operation: "list images",
            backend: "shell",
        })
    }

    fn image_status(&self, ctx: &OpContext, image: &str) -> Result<Option<ImageInfo>> {
        let out = match self.exec(
            ctx,
            "image status",
            &strings(&["inspect", "--type=image", "-f", "{{.Id}}|{{.Size}}", image]),
        ) {
            Ok(out) => out,
            Err(CorralError::ExternalTool { message, .. }) if message.contains("No such") => return Ok(None),
            Err(e) => return Err(e),
        };
        let (id, size) = out.split_once('|').unwrap_or((out.as_str(), "0"));
        Ok(Some(ImageInfo {
            id: id.to_string(),
            repo_tags: vec![image.to_string()],
            size_bytes: size.trim().parse().unwrap_or_default(),
        }))
    }

    fn run_pod_sandbox(&self, ctx: &OpContext, config: &PodSandboxConfig) -> Result<ContainerId> {
        let md = &config.metadata;
        let id = SandboxIdentity::new(&md.name, &md.namespace, &md.uid)?.container_id();
        let _ = self.exec(ctx, "run pod sandbox", &sandbox_run_args(&id, &self.sandbox_image))?;
        tracing::info!(id = %id, "pod sandbox started by engine");
        Ok(id)
    }

    fn stop_pod_sandbox(&self, ctx: &OpContext, id: &ContainerId) -> Result<()> {
        self.stop_container(ctx, id, Duration::from_secs(SANDBOX_STOP_TIMEOUT_SECS))
    }

    fn remove_pod_sandbox(&self, ctx: &OpContext, id: &ContainerId) -> Result<()> {
        self.remove_container(ctx, id)
    }

    fn pod_sandbox_status(&self, ctx: &OpContext, id: &ContainerId) -> Result<PodSandboxStatus> {
        let inspected = parse_inspect(&self.inspect(ctx, "pod sandbox status", id, STATUS_FORMAT)?)?;
        Ok(PodSandboxStatus {
            id: id.to_string(),
            metadata: sandbox_metadata(id),
            state: sandbox_state(inspected.state),
            created_at: inspected.created_at,
            ip: None,
            network_namespace: inspected.pid.map(netns_path),
            labels: std::collections::BTreeMap::new(),
            annotations: std::collections::BTreeMap::new(),
        })
    }

    fn list_pod_sandbox(&self, ctx: &OpContext, filter: &PodSandboxFilter) -> Result<Vec<PodSandbox>> {
        Ok(self
            .ps(ctx)?
            .into_iter()
            .filter_map(|entry| {
                let id = ContainerId::new(entry.name);
                id.is_sandbox().then(|| PodSandbox {
                    metadata: sandbox_metadata(&id),
                    id: id.to_string(),
                    state: sandbox_state(entry.state),
                    created_at: 0,
                    labels: std::collections::BTreeMap::new(),
                    annotations: std::collections::BTreeMap::new(),
                })
            })
            .filter(|sandbox| filter.matches(sandbox))
            .collect())
    }

    fn create_container(
        &self,
        ctx: &OpContext,
        sandbox_id: &ContainerId,
        config: &ContainerConfig,
        _sandbox_config: &PodSandboxConfig,
    ) -> Result<ContainerId> {
        let id = WorkloadIdentity::new(&config.metadata.name, sandbox_id, config.metadata.attempt)?
            .container_id();
        let _ = self.exec(ctx, "create container", &create_args(&id, sandbox_id, config))?;
        Ok(id)
    }

    fn start_container(&self, ctx: &OpContext, id: &ContainerId) -> Result<()> {
        let _ = self
            .exec(ctx, "start container", &strings(&["start", id.as_str()]))
            .map_err(|e| not_found_or(e, "container", id.as_str()))?;
        Ok(())
    }

    fn stop_container(&self, ctx: &OpContext, id: &ContainerId, timeout: Duration) -> Result<()> {
        let secs = timeout.as_secs().to_string();
        let _ = self
            .exec(ctx, "stop container", &strings(&["stop", "-t", &secs, id.as_str()]))
            .map_err(|e| not_found_or(e, "container", id.as_str()))?;
        Ok(())
    }

    fn remove_container(&self, ctx: &OpContext, id: &ContainerId) -> Result<()> {
        match self
            .exec(ctx, "remove container", &strings(&["rm", "-f", id.as_str()]))
            .map_err(|e| not_found_or(e, "container", id.as_str()))
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn container_status(&self, ctx: &OpContext, id: &ContainerId) -> Result<ContainerStatus> {
        let inspected = parse_inspect(&self.inspect(ctx, "container status", id, STATUS_FORMAT)?)?;
        Ok(ContainerStatus {
            id: id.to_string(),
            metadata: container_metadata(id),
            state: inspected.state,
            created_at: inspected.created_at,
            started_at: 0,
            finished_at: 0,
            exit_code: inspected.exit_code,
            image: inspected.image,
            log_path: None,
            pid: inspected.pid,
            labels: std::collections::BTreeMap::new(),
            annotations: std::collections::BTreeMap::new(),
        })
    }

    fn list_containers(&self, ctx: &OpContext, filter: &ContainerFilter) -> Result<Vec<Container>> {
        Ok(self
            .ps(ctx)?
            .into_iter()
            .filter_map(|entry| {
                let id = ContainerId::new(entry.name);
                (!id.is_sandbox()).then(|| Container {
                    metadata: container_metadata(&id),
                    id: id.to_string(),
                    pod_sandbox_id: String::new(),
                    image: entry.image,
                    state: entry.state,
                    created_at: 0,
                    labels: std::collections::BTreeMap::new(),
                    annotations: std::collections::BTreeMap::new(),
                })
            })
            .filter(|container| filter.matches(container))
            .collect())
    }

    fn container_created_at(&self, ctx: &OpContext, id: &ContainerId) -> Result<i64> {
        parse_created(&self.inspect(ctx, "container created at", id, "{{.Created}}")?)
    }

    fn network_namespace(&self, ctx: &OpContext, id: &ContainerId) -> Result<Option<PathBuf>> {
        let raw = self.inspect(ctx, "network namespace", id, "{{.State.Pid}}")?;
        let pid: i32 = raw.parse().map_err(|_| CorralError::ExternalTool {
            tool: self.tool(),
            message: format!("unexpected pid '{raw}'"),
        })?;
        // A stopped container reports pid 0.
        Ok((pid > 0).then(|| netns_path(pid)))
    }
}
