//! The native backend: pod sandboxes and containers built from kernel
//! primitives.
//!
//! Each container, sandbox or workload, gets:
//!
//! - a rootfs at `<data_root>/containers/<id>/rootfs` unpacked from the
//!   image archive,
//! - a state directory holding its spec, process bookkeeping, a
//!   [`Record`] in `metadata.json`, and for sandboxes the CNI result in
//!   `network.json` while attached.
//!
//! Networking is attached only after the sandbox init process exists and
//! torn down before it is killed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use corral_common::config::RuntimeConfig;
use corral_common::constants;
use corral_common::context::OpContext;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ContainerState, SandboxIdentity, WorkloadIdentity};
use corral_core::namespace::network::netns_path;
use corral_core::spec::{self, IsolationPolicy, IsolationSpec, NetworkMode};
use corral_image::rootfs;
use corral_image::source::{ImageInfo, LocalImageSource};
use corral_network::exec::RuntimeConf;
use corral_network::manager::CniManager;
use corral_network::result::CniResult;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use super::RuntimeBackend;
use crate::cri::{
    Container, ContainerConfig, ContainerFilter, ContainerStatus, PodSandbox, PodSandboxConfig,
    PodSandboxFilter, PodSandboxStatus, SandboxState,
};
use crate::launcher::Launcher;
use crate::logs;
use crate::process::{IoBinding, ProcessSpec};
use crate::state::{ContainerHandle, Factory};

/// Backend metadata record.
pub const METADATA_FILE: &str = "metadata.json";
/// Cached CNI result of an attached sandbox.
pub const NETWORK_FILE: &str = "network.json";

/// How long to wait for processes to die after `SIGKILL`.
const KILL_WAIT: Duration = Duration::from_secs(5);
/// Liveness polling interval while stopping.
const STOP_POLL: Duration = Duration::from_millis(20);

/// What the backend remembers about a container beyond its spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    /// A pod sandbox.
    Sandbox {
        /// Request the sandbox was created from.
        config: PodSandboxConfig,
        /// Infrastructure image reference.
        image: String,
        /// Creation time in nanoseconds.
        created_at: i64,
    },
    /// A workload container.
    Container {
        /// Owning sandbox.
        sandbox_id: ContainerId,
        /// Request the container was created from.
        config: ContainerConfig,
        /// Host log file, when the sandbox has a log directory.
        log_file: Option<PathBuf>,
        /// Creation time in nanoseconds.
        created_at: i64,
    },
}

impl Record {
    const fn created_at(&self) -> i64 {
        match self {
            Self::Sandbox { created_at, .. } | Self::Container { created_at, .. } => *created_at,
        }
    }
}

/// Runtime backend driving namespaces, cgroups, and CNI plugins directly.
#[derive(Debug)]
pub struct NativeBackend {
    config: RuntimeConfig,
    factory: Factory,
    images: LocalImageSource,
    cni: Option<CniManager>,
}

impl NativeBackend {
    /// Creates a backend that re-executes the running binary as container
    /// init.
    ///
    /// # Errors
    ///
    /// Returns an error if the running executable cannot be located.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let factory = Factory::with_reexec(&config.state_root, &config.cgroup_root)?;
        Ok(Self::from_parts(config, factory))
    }

    /// Creates a backend that starts processes with `launcher`.
    #[must_use]
    pub fn with_launcher(config: RuntimeConfig, launcher: Arc<dyn Launcher>) -> Self {
        let factory = Factory::new(&config.state_root, &config.cgroup_root, launcher);
        Self::from_parts(config, factory)
    }

    fn from_parts(config: RuntimeConfig, factory: Factory) -> Self {
        // Plugins need a namespace to attach to.
        let cni = (config.cni.enabled && config.network_namespace)
            .then(|| CniManager::from_settings(&config.cni));
        Self {
            images: LocalImageSource::new(&config.image_archive),
            factory,
            cni,
            config,
        }
    }

    /// The state store behind this backend.
    #[must_use]
    pub const fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Directory holding a container's rootfs.
    #[must_use]
    pub fn container_dir(&self, id: &ContainerId) -> PathBuf {
        self.config.data_root.join("containers").join(id.as_str())
    }

    fn policy(&self, network: NetworkMode) -> IsolationPolicy {
        IsolationPolicy {
            network,
            cgroup_parent: self.config.cgroup_parent.clone(),
            memory_limit_bytes: self.config.memory_limit_bytes,
        }
    }

    fn network_mode(&self) -> NetworkMode {
        if self.config.network_namespace {
            NetworkMode::New
        } else {
            NetworkMode::Host
        }
    }

    /// Unpacks a fresh rootfs for `id`, replacing any previous tree.
    fn provision(&self, ctx: &OpContext, id: &ContainerId) -> Result<PathBuf> {
        ctx.check("provision rootfs")?;
        remove_tree(&self.container_dir(id))?;
        let target = self.container_dir(id).join("rootfs");
        let summary = rootfs::extract(ctx, self.images.archive(), &target)?;
        tracing::info!(id = %id, files = summary.files, skipped = summary.skipped, "rootfs provisioned");
        Ok(target)
    }

    /// Kills anything left from an earlier container with this ID and
    /// deletes its state and rootfs.
    fn purge(&self, id: &ContainerId) -> Result<()> {
        match self.factory.load(id) {
            Ok(mut stale) => {
                tracing::warn!(id = %id, "purging stale container state");
                stale.destroy()?;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.factory.remove_state(id)?;
        remove_tree(&self.container_dir(id))
    }

    fn record(&self, id: &ContainerId) -> Result<Record> {
        self.factory
            .load_metadata(id, METADATA_FILE)?
            .ok_or_else(|| CorralError::NotFound {
                kind: "container metadata",
                id: id.to_string(),
            })
    }

    fn sandbox_record(&self, id: &ContainerId) -> Result<(PodSandboxConfig, i64)> {
        match self.record(id) {
            Ok(Record::Sandbox {
                config, created_at, ..
            }) => Ok((config, created_at)),
            Ok(Record::Container { .. }) => Err(CorralError::NotFound {
                kind: "sandbox",
                id: id.to_string(),
            }),
            Err(e) if e.is_not_found() => Err(CorralError::NotFound {
                kind: "sandbox",
                id: id.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Records of every container with backend metadata.
    fn records(&self) -> Result<Vec<(ContainerId, Record)>> {
        let mut out = Vec::new();
        for id in self.factory.list_ids()? {
            match self.factory.load_metadata::<Record>(&id, METADATA_FILE) {
                Ok(Some(record)) => out.push((id, record)),
                Ok(None) => tracing::debug!(id = %id, "state without metadata skipped"),
                Err(e) => tracing::warn!(id = %id, error = %e, "unreadable metadata skipped"),
            }
        }
        Ok(out)
    }

    fn containers_of(&self, sandbox: &ContainerId) -> Result<Vec<ContainerId>> {
        Ok(self
            .records()?
            .into_iter()
            .filter_map(|(id, record)| match record {
                Record::Container { sandbox_id, .. } if &sandbox_id == sandbox => Some(id),
                _ => None,
            })
            .collect())
    }

    fn network_conf(id: &ContainerId, config: &PodSandboxConfig, netns: PathBuf) -> RuntimeConf {
        RuntimeConf::new(id.as_str(), netns)
            .with_arg("IgnoreUnknown", "1")
            .with_arg("K8S_POD_NAMESPACE", config.metadata.namespace.as_str())
            .with_arg("K8S_POD_NAME", config.metadata.name.as_str())
            .with_arg("K8S_POD_INFRA_CONTAINER_ID", id.as_str())
    }

    fn attach_network(&self, ctx: &OpContext, id: &ContainerId, config: &PodSandboxConfig, pid: i32) -> Result<()> {
        let Some(cni) = &self.cni else {
            return Ok(());
        };
        let rt = Self::network_conf(id, config, netns_path(pid));
        let result = cni.set_up(ctx, &rt)?;
        tracing::info!(id = %id, ip = ?result.primary_ip(), "sandbox network attached");
        self.factory.save_metadata(id, NETWORK_FILE, &result)
    }

    /// Detaches a sandbox's network. Plugin failures are logged; bookkeeping
    /// errors are returned for the caller to log.
    fn detach_network(&self, ctx: &OpContext, id: &ContainerId, handle: &mut ContainerHandle) -> Result<()> {
        let Some(cni) = &self.cni else {
            return Ok(());
        };
        let live_pid = handle.state()?.live_pid();
        let attached = self
            .factory
            .load_metadata::<CniResult>(id, NETWORK_FILE)?
            .is_some();
        if live_pid.is_none() && !attached {
            return Ok(());
        }
        let (config, _) = self.sandbox_record(id)?;
        // A dead sandbox has no namespace left; plugins still release their
        // allocations on DEL with an empty path.
        let netns = live_pid.map(netns_path).unwrap_or_default();
        match cni.tear_down(ctx, &Self::network_conf(id, &config, netns)) {
            Ok(()) => tracing::info!(id = %id, "sandbox network detached"),
            Err(e) => tracing::warn!(id = %id, error = %e, "network teardown failed"),
        }
        self.factory.remove_metadata(id, NETWORK_FILE)
    }

    /// Polls until the container has stopped. Returns `false` on timeout or
    /// cancellation.
    fn wait_stopped(ctx: &OpContext, handle: &mut ContainerHandle, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if handle.state()?.status() != ContainerState::Running {
                return Ok(true);
            }
            if Instant::now() >= deadline || ctx.is_done() {
                return Ok(false);
            }
            std::thread::sleep(STOP_POLL);
        }
    }

    fn kill(ctx: &OpContext, handle: &mut ContainerHandle) -> Result<()> {
        handle.signal(Signal::SIGKILL, true)?;
        if !Self::wait_stopped(ctx, handle, KILL_WAIT)? {
            tracing::warn!(id = %handle.id(), "process still alive after SIGKILL");
        }
        Ok(())
    }

    /// Runs `step`, removing everything `id` left behind if it fails.
    fn discard_on_error<T>(&self, id: &ContainerId, step: impl FnOnce() -> Result<T>) -> Result<T> {
        step().inspect_err(|e| {
            tracing::warn!(id = %id, error = %e, "discarding partially created container");
            if let Err(cleanup) = self.remove_one(id) {
                tracing::warn!(id = %id, error = %cleanup, "cleanup failed");
            }
        })
    }

    /// Destroys a container's kernel objects and deletes its state and rootfs.
    fn remove_one(&self, id: &ContainerId) -> Result<()> {
        match self.factory.load(id) {
            Ok(mut handle) => handle.destroy()?,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.factory.remove_state(id)?;
        remove_tree(&self.container_dir(id))?;
        tracing::info!(id = %id, "container removed");
        Ok(())
    }

    fn process_for(config: &ContainerConfig, log_file: Option<&Path>) -> Result<ProcessSpec> {
        let args: Vec<String> = config.command.iter().chain(&config.args).cloned().collect();
        if args.is_empty() {
            return Err(CorralError::Config {
                message: format!("container '{}' has no command", config.metadata.name),
            });
        }
        let mut env: Vec<String> = config
            .envs
            .iter()
            .map(|kv| format!("{}={}", kv.key, kv.value))
            .collect();
        if !config.envs.iter().any(|kv| kv.key == "PATH") {
            env.insert(0, constants::DEFAULT_PATH_ENV.to_string());
        }
        let cwd = if config.working_dir.is_empty() {
            PathBuf::from("/")
        } else {
            PathBuf::from(&config.working_dir)
        };
        Ok(ProcessSpec {
            args,
            env,
            cwd,
            user: "root".into(),
            init: true,
            stdio: log_file.map_or(IoBinding::Null, |path| IoBinding::File(path.to_path_buf())),
        })
    }

    fn status_of(&self, id: &ContainerId) -> Result<(ContainerState, Option<i32>)> {
        let mut handle = self.factory.load(id)?;
        let state = handle.state()?;
        Ok((state.status(), state.live_pid()))
    }
}

fn remove_tree(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CorralError::io(path, e)),
    }
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

const fn sandbox_state(state: ContainerState) -> SandboxState {
    match state {
        ContainerState::Running => SandboxState::SandboxReady,
        _ => SandboxState::SandboxNotready,
    }
}

impl RuntimeBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn pull_image(&self, ctx: &OpContext, image: &str) -> Result<String> {
        ctx.check("pull image")?;
        Ok(self.images.pull(image))
    }

    fn list_images(&self, ctx: &OpContext) -> Result<Vec<ImageInfo>> {
        ctx.check("list images")?;
        self.images.list()
    }

    fn image_status(&self, ctx: &OpContext, image: &str) -> Result<Option<ImageInfo>> {
        ctx.check("image status")?;
        self.images.status(image)
    }

    fn run_pod_sandbox(&self, ctx: &OpContext, config: &PodSandboxConfig) -> Result<ContainerId> {
        ctx.check("run pod sandbox")?;
        let md = &config.metadata;
        let id = SandboxIdentity::new(&md.name, &md.namespace, &md.uid)?.container_id();
        tracing::info!(id = %id, "running pod sandbox");

        let image = self.config.sandbox_image.clone();
        if let Err(e) = self.pull_image(ctx, &image) {
            tracing::warn!(image = %image, error = %e, "sandbox image pre-pull failed");
        }

        self.purge(&id)?;
        let mut handle = self.discard_on_error(&id, || {
            let rootfs = self.provision(ctx, &id)?;
            let mut spec = spec::build(&id, &rootfs, &self.policy(self.network_mode()));
            if !config.hostname.is_empty() {
                spec.hostname.clone_from(&config.hostname);
            }

            ctx.check("run pod sandbox")?;
            let mut handle = self.factory.create(&id, &spec)?;
            let record = Record::Sandbox {
                config: config.clone(),
                image,
                created_at: now_nanos(),
            };
            self.factory.save_metadata(&id, METADATA_FILE, &record)?;
            handle.run(&ProcessSpec::init(self.config.sandbox_command.clone()))?;
            Ok(handle)
        })?;

        if self.cni.is_some() {
            let attach = handle
                .state()
                .and_then(|state| {
                    state.live_pid().ok_or_else(|| {
                        CorralError::kernel("run pod sandbox", "sandbox init exited before network setup")
                    })
                })
                .and_then(|pid| self.attach_network(ctx, &id, config, pid));
            if let Err(e) = attach {
                tracing::error!(id = %id, error = %e, "sandbox network setup failed");
                return Err(CorralError::NetworkSetup {
                    sandbox_id: id.to_string(),
                    source: Box::new(e),
                });
            }
        }
        tracing::info!(id = %id, "pod sandbox ready");
        Ok(id)
    }

    fn stop_pod_sandbox(&self, ctx: &OpContext, id: &ContainerId) -> Result<()> {
        let mut handle = match self.factory.load(id) {
            Ok(handle) => handle,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        for container in self.containers_of(id)? {
            self.stop_container(ctx, &container, Duration::ZERO)?;
        }
        if let Err(e) = self.detach_network(ctx, id, &mut handle) {
            tracing::warn!(id = %id, error = %e, "network detach failed, killing sandbox anyway");
        }
        Self::kill(ctx, &mut handle)?;
        tracing::info!(id = %id, "pod sandbox stopped");
        Ok(())
    }

    fn remove_pod_sandbox(&self, ctx: &OpContext, id: &ContainerId) -> Result<()> {
        for container in self.containers_of(id)? {
            self.remove_one(&container)?;
        }
        self.stop_pod_sandbox(ctx, id)?;
        self.remove_one(id)
    }

    fn pod_sandbox_status(&self, _ctx: &OpContext, id: &ContainerId) -> Result<PodSandboxStatus> {
        let (config, created_at) = self.sandbox_record(id)?;
        let (state, pid) = self.status_of(id)?;
        let ip = self
            .factory
            .load_metadata::<CniResult>(id, NETWORK_FILE)?
            .and_then(|result| result.primary_ip().map(str::to_string));
        Ok(PodSandboxStatus {
            id: id.to_string(),
            metadata: config.metadata,
            state: sandbox_state(state),
            created_at,
            ip,
            network_namespace: pid.map(netns_path),
            labels: config.labels,
            annotations: config.annotations,
        })
    }

    fn list_pod_sandbox(&self, _ctx: &OpContext, filter: &PodSandboxFilter) -> Result<Vec<PodSandbox>> {
        let mut out = Vec::new();
        for (id, record) in self.records()? {
            let Record::Sandbox {
                config, created_at, ..
            } = record
            else {
                continue;
            };
            let (state, _) = self.status_of(&id)?;
            let sandbox = PodSandbox {
                id: id.to_string(),
                metadata: config.metadata,
                state: sandbox_state(state),
                created_at,
                labels: config.labels,
                annotations: config.annotations,
            };
            if filter.matches(&sandbox) {
                out.push(sandbox);
            }
        }
        Ok(out)
    }

    fn create_container(
        &self,
        ctx: &OpContext,
        sandbox_id: &ContainerId,
        config: &ContainerConfig,
        sandbox_config: &PodSandboxConfig,
    ) -> Result<ContainerId> {
        ctx.check("create container")?;
        let _ = self.sandbox_record(sandbox_id)?;
        let mut sandbox = self.factory.load(sandbox_id)?;
        let id = WorkloadIdentity::new(&config.metadata.name, sandbox_id, config.metadata.attempt)?
            .container_id();
        tracing::info!(id = %id, sandbox = %sandbox_id, "creating container");

        let network = if self.config.network_namespace {
            let pid = sandbox.state()?.live_pid().ok_or_else(|| CorralError::Config {
                message: format!("sandbox {sandbox_id} is not running"),
            })?;
            NetworkMode::Join(netns_path(pid))
        } else {
            NetworkMode::Host
        };

        self.purge(&id)?;
        self.discard_on_error(&id, || {
            let rootfs = self.provision(ctx, &id)?;
            let mut spec: IsolationSpec = spec::build(&id, &rootfs, &self.policy(network));
            spec.hostname.clone_from(&sandbox.spec().hostname);

            let _ = self.factory.create(&id, &spec)?;
            let record = Record::Container {
                sandbox_id: sandbox_id.clone(),
                config: config.clone(),
                log_file: logs::container_log_path(sandbox_config.log_directory.as_deref(), &config.log_path),
                created_at: now_nanos(),
            };
            self.factory.save_metadata(&id, METADATA_FILE, &record)
        })?;
        tracing::info!(id = %id, "container created");
        Ok(id)
    }

    fn start_container(&self, ctx: &OpContext, id: &ContainerId) -> Result<()> {
        ctx.check("start container")?;
        let Record::Container {
            config, log_file, ..
        } = self.record(id)?
        else {
            return Err(CorralError::NotFound {
                kind: "container",
                id: id.to_string(),
            });
        };
        let process = Self::process_for(&config, log_file.as_deref())?;
        let mut handle = self.factory.load(id)?;
        handle.run(&process).inspect_err(|_| {
            // A failed launch destroys the state; the rootfs goes with it.
            if !self.factory.exists(id) {
                if let Err(cleanup) = remove_tree(&self.container_dir(id)) {
                    tracing::warn!(id = %id, error = %cleanup, "rootfs removal failed");
                }
            }
        })?;
        tracing::info!(id = %id, "container started");
        Ok(())
    }

    fn stop_container(&self, ctx: &OpContext, id: &ContainerId, timeout: Duration) -> Result<()> {
        let mut handle = match self.factory.load(id) {
            Ok(handle) => handle,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if handle.state()?.live_pid().is_none() {
            return Ok(());
        }
        if !timeout.is_zero() {
            handle.signal(Signal::SIGTERM, false)?;
            if Self::wait_stopped(ctx, &mut handle, timeout)? {
                tracing::info!(id = %id, "container stopped");
                return Ok(());
            }
            tracing::info!(id = %id, timeout_ms = timeout.as_millis(), "grace period expired, killing");
        }
        Self::kill(ctx, &mut handle)?;
        tracing::info!(id = %id, "container killed");
        Ok(())
    }

    fn remove_container(&self, _ctx: &OpContext, id: &ContainerId) -> Result<()> {
        self.remove_one(id)
    }

    fn container_status(&self, _ctx: &OpContext, id: &ContainerId) -> Result<ContainerStatus> {
        let Record::Container {
            config,
            log_file,
            created_at,
            ..
        } = self.record(id)?
        else {
            return Err(CorralError::NotFound {
                kind: "container",
                id: id.to_string(),
            });
        };
        let mut handle = self.factory.load(id)?;
        let run = handle.state()?.clone();
        Ok(ContainerStatus {
            id: id.to_string(),
            metadata: config.metadata,
            state: run.status(),
            created_at,
            started_at: run.started_at.unwrap_or_default(),
            finished_at: run.finished_at.unwrap_or_default(),
            exit_code: run.exit_code,
            image: config.image.image,
            log_path: log_file,
            pid: run.live_pid(),
            labels: config.labels,
            annotations: config.annotations,
        })
    }

    fn list_containers(&self, _ctx: &OpContext, filter: &ContainerFilter) -> Result<Vec<Container>> {
        let mut out = Vec::new();
        for (id, record) in self.records()? {
            let Record::Container {
                sandbox_id,
                config,
                created_at,
                ..
            } = record
            else {
                continue;
            };
            let (state, _) = self.status_of(&id)?;
            let container = Container {
                id: id.to_string(),
                pod_sandbox_id: sandbox_id.to_string(),
                metadata: config.metadata,
                image: config.image.image,
                state,
                created_at,
                labels: config.labels,
                annotations: config.annotations,
            };
            if filter.matches(&container) {
                out.push(container);
            }
        }
        Ok(out)
    }

    fn container_created_at(&self, _ctx: &OpContext, id: &ContainerId) -> Result<i64> {
        Ok(self.record(id)?.created_at())
    }

    fn network_namespace(&self, _ctx: &OpContext, id: &ContainerId) -> Result<Option<PathBuf>> {
        let (_, pid) = self.status_of(id)?;
        Ok(pid.map(netns_path))
    }
}

#[cfg(test)]
mod tests {
    use crate::cri::{ContainerMetadata, KeyValue};

    use super::*;

    fn container_config(command: &[&str], envs: &[(&str, &str)]) -> ContainerConfig {
        ContainerConfig {
            metadata: ContainerMetadata {
                name: "app".into(),
                attempt: 0,
            },
            command: command.iter().map(ToString::to_string).collect(),
            envs: envs
                .iter()
                .map(|(k, v)| KeyValue {
                    key: (*k).into(),
                    value: (*v).into(),
                })
                .collect(),
            ..ContainerConfig::default()
        }
    }

    #[test]
    fn process_gets_default_path_and_root_cwd() {
        let config = container_config(&["nginx"], &[("MODE", "prod")]);
        let process = NativeBackend::process_for(&config, None).unwrap();
        assert_eq!(process.args, vec!["nginx"]);
        assert_eq!(process.env[0], constants::DEFAULT_PATH_ENV);
        assert_eq!(process.env[1], "MODE=prod");
        assert_eq!(process.cwd, PathBuf::from("/"));
        assert_eq!(process.stdio, IoBinding::Null);
    }

    #[test]
    fn process_keeps_caller_path_and_log_file() {
        let mut config = container_config(&["sh"], &[("PATH", "/opt/bin")]);
        config.args = vec!["-c".into(), "true".into()];
        config.working_dir = "/srv".into();
        let log = PathBuf::from("/var/log/pods/app.log");

        let process = NativeBackend::process_for(&config, Some(&log)).unwrap();
        assert_eq!(process.args, vec!["sh", "-c", "true"]);
        assert_eq!(process.env, vec!["PATH=/opt/bin"]);
        assert_eq!(process.cwd, PathBuf::from("/srv"));
        assert_eq!(process.stdio, IoBinding::File(log));
    }

    #[test]
    fn container_without_command_is_rejected() {
        let config = container_config(&[], &[]);
        assert!(matches!(
            NativeBackend::process_for(&config, None),
            Err(CorralError::Config { .. })
        ));
    }

    #[test]
    fn cni_args_identify_the_pod() {
        let id = ContainerId::new("k8s_POD_web_default_abc123");
        let mut config = PodSandboxConfig::default();
        config.metadata.name = "web".into();
        config.metadata.namespace = "default".into();
        let rt = NativeBackend::network_conf(&id, &config, PathBuf::from("/proc/1/ns/net"));
        assert_eq!(rt.if_name, "eth0");
        assert!(rt.args.contains(&("K8S_POD_NAME".into(), "web".into())));
        assert!(rt.args.contains(&("K8S_POD_INFRA_CONTAINER_ID".into(), id.to_string())));
    }

    #[test]
    fn cni_is_only_wired_with_network_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RuntimeConfig {
            state_root: dir.path().join("state"),
            ..RuntimeConfig::default()
        };
        let launcher: Arc<dyn Launcher> = Arc::new(crate::launcher::HostLauncher);
        assert!(NativeBackend::with_launcher(config.clone(), Arc::clone(&launcher)).cni.is_none());
        config.network_namespace = true;
        assert!(NativeBackend::with_launcher(config, launcher).cni.is_some());
    }

    #[test]
    fn record_is_tagged_by_kind() {
        let record = Record::Sandbox {
            config: PodSandboxConfig::default(),
            image: "pause".into(),
            created_at: 7,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "sandbox");
        assert_eq!(record.created_at(), 7);
    }
}
