//! The runtime backend contract.
//!
//! Every CRI lifecycle operation is a method of [`RuntimeBackend`]. The
//! concrete backend is chosen once from configuration and wrapped in the
//! closed [`Backend`] enum; callers never pick a variant themselves.

pub mod native;
pub mod shell;

use std::path::PathBuf;
use std::time::Duration;

use corral_common::config::{BackendKind, RuntimeConfig};
use corral_common::context::OpContext;
use corral_common::error::Result;
use corral_common::types::ContainerId;
use corral_image::source::ImageInfo;

use crate::cri::{
    Container, ContainerConfig, ContainerFilter, ContainerStatus, PodSandbox, PodSandboxConfig,
    PodSandboxFilter, PodSandboxStatus,
};

pub use native::NativeBackend;
pub use shell::ShellBackend;

/// Operations every backend provides.
///
/// A backend that cannot perform an operation returns
/// `CorralError::Unsupported` rather than omitting it.
pub trait RuntimeBackend: Send + Sync {
    /// Short backend name for logs and errors.
    fn name(&self) -> &'static str;

    /// Makes `image` available locally and returns its reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be fetched.
    fn pull_image(&self, ctx: &OpContext, image: &str) -> Result<String>;

    /// Lists locally available images.
    ///
    /// # Errors
    ///
    /// Returns an error if the image store cannot be read.
    fn list_images(&self, ctx: &OpContext) -> Result<Vec<ImageInfo>>;

    /// Describes `image`, `None` if it is not present.
    ///
    /// # Errors
    ///
    /// Returns an error if the image store cannot be read.
    fn image_status(&self, ctx: &OpContext, image: &str) -> Result<Option<ImageInfo>>;

    /// Creates and starts a pod sandbox, then attaches its network.
    ///
    /// # Errors
    ///
    /// Returns `CorralError::NetworkSetup` carrying the sandbox ID when the
    /// sandbox runs but its network could not be attached; any other error
    /// means no sandbox process is running.
    fn run_pod_sandbox(&self, ctx: &OpContext, config: &PodSandboxConfig) -> Result<ContainerId>;

    /// Stops a sandbox and its containers. Network teardown failures are
    /// logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the processes cannot be stopped.
    fn stop_pod_sandbox(&self, ctx: &OpContext, id: &ContainerId) -> Result<()>;

    /// Removes a sandbox, its containers, and all their state. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if state exists but cannot be removed.
    fn remove_pod_sandbox(&self, ctx: &OpContext, id: &ContainerId) -> Result<()>;

    /// Reports a sandbox's state and network.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown sandbox.
    fn pod_sandbox_status(&self, ctx: &OpContext, id: &ContainerId) -> Result<PodSandboxStatus>;

    /// Lists sandboxes passing `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    fn list_pod_sandbox(&self, ctx: &OpContext, filter: &PodSandboxFilter) -> Result<Vec<PodSandbox>>;

    /// Records a workload container in a sandbox without starting it.
    ///
    /// # Errors
    ///
    /// Returns an error if the sandbox is unknown or the container cannot be
    /// provisioned.
    fn create_container(
        &self,
        ctx: &OpContext,
        sandbox_id: &ContainerId,
        config: &ContainerConfig,
        sandbox_config: &PodSandboxConfig,
    ) -> Result<ContainerId>;

    /// Starts a created container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or its process fails to
    /// start.
    fn start_container(&self, ctx: &OpContext, id: &ContainerId) -> Result<()>;

    /// Stops a container, escalating to `SIGKILL` after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if signals cannot be delivered.
    fn stop_container(&self, ctx: &OpContext, id: &ContainerId, timeout: Duration) -> Result<()>;

    /// Removes a container and its state. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if state exists but cannot be removed.
    fn remove_container(&self, ctx: &OpContext, id: &ContainerId) -> Result<()>;

    /// Reports a container's state.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown container.
    fn container_status(&self, ctx: &OpContext, id: &ContainerId) -> Result<ContainerStatus>;

    /// Lists containers passing `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    fn list_containers(&self, ctx: &OpContext, filter: &ContainerFilter) -> Result<Vec<Container>>;

    /// Creation time of a container or sandbox in nanoseconds since the epoch.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ID.
    fn container_created_at(&self, ctx: &OpContext, id: &ContainerId) -> Result<i64>;

    /// Network namespace path of a running container, `None` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ID.
    fn network_namespace(&self, ctx: &OpContext, id: &ContainerId) -> Result<Option<PathBuf>>;
}

/// The backend selected at startup.
#[derive(Debug)]
pub enum Backend {
    /// Kernel-primitive backend.
    Native(NativeBackend),
    /// Container engine CLI backend.
    Shell(ShellBackend),
}

impl Backend {
    /// Builds the backend named by `config.backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if the native backend cannot locate its own
    /// executable.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        let backend = match config.backend {
            BackendKind::Native => Self::Native(NativeBackend::new(config.clone())?),
            BackendKind::Shell => Self::Shell(
                ShellBackend::new(&config.shell.binary).with_sandbox_image(&config.sandbox_image),
            ),
        };
        tracing::info!(backend = backend.name(), "runtime backend selected");
        Ok(backend)
    }

    fn inner(&self) -> &dyn RuntimeBackend {
        match self {
            Self::Native(b) => b,
            Self::Shell(b) => b,
        }
    }
}

impl RuntimeBackend for Backend {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn pull_image(&self, ctx: &OpContext, image: &str) -> Result<String> {
        self.inner().pull_image(ctx, image)
    }

    fn list_images(&self, ctx: &OpContext) -> Result<Vec<ImageInfo>> {
        self.inner().list_images(ctx)
    }

    fn image_status(&self, ctx: &OpContext, image: &str) -> Result<Option<ImageInfo>> {
        self.inner().image_status(ctx, image)
    }

    fn run_pod_sandbox(&self, ctx: &OpContext, config: &PodSandboxConfig) -> Result<ContainerId> {
        self.inner().run_pod_sandbox(ctx, config)
    }

    fn stop_pod_sandbox(&self, ctx: &OpContext, id: &ContainerId) -> Result<()> {
        self.inner().stop_pod_sandbox(ctx, id)
    }

    fn remove_pod_sandbox(&self, ctx: &OpContext, id: &ContainerId) -> Result<()> {
        self.inner().remove_pod_sandbox(ctx, id)
    }

    fn pod_sandbox_status(&self, ctx: &OpContext, id: &ContainerId) -> Result<PodSandboxStatus> {
        self.inner().pod_sandbox_status(ctx, id)
    }

    fn list_pod_sandbox(&self, ctx: &OpContext, filter: &PodSandboxFilter) -> Result<Vec<PodSandbox>> {
        self.inner().list_pod_sandbox(ctx, filter)
    }

    fn create_container(
        &self,
        ctx: &OpContext,
        sandbox_id: &ContainerId,
        config: &ContainerConfig,
        sandbox_config: &PodSandboxConfig,
    ) -> Result<ContainerId> {
        self.inner()
            .create_container(ctx, sandbox_id, config, sandbox_config)
    }

    fn start_container(&self, ctx: &OpContext, id: &ContainerId) -> Result<()> {
        self.inner().start_container(ctx, id)
    }

    fn stop_container(&self, ctx: &OpContext, id: &ContainerId, timeout: Duration) -> Result<()> {
        self.inner().stop_container(ctx, id, timeout)
    }

    fn remove_container(&self, ctx: &OpContext, id: &ContainerId) -> Result<()> {
        self.inner().remove_container(ctx, id)
    }

    fn container_status(&self, ctx: &OpContext, id: &ContainerId) -> Result<ContainerStatus> {
        self.inner().container_status(ctx, id)
    }

    fn list_containers(&self, ctx: &OpContext, filter: &ContainerFilter) -> Result<Vec<Container>> {
        self.inner().list_containers(ctx, filter)
    }

    fn container_created_at(&self, ctx: &OpContext, id: &ContainerId) -> Result<i64> {
        self.inner().container_created_at(ctx, id)
    }

    fn network_namespace(&self, ctx: &OpContext, id: &ContainerId) -> Result<Option<PathBuf>> {
        self.inner().network_namespace(ctx, id)
    }
}
