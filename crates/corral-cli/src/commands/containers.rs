//! `corral create | start | stop | rm | inspect | ps | netns`: Container
//! lifecycle.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use corral_common::context::OpContext;
use corral_common::types::{ContainerId, ContainerState};
use corral_runtime::backend::{Backend, RuntimeBackend};
use corral_runtime::cri::{ContainerConfig, ContainerFilter, PodSandboxConfig};

use crate::output::{self, OutputFormat};

/// Arguments for the `create` command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// ID of the sandbox the container joins.
    pub pod_id: String,
    /// Container config file (JSON).
    pub container_config: PathBuf,
    /// Config file the sandbox was run with (JSON).
    pub pod_config: PathBuf,
}

/// Arguments naming one container.
#[derive(Args, Debug)]
pub struct ContainerArgs {
    /// Container ID.
    pub id: String,
}

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container ID.
    pub id: String,

    /// Seconds to wait after SIGTERM before killing; 0 kills immediately.
    #[arg(short, long, default_value_t = 10)]
    pub timeout: u64,
}

/// Container state accepted by `--state`.
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum StateArg {
    /// Created, never started.
    Created,
    /// Init process alive.
    Running,
    /// Init process gone.
    Exited,
    /// Not determinable.
    Unknown,
}

impl From<StateArg> for ContainerState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Created => Self::Created,
            StateArg::Running => Self::Running,
            StateArg::Exited => Self::Stopped,
            StateArg::Unknown => Self::Unknown,
        }
    }
}

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Only containers whose ID starts with this prefix.
    #[arg(long)]
    pub id: Option<String>,

    /// Only containers of this sandbox.
    #[arg(short, long)]
    pub pod: Option<String>,

    /// Only containers in this state.
    #[arg(long, value_enum)]
    pub state: Option<StateArg>,

    /// Only containers carrying this label; repeatable.
    #[arg(long, value_parser = super::parse_label)]
    pub label: Vec<(String, String)>,

    /// Print IDs only.
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

/// Executes the `create` command and prints the container ID.
///
/// # Errors
///
/// Returns an error if a config cannot be read or the container cannot be
/// created.
pub fn create(backend: &Backend, ctx: &OpContext, args: &CreateArgs) -> anyhow::Result<()> {
    let config: ContainerConfig = super::read_json(&args.container_config)?;
    let sandbox_config: PodSandboxConfig = super::read_json(&args.pod_config)?;
    let id = backend.create_container(ctx, &ContainerId::new(&args.pod_id), &config, &sandbox_config)?;
    println!("{id}");
    Ok(())
}

/// Executes the `start` command.
///
/// # Errors
///
/// Returns an error if the container cannot be started.
pub fn start(backend: &Backend, ctx: &OpContext, args: &ContainerArgs) -> anyhow::Result<()> {
    let id = ContainerId::new(&args.id);
    backend.start_container(ctx, &id)?;
    println!("{id}");
    Ok(())
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the container cannot be stopped.
pub fn stop(backend: &Backend, ctx: &OpContext, args: &StopArgs) -> anyhow::Result<()> {
    let id = ContainerId::new(&args.id);
    backend.stop_container(ctx, &id, Duration::from_secs(args.timeout))?;
    println!("{id}");
    Ok(())
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the container state cannot be removed.
pub fn remove(backend: &Backend, ctx: &OpContext, args: &ContainerArgs) -> anyhow::Result<()> {
    let id = ContainerId::new(&args.id);
    backend.remove_container(ctx, &id)?;
    println!("{id}");
    Ok(())
}

/// Executes the `inspect` command.
///
/// # Errors
///
/// Returns an error if the container is unknown.
pub fn inspect(backend: &Backend, ctx: &OpContext, args: &ContainerArgs) -> anyhow::Result<()> {
    let status = backend.container_status(ctx, &ContainerId::new(&args.id))?;
    output::print_json(&status)
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the containers cannot be listed.
pub fn list(backend: &Backend, ctx: &OpContext, args: &PsArgs) -> anyhow::Result<()> {
    let filter = ContainerFilter {
        id: args.id.clone(),
        state: args.state.map(ContainerState::from),
        pod_sandbox_id: args.pod.clone(),
        label_selector: args.label.iter().cloned().collect(),
    };
    let containers = backend.list_containers(ctx, &filter)?;

    if args.output == OutputFormat::Json {
        return output::print_json(&containers);
    }
    if args.quiet {
        for container in &containers {
            println!("{}", container.id);
        }
        return Ok(());
    }
    println!(
        "{:<32} {:<20} {:<20} {:<10} {:<8} {:<32}",
        "CONTAINER", "IMAGE", "NAME", "STATE", "ATTEMPT", "POD ID"
    );
    for c in &containers {
        println!(
            "{:<32} {:<20} {:<20} {:<10} {:<8} {:<32}",
            output::truncate(&c.id, 32),
            output::truncate(&c.image, 20),
            c.metadata.name,
            c.state,
            c.metadata.attempt,
            output::truncate(&c.pod_sandbox_id, 32),
        );
    }
    Ok(())
}

/// Executes the `netns` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or not running.
pub fn netns(backend: &Backend, ctx: &OpContext, args: &ContainerArgs) -> anyhow::Result<()> {
    let id = ContainerId::new(&args.id);
    let path = backend
        .network_namespace(ctx, &id)?
        .ok_or_else(|| anyhow::anyhow!("{id} is not running"))?;
    println!("{}", path.display());
    Ok(())
}
