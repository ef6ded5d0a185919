//! `corral runp | stopp | rmp | inspectp | pods`: Pod sandbox lifecycle.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use corral_common::context::OpContext;
use corral_common::types::ContainerId;
use corral_runtime::backend::{Backend, RuntimeBackend};
use corral_runtime::cri::{PodSandboxConfig, PodSandboxFilter, SandboxState};

use crate::output::{self, OutputFormat};

/// Arguments for the `runp` command.
#[derive(Args, Debug)]
pub struct RunpArgs {
    /// Pod sandbox config file (JSON).
    pub pod_config: PathBuf,
}

/// Arguments naming one pod sandbox.
#[derive(Args, Debug)]
pub struct PodArgs {
    /// Pod sandbox ID.
    pub id: String,
}

/// Sandbox readiness accepted by `--state`.
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum StateArg {
    /// Infrastructure process running.
    Ready,
    /// Anything else.
    Notready,
}

impl From<StateArg> for SandboxState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Ready => Self::SandboxReady,
            StateArg::Notready => Self::SandboxNotready,
        }
    }
}

/// Arguments for the `pods` command.
#[derive(Args, Debug)]
pub struct PodsArgs {
    /// Only sandboxes whose ID starts with this prefix.
    #[arg(long)]
    pub id: Option<String>,

    /// Only sandboxes in this state.
    #[arg(long, value_enum)]
    pub state: Option<StateArg>,

    /// Only sandboxes carrying this label; repeatable.
    #[arg(long, value_parser = super::parse_label)]
    pub label: Vec<(String, String)>,

    /// Print IDs only.
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

/// Executes the `runp` command and prints the sandbox ID.
///
/// # Errors
///
/// Returns an error if the config cannot be read or the sandbox fails to run.
pub fn run(backend: &Backend, ctx: &OpContext, args: &RunpArgs) -> anyhow::Result<()> {
    let config: PodSandboxConfig = super::read_json(&args.pod_config)?;
    let id = backend.run_pod_sandbox(ctx, &config)?;
    println!("{id}");
    Ok(())
}

/// Executes the `stopp` command.
///
/// # Errors
///
/// Returns an error if the sandbox cannot be stopped.
pub fn stop(backend: &Backend, ctx: &OpContext, args: &PodArgs) -> anyhow::Result<()> {
    let id = ContainerId::new(&args.id);
    backend.stop_pod_sandbox(ctx, &id)?;
    println!("Stopped sandbox {id}");
    Ok(())
}

/// Executes the `rmp` command.
///
/// # Errors
///
/// Returns an error if the sandbox state cannot be removed.
pub fn remove(backend: &Backend, ctx: &OpContext, args: &PodArgs) -> anyhow::Result<()> {
    let id = ContainerId::new(&args.id);
    backend.remove_pod_sandbox(ctx, &id)?;
    println!("Removed sandbox {id}");
    Ok(())
}

/// Executes the `inspectp` command.
///
/// # Errors
///
/// Returns an error if the sandbox is unknown.
pub fn inspect(backend: &Backend, ctx: &OpContext, args: &PodArgs) -> anyhow::Result<()> {
    let status = backend.pod_sandbox_status(ctx, &ContainerId::new(&args.id))?;
    output::print_json(&status)
}

/// Executes the `pods` command.
///
/// # Errors
///
/// Returns an error if the sandboxes cannot be listed.
pub fn list(backend: &Backend, ctx: &OpContext, args: &PodsArgs) -> anyhow::Result<()> {
    let filter = PodSandboxFilter {
        id: args.id.clone(),
        state: args.state.map(SandboxState::from),
        label_selector: args.label.iter().cloned().collect(),
    };
    let sandboxes = backend.list_pod_sandbox(ctx, &filter)?;

    if args.output == OutputFormat::Json {
        return output::print_json(&sandboxes);
    }
    if args.quiet {
        for sandbox in &sandboxes {
            println!("{}", sandbox.id);
        }
        return Ok(());
    }
    println!(
        "{:<40} {:<20} {:<15} {:<10} {:<20}",
        "POD ID", "NAME", "NAMESPACE", "STATE", "CREATED"
    );
    for sandbox in &sandboxes {
        println!(
            "{:<40} {:<20} {:<15} {:<10} {:<20}",
            output::truncate(&sandbox.id, 40),
            sandbox.metadata.name,
            sandbox.metadata.namespace,
            sandbox.state,
            output::format_timestamp(sandbox.created_at),
        );
    }
    Ok(())
}
