//! `corral logs`: View container logs.

use clap::Args;
use corral_common::context::OpContext;
use corral_common::types::ContainerId;
use corral_runtime::backend::{Backend, RuntimeBackend};
use corral_runtime::logs;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container ID.
    pub container: String,
}

/// Executes the `logs` command.
///
/// Prints the file the container's output is appended to.
///
/// # Errors
///
/// Returns an error if the container is not found, has no log file, or the
/// file cannot be read.
pub fn execute(backend: &Backend, ctx: &OpContext, args: &LogsArgs) -> anyhow::Result<()> {
    let status = backend.container_status(ctx, &ContainerId::new(&args.container))?;
    let path = status
        .log_path
        .ok_or_else(|| anyhow::anyhow!("container {} has no log file", args.container))?;
    print!("{}", logs::read_log(&path)?);
    Ok(())
}
