//! # corral
//!
//! Command-line front end for the corral container runtime. Drives the
//! CRI-shaped backend contract directly, one request per invocation.
//!
//! The same binary is re-executed as container init; that role is diverted
//! before any argument parsing or thread creation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]
#![allow(clippy::print_stdout)]

mod commands;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    corral_runtime::init::intercept();

    let cli = Cli::parse();
    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    commands::execute(cli)
}
