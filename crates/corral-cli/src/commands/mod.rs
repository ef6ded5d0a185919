//! CLI command definitions and dispatch.

pub mod containers;
pub mod images;
pub mod logs;
pub mod pods;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use corral_common::config::RuntimeConfig;
use corral_common::context::OpContext;
use corral_runtime::backend::{Backend, RuntimeBackend};
use serde::de::DeserializeOwned;

/// corral: CRI container runtime.
#[derive(Parser, Debug)]
#[command(name = "corral", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Runtime configuration file (JSON).
    #[arg(long, global = true, env = "CORRAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Network plugin directory; repeat to search several in order.
    #[arg(long, global = true, value_name = "DIR")]
    pub cni_bin_dir: Vec<PathBuf>,

    /// Network configuration directory.
    #[arg(long, global = true, value_name = "DIR")]
    pub cni_conf_dir: Option<PathBuf>,

    /// Network plugin result cache directory.
    #[arg(long, global = true, value_name = "DIR")]
    pub cni_cache_dir: Option<PathBuf>,

    /// Give up on the request after this many seconds.
    #[arg(long, global = true, value_name = "SECONDS")]
    pub request_timeout: Option<u64>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Make an image available locally.
    Pull(images::PullArgs),
    /// List local images, or describe one.
    Images(images::ImagesArgs),
    /// Run a pod sandbox from a JSON config.
    Runp(pods::RunpArgs),
    /// Stop a pod sandbox and its containers.
    Stopp(pods::PodArgs),
    /// Remove a pod sandbox and its containers.
    Rmp(pods::PodArgs),
    /// Show a pod sandbox's status.
    Inspectp(pods::PodArgs),
    /// List pod sandboxes.
    Pods(pods::PodsArgs),
    /// Create a container in a pod sandbox.
    Create(containers::CreateArgs),
    /// Start a created container.
    Start(containers::ContainerArgs),
    /// Stop a running container.
    Stop(containers::StopArgs),
    /// Remove a container.
    Rm(containers::ContainerArgs),
    /// Show a container's status.
    Inspect(containers::ContainerArgs),
    /// List containers.
    Ps(containers::PsArgs),
    /// Print the network namespace path of a running container or sandbox.
    Netns(containers::ContainerArgs),
    /// Print a container's log.
    Logs(logs::LogsArgs),
}

impl Cli {
    /// Loads the configuration file, if any, and applies flag overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or the result is
    /// invalid.
    pub fn runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let mut config = match &self.config {
            Some(path) => RuntimeConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => RuntimeConfig::default(),
        };
        if !self.cni_bin_dir.is_empty() {
            config.cni.bin_dirs.clone_from(&self.cni_bin_dir);
        }
        if let Some(dir) = &self.cni_conf_dir {
            config.cni.conf_dir.clone_from(dir);
        }
        if let Some(dir) = &self.cni_cache_dir {
            config.cni.cache_dir.clone_from(dir);
        }
        config.validate()?;
        Ok(config)
    }

    fn context(&self) -> OpContext {
        self.request_timeout
            .map_or_else(OpContext::background, |secs| {
                OpContext::with_timeout(Duration::from_secs(secs))
            })
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.runtime_config()?;
    let backend = Backend::from_config(&config)?;

    let ctx = cli.context();
    let interrupt = ctx.clone();
    ctrlc::set_handler(move || interrupt.cancel())
        .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    tracing::debug!(command = ?cli.command, backend = backend.name(), "executing command");
    match cli.command {
        Command::Pull(args) => images::pull(&backend, &ctx, &args),
        Command::Images(args) => images::list(&backend, &ctx, &args),
        Command::Runp(args) => pods::run(&backend, &ctx, &args),
        Command::Stopp(args) => pods::stop(&backend, &ctx, &args),
        Command::Rmp(args) => pods::remove(&backend, &ctx, &args),
        Command::Inspectp(args) => pods::inspect(&backend, &ctx, &args),
        Command::Pods(args) => pods::list(&backend, &ctx, &args),
        Command::Create(args) => containers::create(&backend, &ctx, &args),
        Command::Start(args) => containers::start(&backend, &ctx, &args),
        Command::Stop(args) => containers::stop(&backend, &ctx, &args),
        Command::Rm(args) => containers::remove(&backend, &ctx, &args),
        Command::Inspect(args) => containers::inspect(&backend, &ctx, &args),
        Command::Ps(args) => containers::list(&backend, &ctx, &args),
        Command::Netns(args) => containers::netns(&backend, &ctx, &args),
        Command::Logs(args) => logs::execute(&backend, &ctx, &args),
    }
}

/// Reads a JSON request file.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Parses a `key=value` label selector.
pub(crate) fn parse_label(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn reserved_commands_parse() {
        let cli = Cli::try_parse_from(["corral", "runp", "pod.json"]).unwrap();
        assert!(matches!(cli.command, Command::Runp(_)));
        let cli = Cli::try_parse_from(["corral", "stop", "--timeout", "3", "abc"]).unwrap();
        assert!(matches!(cli.command, Command::Stop(_)));
        let cli = Cli::try_parse_from(["corral", "--request-timeout", "5", "pods"]).unwrap();
        assert_eq!(cli.request_timeout, Some(5));
    }

    #[test]
    fn cni_flags_override_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corral.json");
        std::fs::write(&path, r#"{ "cni": { "conf_dir": "/from/file", "cache_dir": "/cache" } }"#).unwrap();
        let cli = Cli::try_parse_from([
            "corral",
            "--config",
            path.to_str().unwrap(),
            "--cni-conf-dir",
            "/from/flag",
            "--cni-bin-dir",
            "/a",
            "--cni-bin-dir",
            "/b",
            "pods",
        ])
        .unwrap();

        let config = cli.runtime_config().unwrap();
        assert_eq!(config.cni.conf_dir, PathBuf::from("/from/flag"));
        assert_eq!(config.cni.cache_dir, PathBuf::from("/cache"));
        assert_eq!(config.cni.bin_dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli::try_parse_from(["corral", "--config", "/nonexistent/corral.json", "pods"]).unwrap();
        let err = cli.runtime_config().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/corral.json"));
    }

    #[test]
    fn labels_parse() {
        assert_eq!(parse_label("app=web").unwrap(), ("app".into(), "web".into()));
        assert_eq!(parse_label("tier=").unwrap(), ("tier".into(), String::new()));
        assert!(parse_label("=web").is_err());
        assert!(parse_label("app").is_err());
    }

    #[test]
    fn request_files_are_read_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pod.json");
        std::fs::write(&path, r#"{ "metadata": { "name": "web", "namespace": "default", "uid": "abc123" } }"#)
            .unwrap();
        let config: corral_runtime::cri::PodSandboxConfig = read_json(&path).unwrap();
        assert_eq!(config.metadata.name, "web");
        assert!(read_json::<corral_runtime::cri::PodSandboxConfig>(&dir.path().join("missing.json")).is_err());
    }
}
