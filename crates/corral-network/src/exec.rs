//! Plugin lookup and invocation.
//!
//! A plugin is an executable found by its type name in the configured
//! binary directories. It receives its instruction through `CNI_*`
//! environment variables and its configuration on stdin, and answers on
//! stdout. Invocations are bounded by the request's [`OpContext`].

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use corral_common::context::OpContext;
use corral_common::error::{CorralError, Result};

use crate::result::PluginError;

/// Spawn attempts when the plugin binary is still open for writing.
const SPAWN_ATTEMPTS: u32 = 5;

/// Poll interval while waiting for a plugin to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// CNI operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CniCommand {
    /// Attach.
    Add,
    /// Detach.
    Del,
}

impl CniCommand {
    /// Value of `CNI_COMMAND`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Del => "DEL",
        }
    }
}

/// Everything a plugin learns about its target from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConf {
    /// Container the attachment belongs to.
    pub container_id: String,
    /// Path of the target network namespace.
    pub netns: PathBuf,
    /// Interface name to create inside the namespace.
    pub if_name: String,
    /// Extra `KEY=VALUE` pairs passed in `CNI_ARGS`.
    pub args: Vec<(String, String)>,
}

impl RuntimeConf {
    /// Runtime configuration for the default pod interface.
    #[must_use]
    pub fn new(container_id: impl Into<String>, netns: impl Into<PathBuf>) -> Self {
        Self {
            container_id: container_id.into(),
            netns: netns.into(),
            if_name: corral_common::constants::POD_INTERFACE_NAME.to_string(),
            args: Vec::new(),
        }
    }

    /// Adds a `CNI_ARGS` pair.
    #[must_use]
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    fn cni_args(&self) -> String {
        self.args
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Finds a plugin binary by type name.
///
/// # Errors
///
/// Returns `CorralError::ExternalTool` if no directory holds an executable
/// of that name.
pub fn find_plugin(plugin_type: &str, bin_dirs: &[PathBuf]) -> Result<PathBuf> {
    let search = std::env::join_paths(bin_dirs).map_err(|e| CorralError::Config {
        message: format!("invalid plugin directory: {e}"),
    })?;
    which::which_in(plugin_type, Some(search), "/").map_err(|_| CorralError::ExternalTool {
        tool: plugin_type.to_string(),
        message: format!("plugin not found in {}", display_dirs(bin_dirs)),
    })
}

fn display_dirs(dirs: &[PathBuf]) -> String {
    dirs.iter()
        .map(|d| d.display().to_string())
        .collect::<Vec<_>>()
        .join(":")
}

/// Runs one plugin and returns its stdout.
///
/// # Errors
///
/// Returns `CorralError::ExternalTool` if the plugin cannot be spawned or
/// exits unsuccessfully, with the plugin's error document when it printed
/// one. Returns `CorralError::Cancelled` if the context finishes first; the
/// plugin is killed in that case.
pub fn invoke(
    ctx: &OpContext,
    plugin_type: &str,
    bin_dirs: &[PathBuf],
    command: CniCommand,
    rt: &RuntimeConf,
    stdin_config: &[u8],
) -> Result<Vec<u8>> {
    ctx.check("network plugin")?;
    let binary = find_plugin(plugin_type, bin_dirs)?;
    let tool_error = |message: String| CorralError::ExternalTool {
        tool: plugin_type.to_string(),
        message,
    };

    let mut child = spawn(&binary, command, rt, bin_dirs)
        .map_err(|e| tool_error(format!("spawn {}: {e}", binary.display())))?;
    tracing::debug!(
        plugin = plugin_type,
        command = command.as_str(),
        id = %rt.container_id,
        netns = %rt.netns.display(),
        "invoking network plugin"
    );

    let (Some(mut stdin), Some(mut stdout)) = (child.stdin.take(), child.stdout.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(tool_error("plugin pipes unavailable".into()));
    };
    let reader = std::thread::spawn(move || {
        let mut out = Vec::new();
        stdout.read_to_end(&mut out).map(|_| out)
    });
    let written = stdin.write_all(stdin_config);
    drop(stdin);
    match written {
        // A plugin may exit without reading its input.
        Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(tool_error(format!("write config: {e}")));
        }
        _ => {}
    }

    let status = wait_bounded(ctx, &mut child).map_err(|e| match e {
        WaitError::Cancelled => CorralError::Cancelled {
            operation: "network plugin",
        },
        WaitError::Io(e) => tool_error(format!("wait: {e}")),
    })?;
    let output = reader
        .join()
        .map_err(|_| tool_error("stdout reader panicked".into()))?
        .map_err(|e| tool_error(format!("read output: {e}")))?;

    if !status.success() {
        let message = serde_json::from_slice::<PluginError>(&output).map_or_else(
            |_| {
                let text = String::from_utf8_lossy(&output).trim().to_string();
                if text.is_empty() {
                    format!("exited with {status}")
                } else {
                    text
                }
            },
            |err| err.to_string(),
        );
        tracing::debug!(plugin = plugin_type, %status, %message, "network plugin failed");
        return Err(tool_error(message));
    }
    Ok(output)
}

fn spawn(
    binary: &Path,
    command: CniCommand,
    rt: &RuntimeConf,
    bin_dirs: &[PathBuf],
) -> std::io::Result<Child> {
    let cni_path = std::env::join_paths(bin_dirs).unwrap_or_else(|_| OsString::new());
    let mut attempt = 1;
    loop {
        let spawned = Command::new(binary)
            .env("CNI_COMMAND", command.as_str())
            .env("CNI_CONTAINERID", &rt.container_id)
            .env("CNI_NETNS", &rt.netns)
            .env("CNI_IFNAME", &rt.if_name)
            .env("CNI_ARGS", rt.cni_args())
            .env("CNI_PATH", &cni_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn();
        match spawned {
            // The binary may have been written a moment ago by another thread.
            Err(e) if e.raw_os_error() == Some(libc::ETXTBSY) && attempt < SPAWN_ATTEMPTS => {
                attempt += 1;
                std::thread::sleep(Duration::from_millis(50) * attempt);
            }
            other => return other,
        }
    }
}

enum WaitError {
    Cancelled,
    Io(std::io::Error),
}

fn wait_bounded(ctx: &OpContext, child: &mut Child) -> std::result::Result<ExitStatus, WaitError> {
    loop {
        if let Some(status) = child.try_wait().map_err(WaitError::Io)? {
            return Ok(status);
        }
        if ctx.is_done() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(WaitError::Cancelled);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
