//! Starting a container's init process.
//!
//! The state store hands a launcher the isolation spec, the process to run,
//! and the cgroup the process must join. [`ReexecLauncher`] clones a child
//! into fresh namespaces and re-executes the runtime binary in its init role;
//! [`HostLauncher`] runs the command directly on the host and exists for
//! unprivileged development and tests.
//!
//! Re-exec handshake, parent side:
//!
//! 1. Two `O_CLOEXEC` pipes: init (parent writes) and sync (child writes).
//! 2. `clone(2)` with the spec's namespace flags. The child wires stdio,
//!    clears `FD_CLOEXEC` on its two pipe ends, and `execve`s
//!    `<runtime> init` with the fd numbers in its environment.
//! 3. The parent moves the child into its cgroup, writes the
//!    [`InitConfig`] as JSON, and closes the init pipe.
//! 4. The parent reads the sync pipe to EOF. The init role closes it by
//!    exec (`FD_CLOEXEC`), so EOF with no bytes means the user's command
//!    replaced the init role. Anything else is a JSON error message.

use std::ffi::CString;
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use corral_common::constants;
use corral_common::error::{CorralError, Result};
use corral_core::cgroup::CgroupManager;
use corral_core::filesystem;
use corral_core::namespace;
use corral_core::spec::IsolationSpec;
use nix::fcntl::OFlag;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::logs;
use crate::process::{InitConfig, IoBinding, ProcessSpec};

/// Environment variable carrying the init pipe's fd number.
pub const INIT_PIPE_ENV: &str = "_CORRAL_INITPIPE";
/// Environment variable carrying the sync pipe's fd number.
pub const SYNC_PIPE_ENV: &str = "_CORRAL_SYNCPIPE";

/// Stack size for the cloned child before it execs.
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Exit status of a cloned child that could not exec the runtime.
const EXEC_FAILED_STATUS: i32 = 127;

/// Written by a cloned child whose re-exec failed. Static so the child never
/// allocates.
const EXEC_FAILED_MESSAGE: &[u8] = br#"{"message":"failed to re-exec runtime binary"}"#;

/// Failure report sent over the sync pipe by the init role.
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncMessage {
    /// Description of what went wrong.
    pub message: String,
}

/// Starts a container's init process.
pub trait Launcher: Send + Sync + std::fmt::Debug {
    /// Starts `process` isolated per `spec` and places it in `cgroup`.
    ///
    /// Returns the host PID of the new process. The process is a child of
    /// the caller and must eventually be reaped.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be created or failed before
    /// executing the requested command.
    fn launch(&self, spec: &IsolationSpec, process: &ProcessSpec, cgroup: &CgroupManager) -> Result<i32>;
}

/// Launches init processes by re-executing the runtime binary.
#[derive(Debug, Clone)]
pub struct ReexecLauncher {
    exe: PathBuf,
}

impl ReexecLauncher {
    /// Registers the running executable as the init program.
    ///
    /// # Errors
    ///
    /// Returns an error if the executable path cannot be determined.
    pub fn new() -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| CorralError::io("/proc/self/exe", e))?;
        Ok(Self::with_executable(exe))
    }

    /// Uses `exe` as the init program. It must call
    /// [`crate::init::intercept`] before anything else.
    #[must_use]
    pub fn with_executable(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    /// Path of the init program.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.exe
    }
}

/// File descriptors installed as the child's stdin, stdout, and stderr.
struct ChildStdio {
    stdin: File,
    output: File,
}

fn open_stdio(binding: &IoBinding) -> Result<Option<ChildStdio>> {
    let null = || File::options().read(true).write(true).open("/dev/null");
    match binding {
        IoBinding::Inherit => Ok(None),
        IoBinding::Null => {
            let stdin = null().map_err(|e| CorralError::io("/dev/null", e))?;
            let output = stdin.try_clone().map_err(|e| CorralError::io("/dev/null", e))?;
            Ok(Some(ChildStdio { stdin, output }))
        }
        IoBinding::File(path) => Ok(Some(ChildStdio {
            stdin: null().map_err(|e| CorralError::io("/dev/null", e))?,
            output: logs::open_for_append(path)?,
        })),
    }
}

fn cstring(value: impl Into<Vec<u8>>) -> Result<CString> {
    CString::new(value).map_err(|e| CorralError::ProtocolViolation {
        message: format!("argument contains a NUL byte: {e}"),
    })
}

impl Launcher for ReexecLauncher {
    fn launch(&self, spec: &IsolationSpec, process: &ProcessSpec, cgroup: &CgroupManager) -> Result<i32> {
        let (init_read, init_write) =
            nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| CorralError::kernel("pipe2", e))?;
        let (sync_read, sync_write) =
            nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| CorralError::kernel("pipe2", e))?;
        let stdio = open_stdio(&process.stdio)?;

        // Everything the child touches is built here: it must not allocate.
        let init_fd = init_read.as_raw_fd();
        let sync_fd = sync_write.as_raw_fd();
        let exe = cstring(self.exe.as_os_str().as_bytes())?;
        let init_arg = cstring(constants::INIT_ARG)?;
        let init_env = cstring(format!("{INIT_PIPE_ENV}={init_fd}"))?;
        let sync_env = cstring(format!("{SYNC_PIPE_ENV}={sync_fd}"))?;
        let argv = [exe.as_ptr(), init_arg.as_ptr(), std::ptr::null()];
        let envp = [init_env.as_ptr(), sync_env.as_ptr(), std::ptr::null()];
        let stdio_fds = stdio
            .as_ref()
            .map(|s| (s.stdin.as_raw_fd(), s.output.as_raw_fd()));

        let child = move || -> isize {
            // SAFETY: only async-signal-safe libc calls on fds and pointers
            // prepared by the parent; the child either execs or exits.
            unsafe {
                if let Some((stdin, output)) = stdio_fds {
                    let _ = libc::dup2(stdin, 0);
                    let _ = libc::dup2(output, 1);
                    let _ = libc::dup2(output, 2);
                }
                let _ = libc::fcntl(init_fd, libc::F_SETFD, 0);
                let _ = libc::fcntl(sync_fd, libc::F_SETFD, 0);
                let _ = libc::execve(argv[0], argv.as_ptr(), envp.as_ptr());
                let _ = libc::write(
                    sync_fd,
                    EXEC_FAILED_MESSAGE.as_ptr().cast(),
                    EXEC_FAILED_MESSAGE.len(),
                );
                libc::_exit(EXEC_FAILED_STATUS)
            }
        };

        let mut stack = vec![0u8; CHILD_STACK_SIZE];
        let flags = namespace::clone_flags(&spec.namespaces);
        // SAFETY: the child gets a private copy of the address space (no
        // CLONE_VM) and runs only the closure above, which execs or exits.
        let pid = unsafe {
            nix::sched::clone(Box::new(child), &mut stack, flags, Some(libc::SIGCHLD))
        }
        .map_err(|e| CorralError::kernel("clone", e))?;
        drop(init_read);
        drop(sync_write);
        drop(stdio);
        tracing::debug!(pid = pid.as_raw(), ?flags, "cloned init process");

        if let Err(e) = cgroup.add_process(pid.as_raw()) {
            kill_and_reap(pid);
            return Err(e);
        }

        let config = InitConfig {
            spec: spec.clone(),
            process: process.clone(),
        };
        send_config(init_write, &config);

        match read_sync(sync_read) {
            Ok(None) => {
                tracing::info!(pid = pid.as_raw(), command = ?process.args, "init process started");
                Ok(pid.as_raw())
            }
            Ok(Some(message)) => {
                kill_and_reap(pid);
                Err(CorralError::kernel("start init process", message))
            }
            Err(e) => {
                kill_and_reap(pid);
                Err(e)
            }
        }
    }
}

/// Writes the init config. A child that already died closes its end; its
/// report on the sync pipe explains why, so write errors are only logged.
fn send_config(init_write: OwnedFd, config: &InitConfig) {
    let mut pipe = File::from(init_write);
    if let Err(e) = serde_json::to_writer(&mut pipe, config) {
        tracing::warn!(error = %e, "could not send init config");
    }
}

/// Reads the sync pipe to EOF. `None` means the init role exec'd.
fn read_sync(sync_read: OwnedFd) -> Result<Option<String>> {
    let mut raw = Vec::new();
    let _ = File::from(sync_read)
        .read_to_end(&mut raw)
        .map_err(|e| CorralError::kernel("read sync pipe", e))?;
    if raw.is_empty() {
        return Ok(None);
    }
    let message = serde_json::from_slice::<SyncMessage>(&raw).map_err(|e| {
        CorralError::ProtocolViolation {
            message: format!("malformed sync message: {e}"),
        }
    })?;
    Ok(Some(message.message))
}

fn kill_and_reap(pid: Pid) {
    let _ = kill(pid, Signal::SIGKILL);
    let _ = waitpid(pid, None);
}

/// Runs container processes directly on the host.
///
/// No namespaces, mounts, or capability changes are applied: the command
/// runs in its own process group with `<rootfs>/<cwd>` as working directory
/// and joins the cgroup after it is spawned. Suitable for tests and
/// development without root.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostLauncher;

impl Launcher for HostLauncher {
    fn launch(&self, spec: &IsolationSpec, process: &ProcessSpec, cgroup: &CgroupManager) -> Result<i32> {
        let Some(program) = process.args.first() else {
            return Err(CorralError::Config {
                message: "process has no command".into(),
            });
        };
        let cwd = filesystem::in_rootfs(&spec.rootfs, &process.cwd);
        let resolved = which::which_in(program, process.path_env(), &cwd).map_err(|e| {
            CorralError::ExternalTool {
                tool: program.clone(),
                message: e.to_string(),
            }
        })?;

        let mut command = Command::new(&resolved);
        let _ = command
            .args(&process.args[1..])
            .env_clear()
            .envs(process.env.iter().filter_map(|e| e.split_once('=')))
            .current_dir(&cwd)
            .process_group(0);
        match open_stdio(&process.stdio)? {
            None => {}
            Some(stdio) => {
                let err = stdio
                    .output
                    .try_clone()
                    .map_err(|e| CorralError::io("stdio", e))?;
                let _ = command
                    .stdin(Stdio::from(stdio.stdin))
                    .stdout(Stdio::from(stdio.output))
                    .stderr(Stdio::from(err));
            }
        }

        let child = command
            .spawn()
            .map_err(|e| CorralError::io(&resolved, e))?;
        let pid = i32::try_from(child.id()).map_err(|e| CorralError::kernel("spawn", e))?;
        if let Err(e) = cgroup.add_process(pid) {
            kill_and_reap(Pid::from_raw(pid));
            return Err(e);
        }
        tracing::info!(pid, command = ?process.args, "host process started");
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::Path;

    use corral_common::types::ContainerId;
    use corral_core::spec::{self, IsolationPolicy};

    use super::*;

    fn fixture(dir: &Path) -> (IsolationSpec, CgroupManager) {
        let rootfs = dir.join("rootfs");
        std::fs::create_dir_all(&rootfs).unwrap();
        let spec = spec::build(&ContainerId::new("c1"), &rootfs, &IsolationPolicy::default());
        let cgroup = CgroupManager::create(&dir.join("cgroup"), &spec.cgroup).unwrap();
        (spec, cgroup)
    }

    #[test]
    fn host_launcher_runs_command_and_joins_cgroup() {
        let dir = tempfile::tempdir().unwrap();
        let (spec, cgroup) = fixture(dir.path());
        let log = dir.path().join("logs/out.log");
        let mut process = ProcessSpec::init(vec!["sh".into(), "-c".into(), "echo hello; pwd".into()]);
        process.stdio = IoBinding::File(log.clone());

        let pid = HostLauncher.launch(&spec, &process, &cgroup).unwrap();
        let _ = waitpid(Pid::from_raw(pid), None).unwrap();

        assert_eq!(cgroup.procs().unwrap(), vec![pid]);
        let output = logs::read_log(&log).unwrap();
        let rootfs = std::fs::canonicalize(&spec.rootfs).unwrap();
        assert_eq!(output, format!("hello\n{}\n", rootfs.display()));
    }

    #[test]
    fn host_launcher_rejects_unknown_command() {
        let dir = tempfile::tempdir().unwrap();
        let (spec, cgroup) = fixture(dir.path());
        let process = ProcessSpec::init(vec!["definitely-not-a-command-xyz".into()]);
        let err = HostLauncher.launch(&spec, &process, &cgroup).unwrap_err();
        assert!(matches!(err, CorralError::ExternalTool { .. }));
    }

    #[test]
    fn empty_command_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let (spec, cgroup) = fixture(dir.path());
        let err = HostLauncher
            .launch(&spec, &ProcessSpec::init(Vec::new()), &cgroup)
            .unwrap_err();
        assert!(matches!(err, CorralError::Config { .. }));
    }

    #[test]
    fn sync_pipe_eof_means_success() {
        let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC).unwrap();
        drop(write);
        assert_eq!(read_sync(read).unwrap(), None);
    }

    #[test]
    fn sync_pipe_carries_failure_message() {
        let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC).unwrap();
        let mut w = File::from(write);
        w.write_all(EXEC_FAILED_MESSAGE).unwrap();
        drop(w);
        assert_eq!(
            read_sync(read).unwrap().as_deref(),
            Some("failed to re-exec runtime binary")
        );
    }

    #[test]
    fn garbage_on_sync_pipe_is_a_protocol_violation() {
        let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC).unwrap();
        let mut w = File::from(write);
        w.write_all(b"not json").unwrap();
        drop(w);
        assert!(matches!(
            read_sync(read),
            Err(CorralError::ProtocolViolation { .. })
        ));
    }
}
