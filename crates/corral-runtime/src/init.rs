//! The init role of the runtime binary.
//!
//! The binary has two roles chosen by its first argument. The service role
//! is ordinary program startup. The init role runs inside a freshly cloned
//! child: it reads its [`InitConfig`] from the init pipe, finishes isolation
//! from inside the namespaces, and `execve`s the container command. It never
//! returns to the caller. `main` must call [`intercept`] before parsing
//! arguments or starting any thread.

use std::convert::Infallible;
use std::ffi::{CString, OsStr};
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use corral_common::constants;
use corral_common::error::{CorralError, Result};
use corral_core::capability;
use corral_core::filesystem;
use corral_core::namespace::{self, NamespaceKind, uts};
use nix::unistd::{Gid, Uid};

use crate::launcher::{INIT_PIPE_ENV, SYNC_PIPE_ENV, SyncMessage};
use crate::process::InitConfig;

/// Which half of the binary a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// Normal startup.
    Service,
    /// Container init, entered through the reserved first argument.
    Init,
}

impl ProcessRole {
    /// Determines the role from an argument vector (program name first).
    pub fn detect<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let is_init = args
            .into_iter()
            .nth(1)
            .is_some_and(|arg| arg.as_ref() == OsStr::new(constants::INIT_ARG));
        if is_init { Self::Init } else { Self::Service }
    }
}

/// Diverts the process into the init role if it was started as one.
///
/// Returns only in the service role.
pub fn intercept() {
    if ProcessRole::detect(std::env::args_os()) == ProcessRole::Init {
        run();
    }
}

/// Runs the init role. Exits the process on any failure.
pub fn run() -> ! {
    let Ok(sync_fd) = env_fd(SYNC_PIPE_ENV) else {
        std::process::exit(1);
    };
    let mut sync = File::from(sync_fd);
    let err = match become_init(&sync) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    let report = SyncMessage {
        message: err.to_string(),
    };
    if let Ok(raw) = serde_json::to_vec(&report) {
        let _ = sync.write_all(&raw);
    }
    std::process::exit(1)
}

/// Finishes isolation and replaces the process image with the container
/// command. Only returns on failure.
fn become_init(sync: &File) -> Result<Infallible> {
    ensure_single_thread()?;

    let init_pipe = File::from(env_fd(INIT_PIPE_ENV)?);
    let config: InitConfig = serde_json::from_reader(init_pipe)?;
    let InitConfig { spec, process } = config;

    for entry in spec.joined_namespaces() {
        namespace::join(entry)?;
    }
    filesystem::prepare_rootfs(&spec)?;
    if spec.has_namespace(NamespaceKind::Uts) {
        uts::set_hostname(&spec.hostname)?;
    }

    capability::drop_bounding(&spec.capabilities.bounding)?;
    let (uid, gid) = parse_user(&process.user)?;
    if !uid.is_root() || gid.as_raw() != 0 {
        capability::keep_across_setuid()?;
        nix::unistd::setgroups(&[gid]).map_err(|e| CorralError::kernel("setgroups", e))?;
        nix::unistd::setresgid(gid, gid, gid).map_err(|e| CorralError::kernel("setresgid", e))?;
        nix::unistd::setresuid(uid, uid, uid).map_err(|e| CorralError::kernel("setresuid", e))?;
    }
    capability::apply_process_sets(&spec.capabilities)?;

    nix::unistd::chdir(&process.cwd).map_err(|e| CorralError::kernel("chdir", e))?;
    set_cloexec(sync.as_raw_fd())?;

    let Some(program) = process.args.first() else {
        return Err(CorralError::Config {
            message: "process has no command".into(),
        });
    };
    let path = process
        .path_env()
        .unwrap_or_else(|| constants::DEFAULT_PATH_ENV.trim_start_matches("PATH="));
    let resolved = which::which_in(program, Some(path), &process.cwd).map_err(|e| {
        CorralError::ExternalTool {
            tool: program.clone(),
            message: e.to_string(),
        }
    })?;

    let to_c = |s: &str| {
        CString::new(s).map_err(|e| CorralError::ProtocolViolation {
            message: format!("argument contains a NUL byte: {e}"),
        })
    };
    let exe = to_c(&resolved.to_string_lossy())?;
    let argv = process.args.iter().map(|a| to_c(a)).collect::<Result<Vec<_>>>()?;
    let envp = process.env.iter().map(|e| to_c(e)).collect::<Result<Vec<_>>>()?;
    nix::unistd::execve(&exe, &argv, &envp).map_err(|e| CorralError::kernel("execve", e))
}

/// Namespace-entry syscalls are per thread; the init role must have one.
fn ensure_single_thread() -> Result<()> {
    let threads = std::fs::read_dir("/proc/self/task")
        .map_err(|e| CorralError::io("/proc/self/task", e))?
        .count();
    if threads != 1 {
        return Err(CorralError::ProtocolViolation {
            message: format!("init role started with {threads} threads"),
        });
    }
    Ok(())
}

/// Takes ownership of the fd whose number is stored in `var`.
fn env_fd(var: &str) -> Result<OwnedFd> {
    let raw: RawFd = std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| CorralError::ProtocolViolation {
            message: format!("{var} is missing or invalid"),
        })?;
    // SAFETY: the launcher passes an fd it opened for this process alone and
    // nothing else in the init role refers to it.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

fn set_cloexec(fd: RawFd) -> Result<()> {
    // SAFETY: F_SETFD on an fd this process owns; no pointers involved.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc != 0 {
        return Err(CorralError::kernel("fcntl", std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Parses `root`, `<uid>`, or `<uid>:<gid>`. A bare UID doubles as the GID.
fn parse_user(user: &str) -> Result<(Uid, Gid)> {
    let invalid = || CorralError::Config {
        message: format!("invalid user '{user}'"),
    };
    if user.is_empty() || user == "root" {
        return Ok((Uid::from_raw(0), Gid::from_raw(0)));
    }
    let (uid, gid) = match user.split_once(':') {
        Some((uid, gid)) => (uid, gid),
        None => (user, user),
    };
    let uid = uid.parse().map_err(|_| invalid())?;
    let gid = gid.parse().map_err(|_| invalid())?;
    Ok((Uid::from_raw(uid), Gid::from_raw(gid)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_argument_selects_init_role() {
        assert_eq!(ProcessRole::detect(["corral", "init"]), ProcessRole::Init);
    }

    #[test]
    fn everything_else_is_the_service_role() {
        assert_eq!(ProcessRole::detect(["corral"]), ProcessRole::Service);
        assert_eq!(ProcessRole::detect(["corral", "runp", "init"]), ProcessRole::Service);
        assert_eq!(ProcessRole::detect(["corral", "--init"]), ProcessRole::Service);
        assert_eq!(ProcessRole::detect(Vec::<String>::new()), ProcessRole::Service);
    }

    #[test]
    fn users_parse() {
        assert_eq!(
            parse_user("root").unwrap(),
            (Uid::from_raw(0), Gid::from_raw(0))
        );
        assert_eq!(
            parse_user("1000").unwrap(),
            (Uid::from_raw(1000), Gid::from_raw(1000))
        );
        assert_eq!(
            parse_user("1000:100").unwrap(),
            (Uid::from_raw(1000), Gid::from_raw(100))
        );
        assert!(matches!(
            parse_user("nobody"),
            Err(CorralError::Config { .. })
        ));
    }

    #[test]
    fn missing_pipe_variable_is_a_protocol_violation() {
        let err = env_fd("_CORRAL_TEST_UNSET_PIPE").unwrap_err();
        assert!(matches!(err, CorralError::ProtocolViolation { .. }));
    }
}
