//! The container state store.
//!
//! One directory per container ID under the state root:
//!
//! ```text
//! <state_root>/<id>/config.json    isolation spec, written once by create
//! <state_root>/<id>/state.json     init PID, kernel start time, timestamps
//! <state_root>/<id>/<metadata>     records saved by the backend
//! ```
//!
//! [`Factory::create`] only writes files. [`ContainerHandle::run`] is the one
//! call that brings a process into existence. Operations on one ID are
//! serialised by a per-ID lock inside this process; other processes sharing
//! the state root are not coordinated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ContainerState};
use corral_core::cgroup::CgroupManager;
use corral_core::spec::IsolationSpec;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::launcher::{Launcher, ReexecLauncher};
use crate::process::ProcessSpec;

/// Isolation spec file.
pub const CONFIG_FILE: &str = "config.json";
/// Process bookkeeping file.
pub const STATE_FILE: &str = "state.json";

/// Rounds of kill-and-check while waiting for a cgroup to empty.
const DESTROY_ATTEMPTS: u32 = 50;
/// Pause between those rounds.
const DESTROY_INTERVAL: Duration = Duration::from_millis(20);

/// Process bookkeeping persisted in `state.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Host PID of the init process, once started.
    pub pid: Option<i32>,
    /// Kernel start time of `pid` in clock ticks, guards against PID reuse.
    pub start_time: Option<u64>,
    /// Start time in nanoseconds since the epoch.
    pub started_at: Option<i64>,
    /// Exit time in nanoseconds since the epoch.
    pub finished_at: Option<i64>,
    /// Exit code; `128 + signal` when killed by a signal.
    pub exit_code: Option<i32>,
}

impl RunState {
    /// Lifecycle state implied by the bookkeeping.
    #[must_use]
    pub const fn status(&self) -> ContainerState {
        match (self.pid, self.finished_at) {
            (None, _) => ContainerState::Created,
            (Some(_), None) => ContainerState::Running,
            (Some(_), Some(_)) => ContainerState::Stopped,
        }
    }

    /// PID of the init process while it is running.
    #[must_use]
    pub const fn live_pid(&self) -> Option<i32> {
        match self.finished_at {
            None => self.pid,
            Some(_) => None,
        }
    }
}

/// Owner of every container state directory.
#[derive(Debug)]
pub struct Factory {
    state_root: PathBuf,
    cgroup_root: PathBuf,
    launcher: Arc<dyn Launcher>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

fn guard(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Factory {
    /// Creates a store rooted at `state_root` that starts processes with
    /// `launcher` and places them under `cgroup_root`.
    pub fn new(
        state_root: impl Into<PathBuf>,
        cgroup_root: impl Into<PathBuf>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            state_root: state_root.into(),
            cgroup_root: cgroup_root.into(),
            launcher,
            locks: Mutex::default(),
        }
    }

    /// Creates a store that re-executes the running binary as container init.
    ///
    /// # Errors
    ///
    /// Returns an error if the running executable cannot be located.
    pub fn with_reexec(state_root: impl Into<PathBuf>, cgroup_root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(state_root, cgroup_root, Arc::new(ReexecLauncher::new()?)))
    }

    /// Directory holding every container's state directory.
    #[must_use]
    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    fn state_dir(&self, id: &ContainerId) -> Result<PathBuf> {
        let raw = id.as_str();
        if raw.is_empty() || raw == "." || raw == ".." || raw.contains('/') {
            return Err(CorralError::Config {
                message: format!("invalid container id '{raw}'"),
            });
        }
        Ok(self.state_root.join(raw))
    }

    fn lock_for(&self, id: &ContainerId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id.as_str().to_string()).or_default())
    }

    /// Records a new container without starting anything.
    ///
    /// Stale state from an earlier container with the same ID must be
    /// removed with [`Factory::remove_state`] first.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if `id` has a state directory, or an I/O error
    /// if the spec cannot be written.
    pub fn create(&self, id: &ContainerId, spec: &IsolationSpec) -> Result<ContainerHandle> {
        let dir = self.state_dir(id)?;
        let lock = self.lock_for(id);
        let _guard = guard(&lock);

        std::fs::create_dir_all(&self.state_root).map_err(|e| CorralError::io(&self.state_root, e))?;
        match std::fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CorralError::AlreadyExists {
                    kind: "container",
                    id: id.to_string(),
                });
            }
            Err(e) => return Err(CorralError::io(&dir, e)),
        }
        write_json(&dir.join(CONFIG_FILE), spec)?;
        let run_state = RunState::default();
        write_json(&dir.join(STATE_FILE), &run_state)?;
        tracing::info!(id = %id, dir = %dir.display(), "container state created");

        Ok(self.handle(id, dir, spec.clone(), run_state, Arc::clone(&lock)))
    }

    /// Opens the state of an existing container.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `id` has no state directory.
    pub fn load(&self, id: &ContainerId) -> Result<ContainerHandle> {
        let dir = self.state_dir(id)?;
        let lock = self.lock_for(id);
        let (spec, run_state) = {
            let _guard = guard(&lock);
            if !dir.is_dir() {
                return Err(CorralError::NotFound {
                    kind: "container",
                    id: id.to_string(),
                });
            }
            let spec: IsolationSpec = read_json(&dir.join(CONFIG_FILE))?.ok_or_else(|| {
                CorralError::NotFound {
                    kind: "container config",
                    id: id.to_string(),
                }
            })?;
            let run_state: RunState = read_json(&dir.join(STATE_FILE))?.unwrap_or_default();
            (spec, run_state)
        };
        Ok(self.handle(id, dir, spec, run_state, lock))
    }

    fn handle(
        &self,
        id: &ContainerId,
        dir: PathBuf,
        spec: IsolationSpec,
        run_state: RunState,
        lock: Arc<Mutex<()>>,
    ) -> ContainerHandle {
        ContainerHandle {
            id: id.clone(),
            dir,
            cgroup: CgroupManager::open(&self.cgroup_root, &spec.cgroup),
            cgroup_root: self.cgroup_root.clone(),
            spec,
            run_state,
            launcher: Arc::clone(&self.launcher),
            lock,
        }
    }

    /// Returns `true` if `id` has a state directory.
    #[must_use]
    pub fn exists(&self, id: &ContainerId) -> bool {
        self.state_dir(id).is_ok_and(|dir| dir.is_dir())
    }

    /// IDs of every container with a state directory, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the state root exists but cannot be read.
    pub fn list_ids(&self) -> Result<Vec<ContainerId>> {
        let entries = match std::fs::read_dir(&self.state_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CorralError::io(&self.state_root, e)),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CorralError::io(&self.state_root, e))?;
            if entry.path().is_dir() {
                ids.push(ContainerId::new(entry.file_name().to_string_lossy()));
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Deletes a container's state directory. Missing state is not an error.
    ///
    /// Kernel resources are not touched; destroy the handle first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn remove_state(&self, id: &ContainerId) -> Result<()> {
        let dir = self.state_dir(id)?;
        let lock = self.lock_for(id);
        let _guard = guard(&lock);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!(id = %id, "container state removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CorralError::io(&dir, e)),
        }
    }

    /// Stores a JSON record named `name` in the container's state directory.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the container has no state directory, or an
    /// error if the record cannot be written.
    pub fn save_metadata<T: Serialize>(&self, id: &ContainerId, name: &str, value: &T) -> Result<()> {
        let dir = self.existing_dir(id)?;
        write_json(&dir.join(name), value)
    }

    /// Reads a record stored with [`Factory::save_metadata`].
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the container has no state directory, or an
    /// error if the record exists but cannot be parsed.
    pub fn load_metadata<T: DeserializeOwned>(&self, id: &ContainerId, name: &str) -> Result<Option<T>> {
        let dir = self.existing_dir(id)?;
        read_json(&dir.join(name))
    }

    /// Deletes a record. A missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be removed.
    pub fn remove_metadata(&self, id: &ContainerId, name: &str) -> Result<()> {
        let path = self.state_dir(id)?.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CorralError::io(&path, e)),
        }
    }

    fn existing_dir(&self, id: &ContainerId) -> Result<PathBuf> {
        let dir = self.state_dir(id)?;
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(CorralError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
        }
    }
}

/// An instantiated container record.
#[derive(Debug)]
pub struct ContainerHandle {
    id: ContainerId,
    dir: PathBuf,
    spec: IsolationSpec,
    run_state: RunState,
    cgroup: CgroupManager,
    cgroup_root: PathBuf,
    launcher: Arc<dyn Launcher>,
    lock: Arc<Mutex<()>>,
}

enum Liveness {
    Alive,
    Exited(Option<i32>),
}

impl ContainerHandle {
    /// Container ID.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// The spec persisted at creation.
    #[must_use]
    pub const fn spec(&self) -> &IsolationSpec {
        &self.spec
    }

    /// State directory of this container.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Starts the container's init process.
    ///
    /// On failure the handle is destroyed: the cgroup, any partially
    /// started process and the state directory are gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the container was already started, the cgroup
    /// cannot be created, or the launcher fails.
    pub fn run(&mut self, process: &ProcessSpec) -> Result<()> {
        let lock = Arc::clone(&self.lock);
        let _guard = guard(&lock);
        if !process.init {
            return Err(CorralError::Unsupported {
                operation: "run a non-init process",
                backend: "native",
            });
        }
        if self.run_state.pid.is_some() {
            return Err(CorralError::AlreadyExists {
                kind: "container process",
                id: self.id.to_string(),
            });
        }

        let cgroup = CgroupManager::create(&self.cgroup_root, &self.spec.cgroup)?;
        let pid = match self.launcher.launch(&self.spec, process, &cgroup) {
            Ok(pid) => pid,
            Err(e) => {
                tracing::error!(id = %self.id, error = %e, "launch failed, destroying container");
                if let Err(cleanup) = self.destroy_locked() {
                    tracing::warn!(id = %self.id, error = %cleanup, "cleanup after failed launch");
                }
                if let Err(cleanup) = std::fs::remove_dir_all(&self.dir) {
                    tracing::warn!(id = %self.id, error = %cleanup, "state removal after failed launch");
                }
                return Err(e);
            }
        };

        self.run_state = RunState {
            pid: Some(pid),
            start_time: read_proc_stat(pid).map(|stat| stat.start_time),
            started_at: Some(now_nanos()),
            finished_at: None,
            exit_code: None,
        };
        self.persist()?;
        tracing::info!(id = %self.id, pid, "container running");
        Ok(())
    }

    /// Refreshes and returns the process bookkeeping.
    ///
    /// An exited init process is reaped here and its exit recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be probed or the new state
    /// cannot be persisted.
    pub fn state(&mut self) -> Result<&RunState> {
        let lock = Arc::clone(&self.lock);
        let _guard = guard(&lock);
        self.refresh_locked()?;
        Ok(&self.run_state)
    }

    /// Delivers `signal` to the init process, or with `all` to every process
    /// in the container's cgroup. Already-exited processes are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a signal cannot be delivered for a reason other
    /// than the process being gone.
    pub fn signal(&mut self, signal: Signal, all: bool) -> Result<()> {
        let lock = Arc::clone(&self.lock);
        let _guard = guard(&lock);
        self.refresh_locked()?;
        self.signal_locked(signal, all)
    }

    /// Kills every process of the container and removes its cgroup.
    ///
    /// The state directory is kept and records the exit.
    ///
    /// # Errors
    ///
    /// Returns an error if processes cannot be killed or the cgroup cannot be
    /// removed.
    pub fn destroy(&mut self) -> Result<()> {
        let lock = Arc::clone(&self.lock);
        let _guard = guard(&lock);
        self.destroy_locked()
    }

    fn destroy_locked(&mut self) -> Result<()> {
        self.refresh_locked()?;
        self.signal_locked(Signal::SIGKILL, true)?;
        if let Some(pid) = self.run_state.live_pid() {
            let code = reap(pid);
            self.mark_exited(code);
        }

        for _ in 0..DESTROY_ATTEMPTS {
            let live: Vec<i32> = self
                .cgroup
                .procs()?
                .into_iter()
                .filter(|&pid| is_alive(pid))
                .collect();
            if live.is_empty() {
                break;
            }
            for pid in live {
                send(pid, Signal::SIGKILL)?;
            }
            std::thread::sleep(DESTROY_INTERVAL);
        }
        self.cgroup.destroy()?;
        if self.dir.is_dir() {
            self.persist()?;
        }
        tracing::info!(id = %self.id, "container destroyed");
        Ok(())
    }

    fn signal_locked(&self, signal: Signal, all: bool) -> Result<()> {
        let init = self.run_state.live_pid();
        if all {
            if let Some(pid) = init {
                // Reaches host-launched process trees; a re-exec'd init leads
                // no group and this is a no-op.
                let _ = killpg(Pid::from_raw(pid), signal);
            }
            for pid in self.cgroup.procs()? {
                send(pid, signal)?;
            }
        }
        if let Some(pid) = init {
            send(pid, signal)?;
        }
        tracing::debug!(id = %self.id, ?signal, all, "signal delivered");
        Ok(())
    }

    fn refresh_locked(&mut self) -> Result<()> {
        let Some(pid) = self.run_state.live_pid() else {
            return Ok(());
        };
        match probe(pid, self.run_state.start_time)? {
            Liveness::Alive => Ok(()),
            Liveness::Exited(code) => {
                self.mark_exited(code);
                if self.dir.is_dir() {
                    self.persist()?;
                }
                Ok(())
            }
        }
    }

    fn mark_exited(&mut self, code: Option<i32>) {
        self.run_state.exit_code = code.or(self.run_state.exit_code);
        self.run_state.finished_at = Some(now_nanos());
        tracing::info!(id = %self.id, exit_code = ?self.run_state.exit_code, "container exited");
    }

    fn persist(&self) -> Result<()> {
        write_json(&self.dir.join(STATE_FILE), &self.run_state)
    }
}

fn send(pid: i32, signal: Signal) -> Result<()> {
    match kill(Pid::from_raw(pid), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(CorralError::kernel("kill", e)),
    }
}

fn exit_code(status: WaitStatus) -> Option<Option<i32>> {
    match status {
        WaitStatus::Exited(_, code) => Some(Some(code)),
        WaitStatus::Signaled(_, signal, _) => Some(Some(128 + signal as i32)),
        _ => None,
    }
}

fn probe(pid: i32, start_time: Option<u64>) -> Result<Liveness> {
    match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
        Ok(status) => Ok(exit_code(status).map_or(Liveness::Alive, Liveness::Exited)),
        // Not our child: started by an earlier runtime process.
        Err(Errno::ECHILD) => Ok(match read_proc_stat(pid) {
            Some(stat) if stat.state != 'Z' && start_time.is_none_or(|t| t == stat.start_time) => {
                Liveness::Alive
            }
            _ => Liveness::Exited(None),
        }),
        Err(e) => Err(CorralError::kernel("waitpid", e)),
    }
}

/// Blocks until `pid` exits if it is our child.
fn reap(pid: i32) -> Option<i32> {
    waitpid(Pid::from_raw(pid), None)
        .ok()
        .and_then(exit_code)
        .flatten()
}

fn is_alive(pid: i32) -> bool {
    read_proc_stat(pid).is_some_and(|stat| stat.state != 'Z')
}

/// The two `/proc/<pid>/stat` fields the store cares about.
struct ProcStat {
    state: char,
    start_time: u64,
}

fn read_proc_stat(pid: i32) -> Option<ProcStat> {
    let raw = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // The command name may contain spaces and parentheses.
    let rest = &raw[raw.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let start_time = fields.nth(18)?.parse().ok()?;
    Some(ProcStat { state, start_time })
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Writes `value` as JSON through a temporary file and a rename.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, raw).map_err(|e| CorralError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| CorralError::io(path, e))
}

/// Reads a JSON file. A missing file is `None`.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read(path) {
        Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CorralError::io(path, e)),
    }
}
