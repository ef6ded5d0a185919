//! End-to-end sandbox and container lifecycles on the native backend.
//!
//! Processes are started with the host launcher and cgroups live in a
//! temporary directory, so these run without privileges. Network plugins
//! are shell scripts that log every call.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use corral_common::config::RuntimeConfig;
use corral_common::context::OpContext;
use corral_common::error::CorralError;
use corral_common::types::{ContainerId, ContainerState};
use corral_runtime::backend::{NativeBackend, RuntimeBackend};
use corral_runtime::cri::{
    ContainerConfig, ContainerFilter, ContainerMetadata, ImageSpec, PodSandboxConfig, PodSandboxFilter,
    PodSandboxMetadata, SandboxState,
};
use corral_runtime::launcher::HostLauncher;
use corral_runtime::logs;

const NETWORK: &str = r#"{
  "cniVersion": "1.0.0",
  "name": "podnet",
  "plugins": [ { "type": "fakebridge" } ]
}"#;

struct Fixture {
    dir: tempfile::TempDir,
    calls: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        for sub in ["net.d", "bin", "cgroup", "logs"] {
            std::fs::create_dir_all(dir.path().join(sub)).expect("mkdir");
        }
        write_archive(&dir.path().join("rootfs.tar"));
        std::fs::write(dir.path().join("net.d/10-podnet.conflist"), NETWORK).expect("network config");
        let calls = dir.path().join("calls.log");
        let fixture = Self { dir, calls };
        fixture.plugin(&bridge_script(&fixture.calls, false));
        fixture
    }

    fn path(&self, sub: &str) -> PathBuf {
        self.dir.path().join(sub)
    }

    fn plugin(&self, body: &str) {
        let path = self.path("bin/fakebridge");
        std::fs::write(&path, body).expect("write plugin");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    fn config(&self, network_namespace: bool) -> RuntimeConfig {
        let mut config = RuntimeConfig {
            data_root: self.path("data"),
            state_root: self.path("state"),
            cgroup_root: self.path("cgroup"),
            image_archive: self.path("rootfs.tar"),
            sandbox_command: vec!["sleep".into(), "30".into()],
            network_namespace,
            ..RuntimeConfig::default()
        };
        config.cni.bin_dirs = vec![self.path("bin")];
        config.cni.conf_dir = self.path("net.d");
        config.cni.cache_dir = self.path("cni-cache");
        config
    }

    fn backend(&self, network_namespace: bool) -> NativeBackend {
        NativeBackend::with_launcher(self.config(network_namespace), Arc::new(HostLauncher))
    }

    fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.calls)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn write_archive(path: &Path) {
    let mut builder = tar::Builder::new(std::fs::File::create(path).expect("create archive"));
    for dir in ["bin/", "etc/", "tmp/"] {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        builder
            .append_data(&mut header, dir, std::io::empty())
            .expect("append dir");
    }
    let body = b"corral\n";
    let mut header = tar::Header::new_gnu();
    header.set_mode(0o644);
    header.set_size(body.len() as u64);
    builder
        .append_data(&mut header, "etc/hostname", &body[..])
        .expect("append file");
    builder.finish().expect("finish archive");
}

/// A bridge plugin that records whether the namespace path existed.
fn bridge_script(log: &Path, fail_add: bool) -> String {
    let add = if fail_add {
        r#"printf '{"cniVersion":"1.0.0","code":7,"msg":"no addresses left"}'; exit 1"#
    } else {
        r#"printf '{"cniVersion":"1.0.0","interfaces":[{"name":"%s","sandbox":"%s"}],"ips":[{"address":"10.88.0.7/16","gateway":"10.88.0.1","interface":0}]}' "$CNI_IFNAME" "$CNI_NETNS""#
    };
    format!(
        r#"#!/bin/sh
cat >/dev/null
if [ -n "$CNI_NETNS" ] && [ -e "$CNI_NETNS" ]; then netns=yes; else netns=no; fi
echo "$CNI_COMMAND $CNI_CONTAINERID netns=$netns args=$CNI_ARGS" >> {log}
if [ "$CNI_COMMAND" = "ADD" ]; then
  {add}
fi
"#,
        log = log.display()
    )
}

fn pod(name: &str) -> PodSandboxConfig {
    PodSandboxConfig {
        metadata: PodSandboxMetadata {
            name: name.into(),
            namespace: "default".into(),
            uid: "abc123".into(),
            attempt: 0,
        },
        ..PodSandboxConfig::default()
    }
}

fn container(name: &str, command: &[&str]) -> ContainerConfig {
    ContainerConfig {
        metadata: ContainerMetadata {
            name: name.into(),
            attempt: 0,
        },
        image: ImageSpec {
            image: "busybox".into(),
        },
        command: command.iter().map(ToString::to_string).collect(),
        log_path: format!("{name}/0.log"),
        ..ContainerConfig::default()
    }
}

fn wait_for_state(backend: &NativeBackend, id: &ContainerId, want: ContainerState) {
    let ctx = OpContext::background();
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = backend.container_status(&ctx, id).expect("status");
        if status.state == want {
            return;
        }
        assert!(Instant::now() < deadline, "container stuck in {}", status.state);
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn sandbox_network_is_attached_after_start_and_detached_before_kill() {
    let fx = Fixture::new();
    let backend = fx.backend(true);
    let ctx = OpContext::background();

    let id = backend.run_pod_sandbox(&ctx, &pod("web")).expect("run sandbox");
    assert_eq!(id.as_str(), "k8s_POD_web_default_abc123");

    let status = backend.pod_sandbox_status(&ctx, &id).expect("status");
    assert_eq!(status.state, SandboxState::SandboxReady);
    assert_eq!(status.ip.as_deref(), Some("10.88.0.7"));
    assert!(status.network_namespace.is_some());

    let calls = fx.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("ADD k8s_POD_web_default_abc123 netns=yes"));
    assert!(calls[0].contains("K8S_POD_NAME=web"));
    assert!(calls[0].contains("K8S_POD_NAMESPACE=default"));

    backend.stop_pod_sandbox(&ctx, &id).expect("stop sandbox");
    let dels: Vec<String> = fx.calls().into_iter().filter(|c| c.starts_with("DEL")).collect();
    assert_eq!(dels.len(), 1);
    assert!(dels[0].contains("netns=yes"), "teardown ran after the namespace died: {}", dels[0]);

    let status = backend.pod_sandbox_status(&ctx, &id).expect("status after stop");
    assert_eq!(status.state, SandboxState::SandboxNotready);
    assert_eq!(status.ip, None);
    assert_eq!(status.network_namespace, None);

    // Stopping again does not detach twice.
    backend.stop_pod_sandbox(&ctx, &id).expect("second stop");
    assert_eq!(fx.calls().iter().filter(|c| c.starts_with("DEL")).count(), 1);

    backend.remove_pod_sandbox(&ctx, &id).expect("remove sandbox");
    assert!(!backend.factory().exists(&id));
    assert!(!backend.container_dir(&id).exists());
    backend.remove_pod_sandbox(&ctx, &id).expect("second remove");
    assert!(backend.pod_sandbox_status(&ctx, &id).unwrap_err().is_not_found());
}

#[test]
fn failed_network_setup_reports_the_running_sandbox() {
    let fx = Fixture::new();
    fx.plugin(&bridge_script(&fx.calls, true));
    let backend = fx.backend(true);
    let ctx = OpContext::background();

    let err = backend.run_pod_sandbox(&ctx, &pod("web")).unwrap_err();
    let CorralError::NetworkSetup { sandbox_id, .. } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(sandbox_id, "k8s_POD_web_default_abc123");

    let id = ContainerId::new(sandbox_id);
    let status = backend.pod_sandbox_status(&ctx, &id).expect("status");
    assert_eq!(status.state, SandboxState::SandboxReady);
    assert_eq!(status.ip, None);

    backend.remove_pod_sandbox(&ctx, &id).expect("compensating remove");
    assert!(!backend.factory().exists(&id));
}

#[test]
fn rerunning_a_sandbox_replaces_the_old_one() {
    let fx = Fixture::new();
    let backend = fx.backend(false);
    let ctx = OpContext::background();

    let first = backend.run_pod_sandbox(&ctx, &pod("web")).expect("first run");
    let first_pid = backend.factory().load(&first).unwrap().state().unwrap().live_pid();
    let second = backend.run_pod_sandbox(&ctx, &pod("web")).expect("second run");
    assert_eq!(first, second);
    let second_pid = backend.factory().load(&second).unwrap().state().unwrap().live_pid();
    assert!(second_pid.is_some());
    assert_ne!(first_pid, second_pid);

    let listed = backend
        .list_pod_sandbox(&ctx, &PodSandboxFilter::default())
        .expect("list");
    assert_eq!(listed.len(), 1);
    assert!(backend.container_created_at(&ctx, &second).unwrap() > 0);

    backend.remove_pod_sandbox(&ctx, &second).expect("remove");
}

#[test]
fn container_runs_to_completion_and_writes_its_log() {
    let fx = Fixture::new();
    let backend = fx.backend(false);
    let ctx = OpContext::background();
    let mut sandbox_config = pod("web");
    sandbox_config.log_directory = Some(fx.path("logs"));
    let sandbox = backend.run_pod_sandbox(&ctx, &sandbox_config).expect("run sandbox");

    let config = container("app", &["/bin/sh", "-c", "echo hello from app"]);
    let id = backend
        .create_container(&ctx, &sandbox, &config, &sandbox_config)
        .expect("create");
    let status = backend.container_status(&ctx, &id).expect("status");
    assert_eq!(status.state, ContainerState::Created);
    assert_eq!(status.metadata.name, "app");

    let filter = ContainerFilter {
        pod_sandbox_id: Some(sandbox.to_string()),
        ..ContainerFilter::default()
    };
    let listed = backend.list_containers(&ctx, &filter).expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id.as_str());

    backend.start_container(&ctx, &id).expect("start");
    wait_for_state(&backend, &id, ContainerState::Stopped);
    let status = backend.container_status(&ctx, &id).expect("status");
    assert_eq!(status.exit_code, Some(0));
    assert!(status.started_at > 0);
    assert!(status.finished_at >= status.started_at);

    let log = status.log_path.expect("log path");
    assert_eq!(log, fx.path("logs/app/0.log"));
    assert_eq!(logs::read_log(&log).unwrap(), "hello from app\n");

    backend.remove_pod_sandbox(&ctx, &sandbox).expect("remove sandbox");
    assert!(backend.container_status(&ctx, &id).unwrap_err().is_not_found());
    assert!(!backend.container_dir(&id).exists());
}

#[test]
fn stop_escalates_when_the_grace_period_expires() {
    let fx = Fixture::new();
    let backend = fx.backend(false);
    let ctx = OpContext::background();
    let sandbox_config = pod("web");
    let sandbox = backend.run_pod_sandbox(&ctx, &sandbox_config).expect("run sandbox");

    let config = container("stubborn", &["/bin/sh", "-c", "trap '' TERM; sleep 30"]);
    let id = backend
        .create_container(&ctx, &sandbox, &config, &sandbox_config)
        .expect("create");
    backend.start_container(&ctx, &id).expect("start");
    wait_for_state(&backend, &id, ContainerState::Running);

    backend
        .stop_container(&ctx, &id, Duration::from_millis(200))
        .expect("stop");
    let status = backend.container_status(&ctx, &id).expect("status");
    assert_eq!(status.state, ContainerState::Stopped);
    assert_eq!(status.exit_code, Some(137));

    backend.remove_pod_sandbox(&ctx, &sandbox).expect("remove sandbox");
}

#[test]
fn container_needs_a_known_sandbox() {
    let fx = Fixture::new();
    let backend = fx.backend(false);
    let ctx = OpContext::background();
    let missing = ContainerId::new("k8s_POD_ghost_default_abc123");

    let err = backend
        .create_container(&ctx, &missing, &container("app", &["true"]), &pod("ghost"))
        .unwrap_err();
    assert!(err.is_not_found());
    backend.stop_pod_sandbox(&ctx, &missing).expect("stop unknown sandbox");
    backend.remove_pod_sandbox(&ctx, &missing).expect("remove unknown sandbox");
}

#[test]
fn cancelled_context_stops_before_any_work() {
    let fx = Fixture::new();
    let backend = fx.backend(false);
    let ctx = OpContext::background();
    ctx.cancel();

    let err = backend.run_pod_sandbox(&ctx, &pod("web")).unwrap_err();
    assert!(matches!(err, CorralError::Cancelled { .. }));
    assert!(backend.factory().list_ids().unwrap().is_empty());
}

#[test]
fn failed_sandbox_launch_leaves_nothing_behind() {
    let fx = Fixture::new();
    let mut config = fx.config(false);
    config.sandbox_command = vec!["no-such-binary-xyz".into()];
    let backend = NativeBackend::with_launcher(config, Arc::new(HostLauncher));
    let ctx = OpContext::background();

    let err = backend.run_pod_sandbox(&ctx, &pod("web")).unwrap_err();
    assert!(!matches!(err, CorralError::NetworkSetup { .. }), "unexpected error: {err}");

    let id = ContainerId::new("k8s_POD_web_default_abc123");
    assert!(!backend.factory().exists(&id));
    assert!(!backend.container_dir(&id).exists());
    let listed = backend
        .list_pod_sandbox(&ctx, &PodSandboxFilter::default())
        .expect("list");
    assert!(listed.is_empty());
    assert!(backend.pod_sandbox_status(&ctx, &id).unwrap_err().is_not_found());
}

#[test]
fn failed_container_create_removes_the_rootfs() {
    let fx = Fixture::new();
    let backend = fx.backend(false);
    let ctx = OpContext::background();
    let sandbox_config = pod("web");
    let sandbox = backend.run_pod_sandbox(&ctx, &sandbox_config).expect("run sandbox");

    std::fs::remove_file(fx.path("rootfs.tar")).expect("remove archive");
    let err = backend
        .create_container(&ctx, &sandbox, &container("app", &["true"]), &sandbox_config)
        .unwrap_err();
    assert!(matches!(err, CorralError::Io { .. }), "unexpected error: {err}");

    let left: Vec<_> = std::fs::read_dir(fx.path("data/containers"))
        .expect("containers dir")
        .map(|entry| entry.expect("entry").file_name())
        .collect();
    assert_eq!(left, vec![std::ffi::OsString::from(sandbox.as_str())]);
    assert_eq!(backend.factory().list_ids().unwrap(), vec![sandbox.clone()]);

    backend.remove_pod_sandbox(&ctx, &sandbox).expect("remove sandbox");
}

#[test]
fn failed_container_start_removes_the_container() {
    let fx = Fixture::new();
    let backend = fx.backend(false);
    let ctx = OpContext::background();
    let sandbox_config = pod("web");
    let sandbox = backend.run_pod_sandbox(&ctx, &sandbox_config).expect("run sandbox");

    let id = backend
        .create_container(&ctx, &sandbox, &container("app", &["no-such-binary-xyz"]), &sandbox_config)
        .expect("create");
    assert!(backend.start_container(&ctx, &id).is_err());
    assert!(!backend.factory().exists(&id));
    assert!(!backend.container_dir(&id).exists());

    backend.remove_pod_sandbox(&ctx, &sandbox).expect("remove sandbox");
}

#[test]
fn unreadable_network_record_does_not_block_the_kill() {
    let fx = Fixture::new();
    let backend = fx.backend(true);
    let ctx = OpContext::background();
    let id = backend.run_pod_sandbox(&ctx, &pod("web")).expect("run sandbox");

    std::fs::write(fx.path("state").join(id.as_str()).join("network.json"), "{ not json").expect("corrupt");
    backend.stop_pod_sandbox(&ctx, &id).expect("stop sandbox");

    let pid = backend.factory().load(&id).unwrap().state().unwrap().live_pid();
    assert_eq!(pid, None);
    let listed = backend
        .list_pod_sandbox(&ctx, &PodSandboxFilter::default())
        .expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].state, SandboxState::SandboxNotready);

    backend.remove_pod_sandbox(&ctx, &id).expect("remove sandbox");
}
