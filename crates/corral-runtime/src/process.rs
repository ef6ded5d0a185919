//! Description of the process a container runs.
//!
//! A [`ProcessSpec`] travels from the state store through a launcher to the
//! init role, which executes it after the namespaces are in place.

use std::path::PathBuf;

use corral_core::spec::IsolationSpec;
use serde::{Deserialize, Serialize};

/// Where a container's stdio is connected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoBinding {
    /// `/dev/null` for stdin, stdout, and stderr.
    #[default]
    Null,
    /// stdin from `/dev/null`; stdout and stderr appended to a host file.
    File(PathBuf),
    /// The runtime's own stdio.
    Inherit,
}

/// Command line, environment, and identity of a container process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Program and arguments. The program is resolved against `PATH`.
    pub args: Vec<String>,
    /// `KEY=value` environment entries.
    pub env: Vec<String>,
    /// Working directory inside the container.
    pub cwd: PathBuf,
    /// `root`, `<uid>`, or `<uid>:<gid>`.
    pub user: String,
    /// Whether this is the namespace's init process.
    pub init: bool,
    /// Stdio wiring.
    pub stdio: IoBinding,
}

impl ProcessSpec {
    /// Builds an init process spec running `args` as root in `/`.
    #[must_use]
    pub fn init(args: Vec<String>) -> Self {
        Self {
            args,
            env: vec![corral_common::constants::DEFAULT_PATH_ENV.to_string()],
            cwd: PathBuf::from("/"),
            user: "root".into(),
            init: true,
            stdio: IoBinding::Null,
        }
    }

    /// Value of `PATH` in this process's environment, if set.
    #[must_use]
    pub fn path_env(&self) -> Option<&str> {
        self.env.iter().find_map(|e| e.strip_prefix("PATH="))
    }
}

/// Everything the init role needs, sent over the init pipe as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitConfig {
    /// Isolation to finish from inside the namespaces.
    pub spec: IsolationSpec,
    /// Process to execute once isolation is complete.
    pub process: ProcessSpec,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_spec_defaults() {
        let spec = ProcessSpec::init(vec!["/pause".into()]);
        assert!(spec.init);
        assert_eq!(spec.user, "root");
        assert_eq!(spec.stdio, IoBinding::Null);
        assert_eq!(
            spec.path_env(),
            Some("/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin")
        );
    }

    #[test]
    fn path_env_absent() {
        let mut spec = ProcessSpec::init(vec!["true".into()]);
        spec.env = vec!["HOME=/root".into()];
        assert_eq!(spec.path_env(), None);
    }
}
