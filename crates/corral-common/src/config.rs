//! Global configuration model for the corral runtime.
//!
//! The configuration is selected once at startup. Every field has a default,
//! so an empty or partial JSON file is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{CorralError, Result};

/// Execution backend selected at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Builds containers directly from kernel primitives.
    #[default]
    Native,
    /// Delegates to an existing container engine's command-line tool.
    Shell,
}

/// Root configuration for the corral runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Which backend serves lifecycle requests.
    pub backend: BackendKind,
    /// Directory holding one extracted rootfs tree per container.
    pub data_root: PathBuf,
    /// Directory holding one state directory per container.
    pub state_root: PathBuf,
    /// Mount point of the cgroup v2 hierarchy.
    pub cgroup_root: PathBuf,
    /// Parent cgroup every container cgroup is created under.
    pub cgroup_parent: String,
    /// Flattened archive unpacked as every container's rootfs.
    pub image_archive: PathBuf,
    /// Infrastructure image reference for sandboxes.
    pub sandbox_image: String,
    /// Command the sandbox init process runs.
    pub sandbox_command: Vec<String>,
    /// Memory ceiling applied to each container cgroup.
    pub memory_limit_bytes: u64,
    /// Whether containers get their own network namespace.
    ///
    /// Off by default to ease debugging. CNI attachment only runs when on.
    pub network_namespace: bool,
    /// Network plugin settings.
    pub cni: CniSettings,
    /// Shell-out backend settings.
    pub shell: ShellSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            data_root: PathBuf::from(constants::DEFAULT_DATA_ROOT),
            state_root: PathBuf::from(constants::DEFAULT_STATE_ROOT),
            cgroup_root: PathBuf::from(constants::CGROUP_V2_PATH),
            cgroup_parent: constants::APP_NAME.to_string(),
            image_archive: PathBuf::from(constants::DEFAULT_IMAGE_ARCHIVE),
            sandbox_image: constants::DEFAULT_SANDBOX_IMAGE.to_string(),
            sandbox_command: vec![
                "/bin/sh".into(),
                "-c".into(),
                "while true; do sleep 3600; done".into(),
            ],
            memory_limit_bytes: constants::DEFAULT_MEMORY_LIMIT_BYTES,
            network_namespace: false,
            cni: CniSettings::default(),
            shell: ShellSettings::default(),
        }
    }
}

impl RuntimeConfig {
    /// Loads a configuration file, filling unspecified fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| CorralError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), backend = ?config.backend, "configuration loaded");
        Ok(config)
    }

    /// Checks values that serde cannot reject on its own.
    ///
    /// # Errors
    ///
    /// Returns `CorralError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.sandbox_command.is_empty() {
            return Err(CorralError::Config {
                message: "sandbox_command must not be empty".into(),
            });
        }
        if self.cgroup_parent.is_empty() || self.cgroup_parent.contains('/') {
            return Err(CorralError::Config {
                message: format!("invalid cgroup_parent '{}'", self.cgroup_parent),
            });
        }
        if self.cni.enabled && self.cni.bin_dirs.is_empty() {
            return Err(CorralError::Config {
                message: "cni.bin_dirs must list at least one directory".into(),
            });
        }
        Ok(())
    }
}

/// Network plugin (CNI) settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CniSettings {
    /// Whether the network coordinator is constructed at all.
    pub enabled: bool,
    /// Directories searched, in order, for plugin binaries.
    pub bin_dirs: Vec<PathBuf>,
    /// Directory scanned for network configuration files.
    pub conf_dir: PathBuf,
    /// Directory where plugin results are cached.
    pub cache_dir: PathBuf,
}

impl Default for CniSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bin_dirs: vec![PathBuf::from(constants::DEFAULT_CNI_BIN_DIR)],
            conf_dir: PathBuf::from(constants::DEFAULT_CNI_CONF_DIR),
            cache_dir: PathBuf::from(constants::DEFAULT_CNI_CACHE_DIR),
        }
    }
}

/// Settings for the backend that shells out to a container engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellSettings {
    /// Engine binary name or path.
    pub binary: PathBuf,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(constants::DEFAULT_SHELL_BINARY),
        }
    }
}
