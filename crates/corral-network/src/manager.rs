//! The network attachment coordinator.

use std::path::{Path, PathBuf};

use corral_common::config::CniSettings;
use corral_common::context::OpContext;
use corral_common::error::{CorralError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{self, NetworkConfigList};
use crate::exec::{self, CniCommand, RuntimeConf};
use crate::result::CniResult;

/// Cached record of one successful `ADD`, read back by `DEL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry {
    kind: String,
    container_id: String,
    if_name: String,
    network_name: String,
    netns: PathBuf,
    result: Value,
}

const CACHE_KIND: &str = "cniCacheV1";

/// Drives CNI plugins against pod network namespaces.
#[derive(Debug, Clone)]
pub struct CniManager {
    conf_dir: PathBuf,
    bin_dirs: Vec<PathBuf>,
    cache_dir: PathBuf,
}

impl CniManager {
    /// Creates a coordinator. Nothing is read until the first operation.
    #[must_use]
    pub fn new(conf_dir: impl Into<PathBuf>, bin_dirs: Vec<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
            bin_dirs,
            cache_dir: cache_dir.into(),
        }
    }

    /// Creates a coordinator from runtime settings.
    #[must_use]
    pub fn from_settings(settings: &CniSettings) -> Self {
        Self::new(
            settings.conf_dir.clone(),
            settings.bin_dirs.clone(),
            settings.cache_dir.clone(),
        )
    }

    /// Loads the primary network configuration list.
    ///
    /// # Errors
    ///
    /// Returns `CorralError::Config` if the configuration directory holds no
    /// usable file.
    pub fn load_config(&self) -> Result<NetworkConfigList> {
        config::load_dir(&self.conf_dir)
    }

    /// Attaches the namespace in `rt` to the primary network.
    ///
    /// Plugins run in list order, each receiving the previous one's result.
    /// A failure part-way leaves earlier plugins' work in place; callers
    /// clean up with [`Self::tear_down`].
    ///
    /// # Errors
    ///
    /// Returns the first plugin failure, a configuration error, or
    /// `CorralError::Cancelled`.
    pub fn set_up(&self, ctx: &OpContext, rt: &RuntimeConf) -> Result<CniResult> {
        let list = self.load_config()?;
        tracing::info!(
            id = %rt.container_id,
            netns = %rt.netns.display(),
            network = %list.name,
            "attaching network"
        );

        let mut prev: Option<Value> = None;
        for plugin in &list.plugins {
            let plugin_type = NetworkConfigList::plugin_type(plugin);
            let stdin = plugin_stdin(&list, plugin, prev.as_ref())?;
            let out = exec::invoke(ctx, plugin_type, &self.bin_dirs, CniCommand::Add, rt, &stdin)?;
            let value: Value = serde_json::from_slice(&out).map_err(|e| CorralError::ExternalTool {
                tool: plugin_type.to_string(),
                message: format!("malformed result: {e}"),
            })?;
            prev = Some(value);
        }

        let raw = prev.unwrap_or_else(|| Value::Object(Map::new()));
        let result: CniResult =
            serde_json::from_value(raw.clone()).map_err(|e| CorralError::ExternalTool {
                tool: list.name.clone(),
                message: format!("malformed result: {e}"),
            })?;
        self.write_cache(&list.name, rt, raw)?;
        tracing::info!(id = %rt.container_id, ip = result.primary_ip().unwrap_or("-"), "network attached");
        Ok(result)
    }

    /// Detaches the namespace in `rt` from the primary network.
    ///
    /// Plugins run in reverse order with the cached `ADD` result as
    /// `prevResult`. Plugins are expected to treat `DEL` of something
    /// already gone as success, so repeated calls are harmless.
    ///
    /// # Errors
    ///
    /// Returns the first plugin failure, a configuration error, or
    /// `CorralError::Cancelled`.
    pub fn tear_down(&self, ctx: &OpContext, rt: &RuntimeConf) -> Result<()> {
        let list = self.load_config()?;
        tracing::info!(id = %rt.container_id, network = %list.name, "detaching network");

        let cached = self.read_cache(&list.name, rt)?.map(|entry| entry.result);
        for plugin in list.plugins.iter().rev() {
            let plugin_type = NetworkConfigList::plugin_type(plugin);
            let stdin = plugin_stdin(&list, plugin, cached.as_ref())?;
            let _ = exec::invoke(ctx, plugin_type, &self.bin_dirs, CniCommand::Del, rt, &stdin)?;
        }

        let path = self.cache_path(&list.name, rt);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CorralError::io(&path, e)),
        }
        tracing::info!(id = %rt.container_id, "network detached");
        Ok(())
    }

    /// The result cached by the last successful `ADD` for `rt`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or cache file cannot be read.
    pub fn cached_result(&self, rt: &RuntimeConf) -> Result<Option<CniResult>> {
        let list = self.load_config()?;
        self.read_cache(&list.name, rt)?
            .map(|entry| serde_json::from_value(entry.result).map_err(CorralError::from))
            .transpose()
    }

    fn cache_path(&self, network: &str, rt: &RuntimeConf) -> PathBuf {
        self.cache_dir
            .join("results")
            .join(format!("{network}-{}-{}", rt.container_id, rt.if_name))
    }

    fn write_cache(&self, network: &str, rt: &RuntimeConf, result: Value) -> Result<()> {
        let path = self.cache_path(network, rt);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| CorralError::io(dir, e))?;
        }
        let entry = CacheEntry {
            kind: CACHE_KIND.into(),
            container_id: rt.container_id.clone(),
            if_name: rt.if_name.clone(),
            network_name: network.into(),
            netns: rt.netns.clone(),
            result,
        };
        write_atomic(&path, &serde_json::to_vec(&entry)?)
    }

    fn read_cache(&self, network: &str, rt: &RuntimeConf) -> Result<Option<CacheEntry>> {
        let path = self.cache_path(network, rt);
        match std::fs::read(&path) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CorralError::io(&path, e)),
        }
    }
}

/// Builds a plugin's stdin: its own configuration with the list's `name`
/// and `cniVersion`, plus `prevResult` when there is one.
fn plugin_stdin(
    list: &NetworkConfigList,
    plugin: &Map<String, Value>,
    prev: Option<&Value>,
) -> Result<Vec<u8>> {
    let mut conf = plugin.clone();
    let _ = conf.insert("name".into(), Value::String(list.name.clone()));
    let _ = conf.insert("cniVersion".into(), Value::String(list.cni_version.clone()));
    if let Some(prev) = prev {
        let _ = conf.insert("prevResult".into(), prev.clone());
    }
    Ok(serde_json::to_vec(&Value::Object(conf))?)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(|e| CorralError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| CorralError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> NetworkConfigList {
        let mut plugin = Map::new();
        let _ = plugin.insert("type".into(), Value::String("bridge".into()));
        NetworkConfigList {
            name: "podnet".into(),
            cni_version: "1.0.0".into(),
            plugins: vec![plugin],
            source: PathBuf::from("/etc/cni/net.d/10-bridge.conflist"),
        }
    }

    #[test]
    fn stdin_carries_list_fields_and_prev_result() {
        let list = list();
        let prev = serde_json::json!({"ips": [{"address": "10.88.0.7/16"}]});
        let raw = plugin_stdin(&list, &list.plugins[0], Some(&prev)).unwrap();
        let conf: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(conf["name"], "podnet");
        assert_eq!(conf["cniVersion"], "1.0.0");
        assert_eq!(conf["type"], "bridge");
        assert_eq!(conf["prevResult"]["ips"][0]["address"], "10.88.0.7/16");
    }

    #[test]
    fn first_plugin_has_no_prev_result() {
        let list = list();
        let raw = plugin_stdin(&list, &list.plugins[0], None).unwrap();
        let conf: Value = serde_json::from_slice(&raw).unwrap();
        assert!(conf.get("prevResult").is_none());
    }

    #[test]
    fn cache_path_names_network_container_and_interface() {
        let manager = CniManager::new("/etc/cni/net.d", vec![], "/var/lib/cni");
        let rt = RuntimeConf::new("k8s_POD_web_default_abc123", "/proc/1/ns/net");
        assert_eq!(
            manager.cache_path("podnet", &rt),
            PathBuf::from("/var/lib/cni/results/podnet-k8s_POD_web_default_abc123-eth0")
        );
    }
}
