//! Network configuration discovery.
//!
//! The configuration directory may hold several files; they are sorted by
//! name and the first one wins, so `10-bridge.conflist` takes precedence
//! over `99-extra.conf` on every restart.

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};
use serde_json::{Map, Value};

/// File extensions recognised as network configuration.
pub const CONFIG_EXTENSIONS: [&str; 3] = ["conf", "conflist", "json"];

/// An ordered chain of plugin configurations.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfigList {
    /// Network name, shared by every plugin in the chain.
    pub name: String,
    /// CNI specification version of the list.
    pub cni_version: String,
    /// Raw plugin configurations, in invocation order for `ADD`.
    pub plugins: Vec<Map<String, Value>>,
    /// File the list was loaded from.
    pub source: PathBuf,
}

impl NetworkConfigList {
    /// Plugin type (binary name) of a plugin configuration.
    #[must_use]
    pub fn plugin_type(plugin: &Map<String, Value>) -> &str {
        plugin.get("type").and_then(Value::as_str).unwrap_or_default()
    }
}

/// Lists configuration files in `dir`, sorted lexicographically.
///
/// A missing directory yields no files.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub fn config_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CorralError::io(dir, e)),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| CorralError::io(dir, e))?.path();
        let recognised = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext));
        if recognised && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Loads the primary network configuration from `dir`.
///
/// # Errors
///
/// Returns `CorralError::Config` if no configuration file exists or the
/// chosen one is malformed.
pub fn load_dir(dir: &Path) -> Result<NetworkConfigList> {
    let files = config_files(dir)?;
    let Some(first) = files.first() else {
        return Err(CorralError::Config {
            message: format!("no network configuration found in {}", dir.display()),
        });
    };
    load_file(first)
}

/// Loads one configuration file. A single-plugin file is wrapped into a
/// one-element list.
///
/// # Errors
///
/// Returns `CorralError::Config` if the file is not a valid plugin
/// configuration or list.
pub fn load_file(path: &Path) -> Result<NetworkConfigList> {
    let raw = std::fs::read(path).map_err(|e| CorralError::io(path, e))?;
    let invalid = |message: String| CorralError::Config {
        message: format!("{}: {message}", path.display()),
    };
    let Value::Object(mut doc) = serde_json::from_slice::<Value>(&raw).map_err(|e| invalid(e.to_string()))?
    else {
        return Err(invalid("expected a JSON object".into()));
    };

    let name = string_field(&doc, "name").ok_or_else(|| invalid("missing \"name\"".into()))?;
    let cni_version = string_field(&doc, "cniVersion").unwrap_or_else(|| "0.4.0".into());
    let is_list = path.extension().is_some_and(|ext| ext == "conflist");

    let plugins = if is_list {
        let Some(Value::Array(plugins)) = doc.remove("plugins") else {
            return Err(invalid("missing \"plugins\" array".into()));
        };
        plugins
            .into_iter()
            .map(|p| match p {
                Value::Object(map) => Ok(map),
                _ => Err(invalid("plugin entry is not an object".into())),
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        vec![doc]
    };

    if plugins.is_empty() {
        return Err(invalid("plugin list is empty".into()));
    }
    if let Some(untyped) = plugins.iter().position(|p| NetworkConfigList::plugin_type(p).is_empty()) {
        return Err(invalid(format!("plugin {untyped} has no \"type\"")));
    }

    tracing::debug!(path = %path.display(), network = %name, plugins = plugins.len(), "network configuration loaded");
    Ok(NetworkConfigList {
        name,
        cni_version,
        plugins,
        source: path.to_path_buf(),
    })
}

fn string_field(doc: &Map<String, Value>, key: &str) -> Option<String> {
    doc.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognised_extensions_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "x").unwrap();
        std::fs::write(dir.path().join("20-a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("10-b.conf"), "{}").unwrap();
        let names: Vec<_> = config_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["10-b.conf", "20-a.json"]);
    }

    #[test]
    fn missing_directory_has_no_files() {
        assert!(config_files(Path::new("/nonexistent/net.d")).unwrap().is_empty());
    }

    #[test]
    fn single_plugin_file_is_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("10-bridge.conf");
        std::fs::write(
            &path,
            r#"{"cniVersion":"1.0.0","name":"podnet","type":"bridge","bridge":"cni0"}"#,
        )
        .unwrap();
        let list = load_file(&path).unwrap();
        assert_eq!(list.name, "podnet");
        assert_eq!(list.cni_version, "1.0.0");
        assert_eq!(list.plugins.len(), 1);
        assert_eq!(NetworkConfigList::plugin_type(&list.plugins[0]), "bridge");
    }

    #[test]
    fn list_without_plugins_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("10-empty.conflist");
        std::fs::write(&path, r#"{"cniVersion":"1.0.0","name":"podnet","plugins":[]}"#).unwrap();
        assert!(matches!(load_file(&path), Err(CorralError::Config { .. })));
    }

    #[test]
    fn plugin_without_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("10-bad.conflist");
        std::fs::write(
            &path,
            r#"{"cniVersion":"1.0.0","name":"podnet","plugins":[{"bridge":"cni0"}]}"#,
        )
        .unwrap();
        let err = load_file(&path).unwrap_err();
        assert!(err.to_string().contains("no \"type\""));
    }
}
