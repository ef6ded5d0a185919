//! The allocation result returned by a successful `ADD`.

use serde::{Deserialize, Serialize};

/// Interfaces, addresses, routes, and DNS settings allocated to a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CniResult {
    /// Specification version the plugin answered with.
    pub cni_version: String,
    /// Interfaces created or touched by the chain.
    pub interfaces: Vec<Interface>,
    /// Assigned addresses.
    pub ips: Vec<IpConfig>,
    /// Routes installed in the namespace.
    pub routes: Vec<Route>,
    /// Resolver configuration.
    pub dns: Dns,
}

impl CniResult {
    /// First assigned address without its prefix length.
    #[must_use]
    pub fn primary_ip(&self) -> Option<&str> {
        self.ips
            .first()
            .map(|ip| ip.address.split('/').next().unwrap_or(&ip.address))
    }
}

/// One network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interface {
    /// Interface name.
    pub name: String,
    /// Hardware address.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mac: String,
    /// Namespace path the interface lives in; empty for host interfaces.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sandbox: String,
}

/// One assigned address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpConfig {
    /// Address in CIDR notation.
    pub address: String,
    /// Default gateway for this address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Index into [`CniResult::interfaces`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
}

/// One route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Route {
    /// Destination in CIDR notation.
    pub dst: String,
    /// Next hop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gw: Option<String>,
}

/// Resolver configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dns {
    /// Nameserver addresses.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    /// Local domain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Search domains.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,
    /// Resolver options.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Error document a plugin prints on failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PluginError {
    /// CNI error code.
    pub code: u32,
    /// Short message.
    pub msg: String,
    /// Longer explanation.
    pub details: String,
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.msg, self.code)?;
        if !self.details.is_empty() {
            write!(f, ": {}", self.details)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bridge_style_result() {
        let raw = r#"{
            "cniVersion": "1.0.0",
            "interfaces": [{"name": "eth0", "mac": "aa:bb:cc:dd:ee:ff", "sandbox": "/proc/42/ns/net"}],
            "ips": [{"address": "10.88.0.7/16", "gateway": "10.88.0.1", "interface": 0}],
            "routes": [{"dst": "0.0.0.0/0"}],
            "dns": {}
        }"#;
        let result: CniResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.primary_ip(), Some("10.88.0.7"));
        assert_eq!(result.ips[0].interface, Some(0));
        assert_eq!(result.interfaces[0].name, "eth0");
        assert_eq!(result.routes[0].gw, None);
    }

    #[test]
    fn empty_result_has_no_ip() {
        let result: CniResult = serde_json::from_str("{}").unwrap();
        assert_eq!(result.primary_ip(), None);
    }

    #[test]
    fn plugin_error_display_includes_details() {
        let err: PluginError =
            serde_json::from_str(r#"{"code":11,"msg":"netns gone","details":"/proc/1/ns/net"}"#)
                .unwrap();
        assert_eq!(err.to_string(), "netns gone (code 11): /proc/1/ns/net");
    }
}
